pub mod candle_aux_layers;
pub mod candle_cvae_inference;
pub mod candle_data_loader;
pub mod candle_decoder_conditional;
pub mod candle_encoder_conditional;
pub mod candle_inference;
pub mod candle_loss_functions;
pub mod candle_model_error;
pub mod candle_model_traits;
pub mod candle_reparameterize;

pub use candle_core;
pub use candle_nn;
