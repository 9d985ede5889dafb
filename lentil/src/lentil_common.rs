pub use log::{info, warn};

pub use candle_util::{candle_core, candle_nn};
pub use candle_core::{DType, Device, Tensor};
pub use candle_nn::{VarBuilder, VarMap};

pub const MNIST_SIDE: usize = 28;
pub const NUM_DIGITS: usize = 10;
