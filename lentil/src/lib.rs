pub mod cvae_config; // architecture saved next to the weights
pub mod generator; // inference service
pub mod grid_io; // writing decoded images
pub mod lentil_common;
pub mod mnist_io; // IDX reader
pub mod simulate; // toy labeled images
pub mod snapshot; // save and load parameters
