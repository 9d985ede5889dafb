pub struct TrainConfig {
    pub learning_rate: f32,
    pub weight_decay: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    /// weight of the KL term in the total loss (1.0 = plain VAE)
    pub kl_weight: f64,
    /// seeds the reparameterization noise
    pub seed: u64,
    /// stop early once the relative change of the epoch loss is below this
    pub tolerance: Option<f32>,
    pub device: candle_core::Device,
    pub verbose: bool,
    pub show_progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            weight_decay: 0.0,
            batch_size: 128,
            num_epochs: 30,
            kl_weight: 1.0,
            seed: 42,
            tolerance: None,
            device: candle_core::Device::Cpu,
            verbose: false,
            show_progress: true,
        }
    }
}
