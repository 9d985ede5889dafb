use crate::candle_data_loader::*;
use crate::candle_inference::TrainConfig;
use crate::candle_loss_functions::*;
use crate::candle_model_error::{ModelError, ModelResult};
use crate::candle_model_traits::{ConditionalDecoderModuleT, ConditionalEncoderModuleT};
use crate::candle_reparameterize::{reparameterize, GaussianNoise};

use candle_core::{Device, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainState {
    Initialized,
    Training,
    Converged,
    Stopped,
}

/// Running mean of a scalar reported once per minibatch
#[derive(Clone, Copy, Debug, Default)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    pub fn update(&mut self, value: f32) {
        self.sum += value as f64;
        self.count += 1;
    }

    pub fn mean(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum / self.count as f64) as f32
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LossTrackers {
    pub total: RunningMean,
    pub recon: RunningMean,
    pub kl: RunningMean,
}

impl LossTrackers {
    fn update(&mut self, total: f32, recon: f32, kl: f32) {
        self.total.update(total);
        self.recon.update(recon);
        self.kl.update(kl);
    }

    fn record(&self, epoch: usize) -> LossRecord {
        LossRecord {
            epoch,
            total: self.total.mean(),
            recon: self.recon.mean(),
            kl: self.kl.mean(),
        }
    }
}

/// Epoch averages of the three loss terms
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LossRecord {
    pub epoch: usize,
    pub total: f32,
    pub recon: f32,
    pub kl: f32,
}

#[derive(Clone, Debug, Default)]
pub struct TrainTrace {
    pub train: Vec<LossRecord>,
    pub valid: Vec<LossRecord>,
}

/// Per-minibatch scalars of one forward pass
struct StepLoss {
    total: f32,
    recon: f32,
    kl: f32,
}

pub struct ConditionalVae<'a, Enc, Dec>
where
    Enc: ConditionalEncoderModuleT,
    Dec: ConditionalDecoderModuleT,
{
    pub encoder: &'a Enc,
    pub decoder: &'a Dec,
    pub variable_maps: Vec<&'a VarMap>,
    state: TrainState,
}

pub trait ConditionalVaeT<'a, Enc, Dec>
where
    Enc: ConditionalEncoderModuleT,
    Dec: ConditionalDecoderModuleT,
    Self: Sized,
{
    /// Train the conditional VAE model
    /// * `data` - training data loader
    /// * `valid` - optional held-out data evaluated after every epoch
    /// * `train_config` - training configuration
    fn train_encoder_decoder<DataL>(
        &mut self,
        data: &mut DataL,
        valid: Option<&mut DataL>,
        train_config: &TrainConfig,
    ) -> anyhow::Result<TrainTrace>
    where
        DataL: DataLoader;

    /// Average the loss terms over `data` without updating parameters;
    /// `epoch` only labels a non-finite loss
    fn evaluate<DataL>(
        &self,
        data: &mut DataL,
        noise: &mut GaussianNoise,
        epoch: usize,
        train_config: &TrainConfig,
    ) -> anyhow::Result<LossTrackers>
    where
        DataL: DataLoader;

    /// Build a conditional VAE model
    /// * `encoder` - encoder module
    /// * `decoder` - decoder module
    /// * `variable_maps` - every parameter set to optimize
    fn build(
        encoder: &'a Enc,
        decoder: &'a Dec,
        variable_maps: &[&'a VarMap],
    ) -> ModelResult<Self>;

    fn state(&self) -> TrainState;
}

impl<'a, Enc, Dec> ConditionalVae<'a, Enc, Dec>
where
    Enc: ConditionalEncoderModuleT,
    Dec: ConditionalDecoderModuleT,
{
    fn all_vars(&self) -> Vec<Var> {
        self.variable_maps
            .iter()
            .flat_map(|vm| vm.all_vars())
            .collect()
    }

    /// encode -> sample -> decode -> loss
    fn forward_loss(
        &self,
        mb: &MinibatchData,
        noise: &mut GaussianNoise,
        kl_weight: f64,
        train: bool,
    ) -> candle_core::Result<CvaeLoss> {
        let (z_mean, z_lnvar) = self.encoder.forward_t(&mb.images, &mb.labels, train)?;
        let eps = noise.sample_like(&z_mean)?;
        let z = reparameterize(&z_mean, &z_lnvar, &eps)?;
        let kl_n = gaussian_kl_loss(&z_mean, &z_lnvar)?;
        let (_, recon_n) = self.decoder.forward_with_loss(
            &z,
            &mb.labels,
            &mb.images,
            &bernoulli_cross_entropy,
        )?;
        cvae_loss(&recon_n, &kl_n, kl_weight)
    }

    /// Image size and classes of `data` must match the encoder
    fn check_data<DataL>(&self, data: &DataL) -> ModelResult<()>
    where
        DataL: DataLoader,
    {
        let (c, h, w) = data.image_dims();
        if c * h * w != self.encoder.dim_obs() {
            return Err(ModelError::ShapeMismatch {
                what: "image size (data vs. encoder)",
                expected: vec![self.encoder.dim_obs()],
                actual: vec![c, h, w],
            });
        }
        if data.num_classes() != self.encoder.dim_label() {
            return Err(ModelError::ShapeMismatch {
                what: "number of classes (data vs. encoder)",
                expected: vec![self.encoder.dim_label()],
                actual: vec![data.num_classes()],
            });
        }
        Ok(())
    }

    /// Run every epoch; any error leaves the caller to stop training
    fn run_epochs<DataL>(
        &mut self,
        data: &mut DataL,
        mut valid: Option<&mut DataL>,
        train_config: &TrainConfig,
        pb: &ProgressBar,
    ) -> anyhow::Result<TrainTrace>
    where
        DataL: DataLoader,
    {
        self.check_data(data)?;
        if let Some(valid_data) = valid.as_deref() {
            self.check_data(valid_data)?;
        }

        let device: &Device = &train_config.device;

        let params = ParamsAdamW {
            lr: train_config.learning_rate.into(),
            weight_decay: train_config.weight_decay.into(),
            ..Default::default()
        };
        let mut adam = AdamW::new(self.all_vars(), params)?;
        let mut noise = GaussianNoise::new(train_config.seed);

        let mut trace = TrainTrace::default();

        for epoch in 0..train_config.num_epochs {
            data.shuffle_minibatch(train_config.batch_size)?;

            let mut trackers = LossTrackers::default();

            for batch in 0..data.num_minibatch() {
                let mb = data.minibatch_data(batch, device)?;
                let loss = self.forward_loss(&mb, &mut noise, train_config.kl_weight, true)?;

                let step = finite_scalars(&loss, epoch + 1, batch)?;

                adam.backward_step(&loss.total)?;
                trackers.update(step.total, step.recon, step.kl);

                debug!(
                    "[{}/{}] loss: {:.4}, recon: {:.4}, kl: {:.4}",
                    epoch + 1,
                    batch + 1,
                    trackers.total.mean(),
                    trackers.recon.mean(),
                    trackers.kl.mean()
                );
            }

            let record = trackers.record(epoch + 1);
            trace.train.push(record);
            pb.inc(1);

            if train_config.verbose {
                info!(
                    "[{}] loss: {:.4}, reconstruction: {:.4}, kl: {:.4}",
                    epoch + 1,
                    record.total,
                    record.recon,
                    record.kl
                );
            }

            if let Some(valid_data) = valid.as_deref_mut() {
                let valid_trackers =
                    self.evaluate(valid_data, &mut noise, epoch + 1, train_config)?;
                let valid_record = valid_trackers.record(epoch + 1);
                trace.valid.push(valid_record);
                if train_config.verbose {
                    info!(
                        "[{}] validation loss: {:.4}, reconstruction: {:.4}, kl: {:.4}",
                        epoch + 1,
                        valid_record.total,
                        valid_record.recon,
                        valid_record.kl
                    );
                }
            }

            if let (Some(tol), [.., prev, curr]) = (train_config.tolerance, trace.train.as_slice())
            {
                if relative_change(prev.total, curr.total) < tol {
                    info!("converged after {} epochs", epoch + 1);
                    self.state = TrainState::Converged;
                    break;
                }
            }
        } // each epoch

        Ok(trace)
    }
}

fn finite_scalars(loss: &CvaeLoss, epoch: usize, batch: usize) -> anyhow::Result<StepLoss> {
    let total = loss.total.to_scalar::<f32>()?;
    let recon = loss.recon.to_scalar::<f32>()?;
    let kl = loss.kl.to_scalar::<f32>()?;

    for (value, what) in [(recon, "reconstruction loss"), (kl, "KL loss"), (total, "total loss")] {
        if !value.is_finite() {
            return Err(ModelError::NumericInstability { epoch, batch, what }.into());
        }
    }
    Ok(StepLoss { total, recon, kl })
}

fn relative_change(prev: f32, curr: f32) -> f32 {
    (prev - curr).abs() / prev.abs().max(f32::EPSILON)
}

impl<'a, Enc, Dec> ConditionalVaeT<'a, Enc, Dec> for ConditionalVae<'a, Enc, Dec>
where
    Enc: ConditionalEncoderModuleT,
    Dec: ConditionalDecoderModuleT,
{
    fn train_encoder_decoder<DataL>(
        &mut self,
        data: &mut DataL,
        valid: Option<&mut DataL>,
        train_config: &TrainConfig,
    ) -> anyhow::Result<TrainTrace>
    where
        DataL: DataLoader,
    {
        let pb = ProgressBar::new(train_config.num_epochs as u64);

        if !train_config.show_progress || train_config.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        self.state = TrainState::Training;
        let trace = self.run_epochs(data, valid, train_config, &pb);

        // errors and exhausted epochs both stop; only convergence differs
        if self.state == TrainState::Training {
            self.state = TrainState::Stopped;
        }

        pb.finish_and_clear();
        trace
    }

    fn evaluate<DataL>(
        &self,
        data: &mut DataL,
        noise: &mut GaussianNoise,
        epoch: usize,
        train_config: &TrainConfig,
    ) -> anyhow::Result<LossTrackers>
    where
        DataL: DataLoader,
    {
        data.shuffle_minibatch(train_config.batch_size)?;

        let mut trackers = LossTrackers::default();
        for batch in 0..data.num_minibatch() {
            let mb = data.minibatch_data(batch, &train_config.device)?;
            let loss = self.forward_loss(&mb, noise, train_config.kl_weight, false)?;
            let step = finite_scalars(&loss, epoch, batch)?;
            trackers.update(step.total, step.recon, step.kl);
        }
        Ok(trackers)
    }

    fn build(
        encoder: &'a Enc,
        decoder: &'a Dec,
        variable_maps: &[&'a VarMap],
    ) -> ModelResult<Self> {
        if encoder.dim_latent() != decoder.dim_latent() {
            return Err(ModelError::ShapeMismatch {
                what: "latent dimension (encoder vs. decoder)",
                expected: vec![encoder.dim_latent()],
                actual: vec![decoder.dim_latent()],
            });
        }
        if encoder.dim_label() != decoder.dim_label() {
            return Err(ModelError::ShapeMismatch {
                what: "number of classes (encoder vs. decoder)",
                expected: vec![encoder.dim_label()],
                actual: vec![decoder.dim_label()],
            });
        }
        if encoder.dim_obs() != decoder.dim_obs() {
            return Err(ModelError::ShapeMismatch {
                what: "image size (encoder vs. decoder)",
                expected: vec![encoder.dim_obs()],
                actual: vec![decoder.dim_obs()],
            });
        }

        Ok(Self {
            encoder,
            decoder,
            variable_maps: variable_maps.to_vec(),
            state: TrainState::Initialized,
        })
    }

    fn state(&self) -> TrainState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_mean_averages_updates() {
        let mut m = RunningMean::default();
        assert_eq!(m.mean(), 0.0);
        m.update(1.0);
        m.update(2.0);
        m.update(6.0);
        assert_eq!(m.count(), 3);
        assert_eq!(m.mean(), 3.0);
    }

    #[test]
    fn relative_change_is_scale_free() {
        assert!((relative_change(100.0, 99.0) - 0.01).abs() < 1e-6);
        assert!((relative_change(1.0, 0.99) - 0.01).abs() < 1e-6);
        assert!(relative_change(0.0, 0.0).is_finite());
    }
}
