use crate::lentil_common::*;

use candle_util::candle_decoder_conditional::*;
use candle_util::candle_encoder_conditional::*;
use candle_util::candle_model_error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Bumped whenever the layer layout below changes
pub const CVAE_FORMAT_VERSION: u32 = 1;

/// Architecture of the conditional VAE.  Saved next to the weights
/// so that the decoder can be rebuilt from weight values alone.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CvaeConfig {
    pub format_version: u32,
    pub image_side: usize,
    pub image_channels: usize,
    pub n_classes: usize,
    pub latent_dim: usize,
    /// encoder downsampling channels; the decoder upsamples in reverse
    pub conv_channels: Vec<usize>,
    pub label_hidden: usize,
    pub encoder_layers: Vec<usize>,
    pub decoder_layers: Vec<usize>,
}

impl Default for CvaeConfig {
    fn default() -> Self {
        Self {
            format_version: CVAE_FORMAT_VERSION,
            image_side: MNIST_SIDE,
            image_channels: 1,
            n_classes: NUM_DIGITS,
            latent_dim: 2,
            conv_channels: vec![32, 64],
            label_hidden: 16,
            encoder_layers: vec![16],
            decoder_layers: vec![],
        }
    }
}

impl CvaeConfig {
    pub fn dim_obs(&self) -> usize {
        self.image_channels * self.image_side * self.image_side
    }

    pub fn decoder_channels(&self) -> Vec<usize> {
        self.conv_channels.iter().rev().copied().collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.latent_dim == 0 || self.n_classes == 0 || self.image_channels == 0 {
            return Err(anyhow::anyhow!(
                "latent_dim, n_classes and image_channels must be positive"
            ));
        }
        let stride = 1_usize << self.conv_channels.len();
        if self.image_side == 0 || self.image_side % stride != 0 {
            return Err(anyhow::anyhow!(
                "image side {} must be a positive multiple of {}",
                self.image_side,
                stride
            ));
        }
        Ok(())
    }

    pub fn build_encoder(&self, vs: VarBuilder) -> candle_core::Result<ConditionalConvEncoder> {
        ConditionalConvEncoder::new(
            ConditionalConvEncoderArgs {
                image_side: self.image_side,
                in_channels: self.image_channels,
                n_classes: self.n_classes,
                n_latent: self.latent_dim,
                conv_channels: &self.conv_channels,
                label_hidden: self.label_hidden,
                layers: &self.encoder_layers,
            },
            vs,
        )
    }

    pub fn build_decoder(&self, vs: VarBuilder) -> candle_core::Result<ConditionalConvDecoder> {
        let channels = self.decoder_channels();
        ConditionalConvDecoder::new(
            ConditionalConvDecoderArgs {
                image_side: self.image_side,
                out_channels: self.image_channels,
                n_classes: self.n_classes,
                n_latent: self.latent_dim,
                conv_channels: &channels,
                layers: &self.decoder_layers,
            },
            vs,
        )
    }

    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let mut buf = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer_pretty(&mut buf, self)?;
        buf.flush()?;
        Ok(())
    }

    /// Read a saved architecture; a missing file, unreadable JSON or
    /// an unknown format version all mean the model is unavailable
    pub fn from_json_file(path: &Path) -> ModelResult<Self> {
        let unavailable = |reason: String| ModelError::ModelUnavailable {
            path: path.display().to_string(),
            reason,
        };

        let file = std::fs::File::open(path).map_err(|e| unavailable(e.to_string()))?;
        let config: CvaeConfig = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| unavailable(e.to_string()))?;

        if config.format_version != CVAE_FORMAT_VERSION {
            return Err(unavailable(format!(
                "unsupported format version {} (expected {})",
                config.format_version, CVAE_FORMAT_VERSION
            )));
        }
        config.validate().map_err(|e| unavailable(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_mnist_architecture() {
        let config = CvaeConfig::default();
        assert_eq!(config.dim_obs(), 784);
        assert_eq!(config.decoder_channels(), vec![64, 32]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_round_trip_and_version_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.config.json");

        let config = CvaeConfig {
            image_side: 8,
            latent_dim: 3,
            ..Default::default()
        };
        config.to_json_file(&path).unwrap();
        assert_eq!(CvaeConfig::from_json_file(&path).unwrap(), config);

        let future = CvaeConfig {
            format_version: CVAE_FORMAT_VERSION + 1,
            ..Default::default()
        };
        future.to_json_file(&path).unwrap();
        assert!(matches!(
            CvaeConfig::from_json_file(&path),
            Err(ModelError::ModelUnavailable { .. })
        ));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = CvaeConfig::from_json_file(Path::new("/nonexistent/model.config.json"));
        assert!(matches!(err, Err(ModelError::ModelUnavailable { .. })));
    }

    #[test]
    fn side_must_match_downsampling() {
        let config = CvaeConfig {
            image_side: 30,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
