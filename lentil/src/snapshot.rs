use crate::cvae_config::CvaeConfig;
use crate::lentil_common::*;

use candle_util::candle_decoder_conditional::ConditionalConvDecoder;
use candle_util::candle_encoder_conditional::ConditionalConvEncoder;
use candle_util::candle_model_error::{ModelError, ModelResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Files of a frozen model under one output prefix:
/// * `{out}.config.json` - architecture
/// * `{out}.encoder.safetensors` - encoder parameters
/// * `{out}.decoder.safetensors` - decoder parameters
#[derive(Clone, Debug)]
pub struct SnapshotFiles {
    pub config: PathBuf,
    pub encoder: PathBuf,
    pub decoder: PathBuf,
}

impl SnapshotFiles {
    pub fn new(out: &str) -> Self {
        Self {
            config: PathBuf::from(format!("{}.config.json", out)),
            encoder: PathBuf::from(format!("{}.encoder.safetensors", out)),
            decoder: PathBuf::from(format!("{}.decoder.safetensors", out)),
        }
    }
}

/// Create the parent directory of an output prefix if needed
pub fn mkdir_parent(out: &str) -> anyhow::Result<()> {
    if let Some(dir) = Path::new(out).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

/// Freeze both parameter sets and the architecture under `out`
pub fn save_snapshot(
    out: &str,
    config: &CvaeConfig,
    encoder_vars: &VarMap,
    decoder_vars: &VarMap,
) -> anyhow::Result<SnapshotFiles> {
    mkdir_parent(out)?;
    let files = SnapshotFiles::new(out);

    config.to_json_file(&files.config)?;
    encoder_vars.save(&files.encoder)?;
    decoder_vars.save(&files.decoder)?;

    info!(
        "Saved the model: {}, {}, {}",
        files.config.display(),
        files.encoder.display(),
        files.decoder.display()
    );
    Ok(files)
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> ModelError {
    ModelError::ModelUnavailable {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

fn load_tensors(path: &Path, device: &Device) -> ModelResult<HashMap<String, Tensor>> {
    if !path.exists() {
        return Err(unavailable(path, "no such file"));
    }
    candle_core::safetensors::load(path, device).map_err(|e| unavailable(path, e))
}

/// Rebuild the decoder from a snapshot.  Any missing file, missing
/// tensor or tensor of the wrong shape makes the model unavailable.
pub fn load_decoder(
    out: &str,
    device: &Device,
) -> ModelResult<(CvaeConfig, ConditionalConvDecoder)> {
    let files = SnapshotFiles::new(out);
    let config = CvaeConfig::from_json_file(&files.config)?;
    let tensors = load_tensors(&files.decoder, device)?;
    let vs = VarBuilder::from_tensors(tensors, DType::F32, device);
    let decoder = config
        .build_decoder(vs)
        .map_err(|e| unavailable(&files.decoder, e))?;
    Ok((config, decoder))
}

/// Rebuild the encoder from a snapshot
pub fn load_encoder(
    out: &str,
    device: &Device,
) -> ModelResult<(CvaeConfig, ConditionalConvEncoder)> {
    let files = SnapshotFiles::new(out);
    let config = CvaeConfig::from_json_file(&files.config)?;
    let tensors = load_tensors(&files.encoder, device)?;
    let vs = VarBuilder::from_tensors(tensors, DType::F32, device);
    let encoder = config
        .build_encoder(vs)
        .map_err(|e| unavailable(&files.encoder, e))?;
    Ok((config, encoder))
}
