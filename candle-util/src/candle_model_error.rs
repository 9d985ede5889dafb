use thiserror::Error;

/// Errors surfaced at the boundaries of the conditional VAE.
///
/// Tensor-level failures inside a module stay `candle_core::Error`;
/// everything a caller must tell apart from a legitimate output is
/// lifted into one of these variants.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("invalid label {label}: expected a class in [0, {num_classes})")]
    InvalidLabel { label: i64, num_classes: usize },

    #[error("model unavailable at {path}: {reason}")]
    ModelUnavailable { path: String, reason: String },

    #[error("numeric instability at epoch {epoch}, minibatch {batch}: {what} is not finite")]
    NumericInstability {
        epoch: usize,
        batch: usize,
        what: &'static str,
    },

    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("invalid latent point: expected {expected} finite coordinates, got {actual:?}")]
    InvalidLatent { expected: usize, actual: Vec<f32> },

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

pub type ModelResult<T> = std::result::Result<T, ModelError>;

/// Validate an integer class label against `num_classes`
pub fn check_label(label: i64, num_classes: usize) -> ModelResult<usize> {
    if label < 0 || label as u64 >= num_classes as u64 {
        return Err(ModelError::InvalidLabel { label, num_classes });
    }
    Ok(label as usize)
}

/// Check that a tensor has exactly the expected dims
pub fn check_dims(
    what: &'static str,
    tensor: &candle_core::Tensor,
    expected: &[usize],
) -> ModelResult<()> {
    if tensor.dims() != expected {
        return Err(ModelError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: tensor.dims().to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_outside_range_are_rejected() {
        assert!(matches!(
            check_label(-1, 10),
            Err(ModelError::InvalidLabel { label: -1, .. })
        ));
        assert!(matches!(
            check_label(10, 10),
            Err(ModelError::InvalidLabel { label: 10, .. })
        ));
        assert_eq!(check_label(0, 10).unwrap(), 0);
        assert_eq!(check_label(9, 10).unwrap(), 9);
    }

    #[test]
    fn dims_are_compared_exactly() {
        let dev = candle_core::Device::Cpu;
        let x = candle_core::Tensor::zeros((2, 3), candle_core::DType::F32, &dev).unwrap();
        assert!(check_dims("x", &x, &[2, 3]).is_ok());
        let err = check_dims("x", &x, &[2, 4]).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { what: "x", .. }));
    }
}
