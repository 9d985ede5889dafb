use candle_core::{Device, Result, Shape, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

///
/// z = mu + sigma * eps
/// where sigma = exp(0.5 * lnvar)
///
/// The noise `eps` comes in from the caller, so the map itself is
/// deterministic and differentiable in `z_mean` and `z_lnvar`.
///
/// # Arguments
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
/// * `eps` - standard normal noise of the same shape
pub fn reparameterize(z_mean: &Tensor, z_lnvar: &Tensor, eps: &Tensor) -> Result<Tensor> {
    z_mean + (z_lnvar * 0.5)?.exp()?.mul(eps)?
}

/// A seeded source of standard normal noise.  Every call to `sample`
/// draws a fresh `eps`; two sources with the same seed produce the
/// same sequence.
pub struct GaussianNoise {
    rng: StdRng,
}

impl GaussianNoise {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw `eps ~ N(0, I)` with the given shape on `device`
    pub fn sample<S: Into<Shape>>(&mut self, shape: S, device: &Device) -> Result<Tensor> {
        let shape: Shape = shape.into();
        let eps: Vec<f32> = (0..shape.elem_count())
            .map(|_| StandardNormal.sample(&mut self.rng))
            .collect();
        Tensor::from_vec(eps, shape, device)
    }

    /// Draw `eps` matching the shape, device and dtype of `like`
    pub fn sample_like(&mut self, like: &Tensor) -> Result<Tensor> {
        self.sample(like.shape().clone(), like.device())?
            .to_dtype(like.dtype())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn fixed_noise_gives_closed_form_sample() -> Result<()> {
        let dev = Device::Cpu;
        let mu = Tensor::new(&[[0.5f32, -1.0]], &dev)?;
        let lv = Tensor::new(&[[0.0f32, 2.0]], &dev)?;
        let eps = Tensor::new(&[[1.5f32, -0.25]], &dev)?;

        let z = reparameterize(&mu, &lv, &eps)?.to_vec2::<f32>()?;

        assert_abs_diff_eq!(z[0][0], 0.5 + 1.5, epsilon = 1e-6);
        assert_abs_diff_eq!(z[0][1], -1.0 + 1f32.exp() * -0.25, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn zero_noise_returns_mean() -> Result<()> {
        let dev = Device::Cpu;
        let mu = Tensor::new(&[[0.3f32, 0.7], [1.0, -2.0]], &dev)?;
        let lv = Tensor::new(&[[4.0f32, -3.0], [0.1, 0.2]], &dev)?;
        let eps = Tensor::zeros_like(&mu)?;
        let z = reparameterize(&mu, &lv, &eps)?;
        assert_eq!(z.to_vec2::<f32>()?, mu.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn noise_is_fresh_per_call_and_seeded() -> Result<()> {
        let dev = Device::Cpu;
        let mut a = GaussianNoise::new(7);
        let mut b = GaussianNoise::new(7);

        let a1 = a.sample((4, 2), &dev)?.flatten_all()?.to_vec1::<f32>()?;
        let a2 = a.sample((4, 2), &dev)?.flatten_all()?.to_vec1::<f32>()?;
        let b1 = b.sample((4, 2), &dev)?.flatten_all()?.to_vec1::<f32>()?;

        assert_ne!(a1, a2);
        assert_eq!(a1, b1);
        Ok(())
    }
}
