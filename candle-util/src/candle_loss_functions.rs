use candle_core::{Result, Tensor};

/// Clip probabilities into `[eps, 1 - eps]` before taking logs
pub const BCE_EPSILON: f64 = 1e-7;

/// KL divergence loss between q = N(mu, sigma^2) and p = N(0, 1)
///
/// -0.5 * sum_k (1 + log(sigma^2) - mu^2 - sigma^2)
///
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
/// Returns one value per sample (summed over the last axis).
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let z_var = z_lnvar.exp()?;
    (z_var - 1. + z_mean.powf(2.)? - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// Binary cross entropy of [0,1]-valued data under a Bernoulli
/// reconstruction, summed over every non-batch axis
///
/// loss(i) = - sum_p [ x(i,p) * log r(i,p) + (1 - x(i,p)) * log(1 - r(i,p)) ]
///
/// * `x` - observed data (n x ...)
/// * `recon` - reconstructed probabilities (n x ...)
///
pub fn bernoulli_cross_entropy(x: &Tensor, recon: &Tensor) -> Result<Tensor> {
    let x_np = x.flatten_from(1)?;
    let r_np = recon
        .flatten_from(1)?
        .clamp(BCE_EPSILON, 1.0 - BCE_EPSILON)?;

    let log_r = r_np.log()?;
    let log_1m_r = r_np.affine(-1., 1.)?.log()?;
    let x_1m = x_np.affine(-1., 1.)?;

    (x_np.mul(&log_r)? + x_1m.mul(&log_1m_r)?)?
        .sum(1)?
        .neg()
}

/// Batch-averaged loss terms of a conditional VAE
pub struct CvaeLoss {
    pub total: Tensor,
    pub recon: Tensor,
    pub kl: Tensor,
}

/// Combine per-sample reconstruction and KL terms
///
/// total = mean(recon_n) + kl_weight * mean(kl_n)
///
/// * `recon_n` - reconstruction loss per sample
/// * `kl_n` - KL divergence per sample
/// * `kl_weight` - weight of the KL term (1.0 = plain VAE)
///
pub fn cvae_loss(recon_n: &Tensor, kl_n: &Tensor, kl_weight: f64) -> Result<CvaeLoss> {
    let recon = recon_n.mean_all()?;
    let kl = kl_n.mean_all()?;
    let total = (&recon + (&kl * kl_weight)?)?;
    Ok(CvaeLoss { total, recon, kl })
}
