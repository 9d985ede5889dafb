use candle_core::{Result, Tensor};

pub trait ConditionalEncoderModuleT {
    /// An encoder that spits out parameters of the latent Gaussian
    ///
    /// # Arguments
    /// * `x_nchw` - input images (n x c x h x w)
    /// * `y_nl` - one-hot class labels (n x l)
    /// * `train` - whether we are in training mode
    ///
    /// # Returns `(z_mean_nk, z_lnvar_nk)`
    /// * `z_mean_nk` - mean of q(z|x,y) (n x k)
    /// * `z_lnvar_nk` - log-variance of q(z|x,y) (n x k)
    fn forward_t(&self, x_nchw: &Tensor, y_nl: &Tensor, train: bool) -> Result<(Tensor, Tensor)>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;

    fn dim_label(&self) -> usize;
}

pub trait ConditionalDecoderModuleT {
    /// A decoder that spits out reconstruction with every entry in (0, 1)
    ///
    /// * `z_nk` - latent states (n x k)
    /// * `y_nl` - one-hot class labels (n x l)
    fn forward(&self, z_nk: &Tensor, y_nl: &Tensor) -> Result<Tensor>;

    /// A decoder that spits out reconstruction and a per-sample loss
    /// * `z_nk` - latent states
    /// * `y_nl` - one-hot class labels
    /// * `x_nchw` - observed data to validate with
    /// * `loss` - fn (observed, reconstruction) -> loss (n)
    fn forward_with_loss<LossFn>(
        &self,
        z_nk: &Tensor,
        y_nl: &Tensor,
        x_nchw: &Tensor,
        loss: &LossFn,
    ) -> Result<(Tensor, Tensor)>
    where
        LossFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
    {
        let recon = self.forward(z_nk, y_nl)?;
        let loss_n = loss(x_nchw, &recon)?;
        Ok((recon, loss_n))
    }

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;

    fn dim_label(&self) -> usize;
}
