use crate::candle_aux_layers::{dense_stack, StackLayers};
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor, D};
use candle_nn::{Activation, Conv2d, Linear, Module, VarBuilder};

/// Keep the log-variance in a range where `exp` stays well-behaved
const MIN_LNVAR: f64 = -8.;
const MAX_LNVAR: f64 = 8.;

pub struct ConditionalConvEncoder {
    image_side: usize,
    in_channels: usize,
    n_classes: usize,
    n_latent: usize,
    conv: StackLayers<Conv2d>,
    fc_label: Linear,
    fc: StackLayers<Linear>,
    z_mean: Linear,
    z_lnvar: Linear,
}

pub struct ConditionalConvEncoderArgs<'a> {
    pub image_side: usize,
    pub in_channels: usize,
    pub n_classes: usize,
    pub n_latent: usize,
    pub conv_channels: &'a [usize],
    pub label_hidden: usize,
    pub layers: &'a [usize],
}

impl ConditionalEncoderModuleT for ConditionalConvEncoder {
    fn forward_t(&self, x_nchw: &Tensor, y_nl: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        self.latent_gaussian_params(x_nchw, y_nl, train)
    }

    fn dim_obs(&self) -> usize {
        self.in_channels * self.image_side * self.image_side
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }

    fn dim_label(&self) -> usize {
        self.n_classes
    }
}

impl ConditionalConvEncoder {
    ///
    /// Evaluate latent Gaussian parameters: mu and log_var
    /// z ~ (mu(x,y), log_var(x,y))
    pub fn latent_gaussian_params(
        &self,
        x_nchw: &Tensor,
        y_nl: &Tensor,
        _train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (n, c, h, w) = x_nchw.dims4()?;
        let (ny, l) = y_nl.dims2()?;

        if c != self.in_channels || h != self.image_side || w != self.image_side {
            candle_core::bail!(
                "encoder expects (n, {}, {}, {}) images, got {:?}",
                self.in_channels,
                self.image_side,
                self.image_side,
                x_nchw.dims()
            );
        }
        if ny != n || l != self.n_classes {
            candle_core::bail!(
                "encoder expects ({}, {}) labels, got {:?}",
                n,
                self.n_classes,
                y_nl.dims()
            );
        }

        // 1. image -> conv features -> flat
        let h_nf = self.conv.forward(x_nchw)?.flatten_from(1)?;

        // 2. label -> projection
        let h_nl = self.fc_label.forward(y_nl)?.relu()?;

        // 3. [image, label] -> fc -> (mean, lnvar)
        let h_nm = Tensor::cat(&[&h_nf, &h_nl], D::Minus1)?;
        let h_nm = self.fc.forward(&h_nm)?;

        let z_mean_nk = self.z_mean.forward(&h_nm)?;
        let z_lnvar_nk = self.z_lnvar.forward(&h_nm)?.clamp(MIN_LNVAR, MAX_LNVAR)?;
        Ok((z_mean_nk, z_lnvar_nk))
    }

    /// Will create a new conditional encoder module
    /// with these variables:
    ///
    /// * `enc.conv.{}.weight` where {} is the conv layer index
    /// * `enc.label.weight`
    /// * `enc.fc.{}.weight` where {} is the dense layer index
    /// * `enc.z.mean.weight`
    /// * `enc.z.lnvar.weight`
    ///
    /// Every convolution halves the image side (3x3, stride 2).
    pub fn new(args: ConditionalConvEncoderArgs, vs: VarBuilder) -> Result<Self> {
        let n_down = args.conv_channels.len();

        if args.image_side == 0 || args.image_side % (1 << n_down) != 0 {
            candle_core::bail!(
                "image side {} is not divisible by 2^{}",
                args.image_side,
                n_down
            );
        }

        // (1) image -> conv
        let conv_config = candle_nn::Conv2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };

        let mut conv = StackLayers::<Conv2d>::new();
        let mut prev_ch = args.in_channels;
        for (j, &next_ch) in args.conv_channels.iter().enumerate() {
            let _name = format!("enc.conv.{}", j);
            conv.push_with_act(
                candle_nn::conv2d(prev_ch, next_ch, 3, conv_config, vs.pp(_name))?,
                Activation::Relu,
            );
            prev_ch = next_ch;
        }

        let side = args.image_side >> n_down;
        let d_image = prev_ch * side * side;

        // (2) label -> hidden
        let fc_label = candle_nn::linear(args.n_classes, args.label_hidden, vs.pp("enc.label"))?;

        // (3) concat -> fc -> K
        let (fc, d_hidden) = dense_stack(
            d_image + args.label_hidden,
            args.layers,
            Activation::Relu,
            vs.pp("enc.fc"),
        )?;

        let z_mean = candle_nn::linear(d_hidden, args.n_latent, vs.pp("enc.z.mean"))?;
        let z_lnvar = candle_nn::linear(d_hidden, args.n_latent, vs.pp("enc.z.lnvar"))?;

        Ok(Self {
            image_side: args.image_side,
            in_channels: args.in_channels,
            n_classes: args.n_classes,
            n_latent: args.n_latent,
            conv,
            fc_label,
            fc,
            z_mean,
            z_lnvar,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle_data_loader::one_hot;
    use candle_core::{DType, Device};

    fn make_encoder(side: usize, varmap: &candle_nn::VarMap) -> ConditionalConvEncoder {
        let dev = Device::Cpu;
        let vs = VarBuilder::from_varmap(varmap, DType::F32, &dev);
        ConditionalConvEncoder::new(
            ConditionalConvEncoderArgs {
                image_side: side,
                in_channels: 1,
                n_classes: 10,
                n_latent: 2,
                conv_channels: &[4, 8],
                label_hidden: 16,
                layers: &[16],
            },
            vs,
        )
        .unwrap()
    }

    #[test]
    fn latent_params_have_latent_dim() -> Result<()> {
        let varmap = candle_nn::VarMap::new();
        let enc = make_encoder(8, &varmap);
        let dev = Device::Cpu;

        let x = Tensor::rand(0f32, 1f32, (5, 1, 8, 8), &dev)?;
        let y = one_hot(&[0, 1, 2, 3, 9], 10, &dev).unwrap();
        let (mu, lv) = enc.forward_t(&x, &y, true)?;

        assert_eq!(mu.dims(), &[5, 2]);
        assert_eq!(lv.dims(), &[5, 2]);
        assert_eq!(enc.dim_latent(), 2);
        assert_eq!(enc.dim_obs(), 64);
        assert!(lv.max_all()?.to_scalar::<f32>()? <= MAX_LNVAR as f32);
        Ok(())
    }

    #[test]
    fn mnist_sized_encoder_builds() -> Result<()> {
        let varmap = candle_nn::VarMap::new();
        let enc = make_encoder(28, &varmap);
        let dev = Device::Cpu;
        let x = Tensor::zeros((2, 1, 28, 28), DType::F32, &dev)?;
        let y = one_hot(&[3, 7], 10, &dev).unwrap();
        let (mu, _) = enc.forward_t(&x, &y, false)?;
        assert_eq!(mu.dims(), &[2, 2]);
        Ok(())
    }

    #[test]
    fn label_changes_the_latent_mean() -> Result<()> {
        let varmap = candle_nn::VarMap::new();
        let enc = make_encoder(8, &varmap);
        let dev = Device::Cpu;
        let x = Tensor::ones((2, 1, 8, 8), DType::F32, &dev)?;
        let y = one_hot(&[1, 5], 10, &dev).unwrap();
        let (mu, _) = enc.forward_t(&x, &y, false)?;
        let mu = mu.to_vec2::<f32>()?;
        assert_ne!(mu[0], mu[1]);
        Ok(())
    }

    #[test]
    fn wrong_image_shape_is_an_error() {
        let varmap = candle_nn::VarMap::new();
        let enc = make_encoder(8, &varmap);
        let dev = Device::Cpu;
        let x = Tensor::zeros((2, 1, 4, 4), DType::F32, &dev).unwrap();
        let y = one_hot(&[1, 5], 10, &dev).unwrap();
        assert!(enc.forward_t(&x, &y, false).is_err());

        let x = Tensor::zeros((2, 64), DType::F32, &dev).unwrap();
        assert!(enc.forward_t(&x, &y, false).is_err());
    }

    #[test]
    fn indivisible_side_is_rejected() {
        let varmap = candle_nn::VarMap::new();
        let dev = Device::Cpu;
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = ConditionalConvEncoder::new(
            ConditionalConvEncoderArgs {
                image_side: 10,
                in_channels: 1,
                n_classes: 10,
                n_latent: 2,
                conv_channels: &[4, 8],
                label_hidden: 16,
                layers: &[16],
            },
            vs,
        );
        assert!(enc.is_err());
    }
}
