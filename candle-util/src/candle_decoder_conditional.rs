use crate::candle_aux_layers::{dense_stack, StackLayers};
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor, D};
use candle_nn::{ops, Activation, ConvTranspose2d, Linear, Module, VarBuilder};

pub struct ConditionalConvDecoder {
    image_side: usize,
    out_channels: usize,
    n_classes: usize,
    n_latent: usize,
    seed_channels: usize,
    seed_side: usize,
    fc: StackLayers<Linear>,
    fc_seed: Linear,
    deconv: StackLayers<ConvTranspose2d>,
    out: ConvTranspose2d,
}

pub struct ConditionalConvDecoderArgs<'a> {
    pub image_side: usize,
    pub out_channels: usize,
    pub n_classes: usize,
    pub n_latent: usize,
    pub conv_channels: &'a [usize],
    pub layers: &'a [usize],
}

impl ConditionalDecoderModuleT for ConditionalConvDecoder {
    fn forward(&self, z_nk: &Tensor, y_nl: &Tensor) -> Result<Tensor> {
        let (n, k) = z_nk.dims2()?;
        let (ny, l) = y_nl.dims2()?;

        if k != self.n_latent || ny != n || l != self.n_classes {
            candle_core::bail!(
                "decoder expects (n, {}) latent and (n, {}) labels, got {:?} and {:?}",
                self.n_latent,
                self.n_classes,
                z_nk.dims(),
                y_nl.dims()
            );
        }

        // 1. [z, y] -> fc -> seed feature map
        let h_nm = Tensor::cat(&[z_nk, y_nl], D::Minus1)?;
        let h_nm = self.fc.forward(&h_nm)?;
        let h_nchw = self.fc_seed.forward(&h_nm)?.relu()?.reshape((
            n,
            self.seed_channels,
            self.seed_side,
            self.seed_side,
        ))?;

        // 2. upsample back to the image side
        let h_nchw = self.deconv.forward(&h_nchw)?;

        // 3. per-pixel probability
        ops::sigmoid(&self.out.forward(&h_nchw)?)
    }

    fn dim_obs(&self) -> usize {
        self.out_channels * self.image_side * self.image_side
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }

    fn dim_label(&self) -> usize {
        self.n_classes
    }
}

impl ConditionalConvDecoder {
    pub fn image_side(&self) -> usize {
        self.image_side
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Will create a new conditional decoder module
    /// with these variables:
    ///
    /// * `dec.fc.{}.weight` where {} is the dense layer index
    /// * `dec.seed.weight`
    /// * `dec.deconv.{}.weight` where {} is the upsampling index
    /// * `dec.out.weight`
    ///
    /// Every transposed convolution doubles the side (4x4, stride 2);
    /// the output layer keeps it (3x3, stride 1).
    pub fn new(args: ConditionalConvDecoderArgs, vs: VarBuilder) -> Result<Self> {
        let n_up = args.conv_channels.len();

        if args.image_side == 0 || args.image_side % (1 << n_up) != 0 {
            candle_core::bail!(
                "image side {} is not divisible by 2^{}",
                args.image_side,
                n_up
            );
        }

        let seed_side = args.image_side >> n_up;
        let seed_channels = args.conv_channels.first().copied().unwrap_or(args.out_channels);

        // (1) [z, y] -> fc -> seed
        let (fc, d_hidden) = dense_stack(
            args.n_latent + args.n_classes,
            args.layers,
            Activation::Relu,
            vs.pp("dec.fc"),
        )?;

        let fc_seed = candle_nn::linear(
            d_hidden,
            seed_channels * seed_side * seed_side,
            vs.pp("dec.seed"),
        )?;

        // (2) seed -> upsampling
        let up_config = candle_nn::ConvTranspose2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };

        let mut deconv = StackLayers::<ConvTranspose2d>::new();
        let mut prev_ch = seed_channels;
        for (j, &next_ch) in args.conv_channels.iter().enumerate() {
            let _name = format!("dec.deconv.{}", j);
            deconv.push_with_act(
                candle_nn::conv_transpose2d(prev_ch, next_ch, 4, up_config, vs.pp(_name))?,
                Activation::Relu,
            );
            prev_ch = next_ch;
        }

        // (3) -> output channels
        let out_config = candle_nn::ConvTranspose2dConfig {
            padding: 1,
            stride: 1,
            ..Default::default()
        };
        let out = candle_nn::conv_transpose2d(
            prev_ch,
            args.out_channels,
            3,
            out_config,
            vs.pp("dec.out"),
        )?;

        Ok(Self {
            image_side: args.image_side,
            out_channels: args.out_channels,
            n_classes: args.n_classes,
            n_latent: args.n_latent,
            seed_channels,
            seed_side,
            fc,
            fc_seed,
            deconv,
            out,
        })
    }
}
