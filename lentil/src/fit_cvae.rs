use lentil::cvae_config::CvaeConfig;
use lentil::lentil_common::*;
use lentil::mnist_io::{read_mnist, MnistSplit};
use lentil::simulate::{simulate_toy_digits, ToyDigitArgs};
use lentil::snapshot::save_snapshot;

use crate::ComputeDevice;

use candle_util::candle_cvae_inference::*;
use candle_util::candle_data_loader::LabeledImageData;
use candle_util::candle_inference::TrainConfig;
use clap::Args;
use std::io::Write;

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(
        long,
        help = "MNIST directory",
        long_help = "Directory with the MNIST IDX files:\n\
		     train-images-idx3-ubyte, train-labels-idx1-ubyte,\n\
		     t10k-images-idx3-ubyte, t10k-labels-idx1-ubyte\n\
		     (each may also be gzipped with a `.gz` suffix)."
    )]
    data_dir: Option<Box<str>>,

    #[arg(
        long,
        default_value_t = false,
        conflicts_with = "data_dir",
        help = "Train on simulated stroke images",
        long_help = "Train on simulated stroke images instead of MNIST.\n\
		     Each class draws a bar at its own position;\n\
		     useful for a quick check of the whole pipeline."
    )]
    toy: bool,

    #[arg(
        long,
        default_value_t = 2000,
        help = "Number of simulated images",
        long_help = "Number of simulated training images with --toy.\n\
		     A quarter as many are simulated for validation."
    )]
    toy_samples: usize,

    #[arg(
        long,
        help = "Maximum number of images per split",
        long_help = "Read at most this many images from each MNIST split.\n\
		     If not specified, all images are used."
    )]
    max_samples: Option<usize>,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\
		     - {out}.config.json\n\
		     - {out}.encoder.safetensors\n\
		     - {out}.decoder.safetensors\n\
		     - {out}.loss.tsv\n"
    )]
    out: Box<str>,

    #[arg(
        long,
        short = 'k',
        default_value_t = 2,
        help = "Latent dimension",
        long_help = "Dimension of the latent space.\n\
		     `lentil generate` takes two coordinates, so keep 2\n\
		     unless you only need `lentil sample`."
    )]
    latent_dim: usize,

    #[arg(
        long,
        value_delimiter(','),
        default_values_t = vec![32, 64],
        help = "Convolution channels",
        long_help = "Channels of the stride-2 convolutions (comma-separated).\n\
		     The decoder upsamples through the same channels in reverse.\n\
		     Example: 32,64"
    )]
    conv_channels: Vec<usize>,

    #[arg(
        long,
        default_value_t = 16,
        help = "Label projection dimension",
        long_help = "Size of the dense layer applied to the one-hot label\n\
		     before it joins the image features in the encoder."
    )]
    label_hidden: usize,

    #[arg(
        long,
        short = 'e',
        value_delimiter(','),
        default_values_t = vec![16],
        help = "Encoder layers",
        long_help = "Dense layers between the joint features and the\n\
		     latent mean/log-variance heads (comma-separated)."
    )]
    encoder_layers: Vec<usize>,

    #[arg(
        long,
        short = 'd',
        value_delimiter(','),
        help = "Decoder layers",
        long_help = "Dense layers between [z, label] and the first feature map\n\
		     (comma-separated). None by default."
    )]
    decoder_layers: Vec<usize>,

    #[arg(
        long,
        short = 'i',
        default_value_t = 30,
        help = "Number of training epochs",
        long_help = "Number of training epochs.\n\
		     Controls how many times the model is trained over the data."
    )]
    epochs: usize,

    #[arg(
        long,
        default_value_t = 128,
        help = "Minibatch size",
        long_help = "Minibatch size for training.\n\
		     Controls the number of samples per training batch."
    )]
    minibatch_size: usize,

    #[arg(
        long,
        default_value_t = 1e-3,
        help = "Learning rate",
        long_help = "Learning rate for optimization.\n\
		     Controls the step size for parameter updates."
    )]
    learning_rate: f32,

    #[arg(
        long,
        default_value_t = 0.0,
        help = "Weight decay",
        long_help = "Decoupled weight decay of the optimizer.\n\
		     0 leaves plain Adam updates."
    )]
    weight_decay: f32,

    #[arg(
        long,
        default_value_t = 1.0,
        help = "Weight of the KL term",
        long_help = "Weight of the KL divergence in the total loss.\n\
		     1 gives the standard VAE objective; larger values\n\
		     trade reconstruction for a smoother latent space."
    )]
    kl_weight: f64,

    #[arg(
        long,
        help = "Convergence tolerance",
        long_help = "Stop once the relative change of the epoch loss\n\
		     falls below this value. Runs all epochs if not specified."
    )]
    tolerance: Option<f32>,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(
        long,
        value_enum,
        default_value = "cpu",
        help = "Candle device",
        long_help = "Candle device to use for computation.\n\
		     Options: cpu, cuda, metal."
    )]
    device: ComputeDevice,

    #[arg(
        long,
        default_value_t = 0,
        help = "A device for cuda",
        long_help = "For cuda or metal, we may want to choose a different device."
    )]
    device_no: usize,

    #[arg(
        long,
        short,
        help = "Verbosity",
        long_help = "Enable verbose output.\n\
		     Prints the losses of every epoch."
    )]
    verbose: bool,
}

fn read_training_data(
    args: &TrainArgs,
    config: &CvaeConfig,
) -> anyhow::Result<(MnistSplit, MnistSplit)> {
    if args.toy {
        let train = simulate_toy_digits(
            &ToyDigitArgs {
                n_samples: args.toy_samples,
                image_side: config.image_side,
                n_classes: config.n_classes,
                seed: args.seed,
            },
            &Device::Cpu,
        )?;
        let valid = simulate_toy_digits(
            &ToyDigitArgs {
                n_samples: (args.toy_samples / 4).max(1),
                image_side: config.image_side,
                n_classes: config.n_classes,
                seed: args.seed.wrapping_add(1),
            },
            &Device::Cpu,
        )?;
        info!("Simulated {} + {} stroke images", train.len(), valid.len());
        return Ok((train, valid));
    }

    let data_dir = args
        .data_dir
        .as_deref()
        .ok_or(anyhow::anyhow!("need either --data-dir or --toy"))?;

    read_mnist(std::path::Path::new(data_dir), args.max_samples, &Device::Cpu)
}

fn write_loss_trace(trace: &TrainTrace, file: &str) -> anyhow::Result<()> {
    let mut buf = std::io::BufWriter::new(std::fs::File::create(file)?);
    writeln!(buf, "epoch\tsplit\ttotal\treconstruction\tkl")?;
    for (split, records) in [("train", &trace.train), ("valid", &trace.valid)] {
        for r in records.iter() {
            writeln!(
                buf,
                "{}\t{}\t{}\t{}\t{}",
                r.epoch, split, r.total, r.recon, r.kl
            )?;
        }
    }
    buf.flush()?;
    Ok(())
}

pub fn fit_cvae(args: &TrainArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let dev = args.device.to_device(args.device_no)?;

    let config = CvaeConfig {
        latent_dim: args.latent_dim,
        conv_channels: args.conv_channels.clone(),
        label_hidden: args.label_hidden,
        encoder_layers: args.encoder_layers.clone(),
        decoder_layers: args.decoder_layers.clone(),
        ..Default::default()
    };
    config.validate()?;

    // 1. data
    let (train, valid) = read_training_data(args, &config)?;
    let (_, _, rows, cols) = train.images.dims4()?;
    if rows != config.image_side || cols != config.image_side {
        return Err(anyhow::anyhow!(
            "expected {}x{} images, found {}x{}",
            config.image_side,
            config.image_side,
            rows,
            cols
        ));
    }

    let mut train_data =
        LabeledImageData::new(train.images, &train.labels, config.n_classes, args.seed)?;
    let mut valid_data = LabeledImageData::new(
        valid.images,
        &valid.labels,
        config.n_classes,
        args.seed.wrapping_add(1),
    )?;

    // 2. model
    let encoder_vars = VarMap::new();
    let decoder_vars = VarMap::new();
    let encoder =
        config.build_encoder(VarBuilder::from_varmap(&encoder_vars, DType::F32, &dev))?;
    let decoder =
        config.build_decoder(VarBuilder::from_varmap(&decoder_vars, DType::F32, &dev))?;

    info!(
        "image: {} -> encoder -> latent: {} -> decoder -> image: {}",
        config.dim_obs(),
        config.latent_dim,
        config.dim_obs()
    );

    // 3. training
    let train_config = TrainConfig {
        learning_rate: args.learning_rate,
        weight_decay: args.weight_decay,
        batch_size: args.minibatch_size,
        num_epochs: args.epochs,
        kl_weight: args.kl_weight,
        seed: args.seed,
        tolerance: args.tolerance,
        device: dev.clone(),
        verbose: args.verbose,
        show_progress: true,
    };

    let mut vae = ConditionalVae::build(&encoder, &decoder, &[&encoder_vars, &decoder_vars])?;
    let trace = vae.train_encoder_decoder(&mut train_data, Some(&mut valid_data), &train_config)?;

    if let (Some(first), Some(last)) = (trace.train.first(), trace.train.last()) {
        info!(
            "training loss {:.4} -> {:.4} over {} epochs ({:?})",
            first.total,
            last.total,
            trace.train.len(),
            vae.state()
        );
    }
    if vae.state() != TrainState::Converged && args.tolerance.is_some() {
        warn!("did not converge within {} epochs", args.epochs);
    }

    // 4. outputs
    save_snapshot(&args.out, &config, &encoder_vars, &decoder_vars)?;
    write_loss_trace(&trace, &format!("{}.loss.tsv", args.out))?;

    Ok(())
}
