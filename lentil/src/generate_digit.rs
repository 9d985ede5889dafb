use lentil::generator::DigitGenerator;
use lentil::grid_io::*;
use lentil::lentil_common::*;
use lentil::snapshot::mkdir_parent;

use crate::ComputeDevice;

use candle_util::candle_reparameterize::GaussianNoise;
use clap::Args;
use std::path::Path;

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[arg(
        long,
        short,
        required = true,
        help = "Model header",
        long_help = "Output header of `lentil train`.\n\
		     Reads {model}.config.json and {model}.decoder.safetensors."
    )]
    model: Box<str>,

    #[arg(
        short = 'x',
        long,
        default_value_t = 0.0,
        allow_negative_numbers = true,
        help = "First latent coordinate"
    )]
    latent_x: f32,

    #[arg(
        short = 'y',
        long,
        default_value_t = 0.0,
        allow_negative_numbers = true,
        help = "Second latent coordinate"
    )]
    latent_y: f32,

    #[arg(
        short = 'l',
        long,
        required = true,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i64).range(0..NUM_DIGITS as i64),
        help = "Digit label",
        long_help = "Digit to draw, from 0 to 9."
    )]
    digit_label: i64,

    #[arg(
        long,
        short,
        help = "Output file",
        long_help = "Write the probability grid to this file as tab-separated\n\
		     rows (gzipped if it ends with `.gz`).\n\
		     Without it, only an ASCII preview is printed."
    )]
    out: Option<Box<str>>,

    #[arg(
        long,
        value_enum,
        default_value = "cpu",
        help = "Candle device",
        long_help = "Candle device to use for computation.\n\
		     Options: cpu, cuda, metal."
    )]
    device: ComputeDevice,

    #[arg(long, default_value_t = 0, help = "A device for cuda")]
    device_no: usize,

    #[arg(long, short, help = "Verbosity")]
    verbose: bool,
}

#[derive(Args, Debug)]
pub struct SampleArgs {
    #[arg(
        long,
        short,
        required = true,
        help = "Model header",
        long_help = "Output header of `lentil train`.\n\
		     Reads {model}.config.json and {model}.decoder.safetensors."
    )]
    model: Box<str>,

    #[arg(
        short = 'l',
        long,
        required = true,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i64).range(0..NUM_DIGITS as i64),
        help = "Digit label",
        long_help = "Digit to draw, from 0 to 9."
    )]
    digit_label: i64,

    #[arg(
        short = 'n',
        long,
        default_value_t = 10,
        help = "Number of samples",
        long_help = "Number of latent points drawn from N(0, I)."
    )]
    num_samples: usize,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(
        long,
        short,
        required = true,
        help = "Output file",
        long_help = "One row per sample: label, latent coordinates and pixels,\n\
		     tab-separated (gzipped if it ends with `.gz`)."
    )]
    out: Box<str>,

    #[arg(
        long,
        value_enum,
        default_value = "cpu",
        help = "Candle device",
        long_help = "Candle device to use for computation.\n\
		     Options: cpu, cuda, metal."
    )]
    device: ComputeDevice,

    #[arg(long, default_value_t = 0, help = "A device for cuda")]
    device_no: usize,

    #[arg(long, short, help = "Verbosity")]
    verbose: bool,
}

pub fn generate_digit(args: &GenerateArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let dev = args.device.to_device(args.device_no)?;
    let generator = DigitGenerator::load(&args.model, &dev)?;

    let image = generator.generate(args.latent_x, args.latent_y, args.digit_label)?;

    println!("{}", ascii_preview(&image));

    if let Some(out) = args.out.as_deref() {
        mkdir_parent(out)?;
        write_grid_tsv(&image, Path::new(out))?;
        info!("Wrote {}x{} grid to {}", image.side(), image.side(), out);
    }
    Ok(())
}

pub fn sample_digits(args: &SampleArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let dev = args.device.to_device(args.device_no)?;
    let generator = DigitGenerator::load(&args.model, &dev)?;

    let mut noise = GaussianNoise::new(args.seed);
    let samples = generator.sample(args.digit_label, args.num_samples, &mut noise)?;

    if let Some(first) = samples.first() {
        info!("First sample at {:?}:\n{}", first.latent, ascii_preview(&first.image));
    }

    mkdir_parent(&args.out)?;
    write_samples_tsv(&samples, args.digit_label, Path::new(&*args.out))?;
    info!("Wrote {} samples to {}", samples.len(), args.out);
    Ok(())
}
