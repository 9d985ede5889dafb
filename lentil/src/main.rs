mod fit_cvae;
mod generate_digit;

use fit_cvae::*;
use generate_digit::*;

use clap::{Parser, Subcommand, ValueEnum};
use lentil::lentil_common::*;

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    pub fn to_device(&self, device_no: usize) -> anyhow::Result<Device> {
        Ok(match self {
            ComputeDevice::Metal => Device::new_metal(device_no)?,
            ComputeDevice::Cuda => Device::new_cuda(device_no)?,
            ComputeDevice::Cpu => Device::Cpu,
        })
    }
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LENTIL",
    long_about = "Latent ENcoding To Image Labels\n\
		  A conditional variational autoencoder for handwritten digits:\n\
		  train it on MNIST, then draw any digit from a point in its latent space."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Train a conditional VAE",
        long_about = "Train a conditional VAE in the three stages: \n\
		      (1) Read MNIST (or simulate stroke images)\n\
		      (2) Estimate encoder-decoder architecture via SGD\n\
		      (3) Save the architecture and both parameter sets.\n"
    )]
    Train(TrainArgs),

    #[command(
        about = "Draw a digit from a latent point",
        long_about = "Decode one point (x, y) of the latent space for a digit label.\n\
		      Only the decoder runs; the same inputs give the same image.\n"
    )]
    Generate(GenerateArgs),

    #[command(
        about = "Draw random digits",
        long_about = "Sample latent points from N(0, I) and decode them\n\
		      for one digit label.\n"
    )]
    Sample(SampleArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Train(args) => {
            fit_cvae(args)?;
        }
        Commands::Generate(args) => {
            generate_digit(args)?;
        }
        Commands::Sample(args) => {
            sample_digits(args)?;
        }
    }

    info!("Done");
    Ok(())
}
