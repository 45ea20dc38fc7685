//! Trains an auxiliary-conditioned radiance field, or renders a trained one.

use auxnerf::{
    backend::{Autodiff, Wgpu, WgpuDevice},
    error::Error,
    train::NerfTrainerConfig,
};
use clap::Parser;
use std::{fs, path::PathBuf};

#[derive(Debug, Parser)]
#[command(name = "auxnerf")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the trainer configuration in JSON
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the experiment name
    #[arg(long)]
    exp_name: Option<String>,

    /// Overrides the dataset directory
    #[arg(long)]
    data_dir: Option<String>,

    /// Render from the restored state without training
    #[arg(long)]
    render_only: bool,

    /// Render the test views instead of the video path
    #[arg(long)]
    render_test: bool,
}

fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => serde_json::from_str::<NerfTrainerConfig>(&fs::read_to_string(path)?)?,
        None => NerfTrainerConfig::default(),
    };
    if let Some(exp_name) = args.exp_name {
        config.exp_name = exp_name;
    }
    if let Some(data_dir) = args.data_dir {
        config.dataset.data_dir = data_dir;
    }

    let dataset = config.dataset.load()?;
    let device = WgpuDevice::default();
    let mut trainer = config.init::<Autodiff<Wgpu>>(&dataset, &device)?;

    if args.render_only {
        trainer.render_only(&dataset, args.render_test)?;
        return Ok(());
    }
    trainer.train(&dataset)
}
