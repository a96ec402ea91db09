#![recursion_limit = "512"]
mod config;
mod data;
mod error;
mod inference;
mod model;
mod monitor;
mod ops;
mod training;

use std::path::PathBuf;

use burn::backend::{Autodiff, Wgpu};
use burn::optim::AdamConfig;
use clap::{Parser, Subcommand};

use crate::config::CascadeConfig;
use crate::error::Result;
use crate::model::{ProgressiveLossConfig, UpsamplerConfig};
use crate::monitor::Monitor;
use crate::training::TrainingConfig;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the upsampler on a directory of training archives.
    Train {
        /// Directory holding train.bin and test.bin archives.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        /// Directory where config and checkpoints are saved.
        #[arg(long, default_value = "artifacts")]
        artifacts: String,
        /// Overall upsampling ratio.
        #[arg(long, default_value_t = 16)]
        up_ratio: usize,
        /// Per-stage expansion ratios; their product must equal up_ratio.
        #[arg(long, value_delimiter = ',', default_value = "2,2,2,2")]
        stage_ratios: Vec<usize>,
        /// Points per input patch.
        #[arg(long, default_value_t = 312)]
        num_point: usize,
        /// Points per whole shape at input resolution.
        #[arg(long, default_value_t = 5000)]
        num_shape_point: usize,
        /// Run name reported to the metric collector.
        #[arg(long, default_value = "default")]
        run_id: String,
        /// Metric collector endpoint, e.g. http://localhost:6006.
        #[arg(long)]
        monitor: Option<String>,
        /// Continue from the checkpoint in the artifact directory.
        #[arg(long)]
        resume: bool,
    },
    /// Upsample one point cloud with a trained model.
    Infer {
        /// Directory holding config and checkpoint from a training run.
        #[arg(long, default_value = "artifacts")]
        artifacts: String,
        /// Input cloud, one x y z triple per line.
        input: PathBuf,
        /// Output path for the dense cloud.
        output: PathBuf,
    },
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    type MyBackend = Wgpu<f32, i32>;
    type MyAutodiffBackend = Autodiff<MyBackend>;

    let cli = Cli::parse();
    let device = burn::backend::wgpu::WgpuDevice::default();

    match cli.command {
        Commands::Train {
            data_dir,
            artifacts,
            up_ratio,
            stage_ratios,
            num_point,
            num_shape_point,
            run_id,
            monitor,
            resume,
        } => {
            let cascade = CascadeConfig::new(up_ratio, stage_ratios, num_point)
                .with_num_shape_point(num_shape_point);
            cascade.validate()?;
            let config = TrainingConfig::new(
                UpsamplerConfig::new(cascade),
                AdamConfig::new(),
                ProgressiveLossConfig::new(),
            );
            let monitor = Monitor::new(monitor, &run_id);

            let start = std::time::Instant::now();
            training::train::<MyAutodiffBackend>(
                &artifacts,
                &data_dir,
                config,
                device,
                &monitor,
                resume,
            )?;
            log::info!("training time: {:?}", start.elapsed());
            Ok(())
        }
        Commands::Infer {
            artifacts,
            input,
            output,
        } => inference::infer::<MyBackend>(&artifacts, &input, &output, device),
    }
}
