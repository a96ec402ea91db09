use std::path::Path;

use burn::data::dataloader::DataLoaderBuilder;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::cast::ToElement;

use crate::config::CascadeConfig;
use crate::data::{Augmentor, PatchBatcher, PatchDataset};
use crate::error::Error;
use crate::model::{PatchUpsampler, ProgressiveLossConfig, UpsamplerConfig};
use crate::monitor::Monitor;

#[derive(Config)]
pub struct TrainingConfig {
    pub model: UpsamplerConfig,
    pub optimizer: AdamConfig,
    pub loss: ProgressiveLossConfig,
    #[config(default = 80)]
    pub num_epochs: usize,
    #[config(default = 8)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1.0e-4)]
    pub learning_rate: f64,
    /// Patches cut per shape and epoch set; seeds are spread with farthest
    /// point sampling so patches cover the whole surface.
    #[config(default = 24)]
    pub patches_per_shape: usize,
}

impl TrainingConfig {
    fn cascade(&self) -> &CascadeConfig {
        &self.model.cascade
    }
}

fn create_artifact_dir(artifact_dir: &str) {
    std::fs::remove_dir_all(artifact_dir).ok();
    std::fs::create_dir_all(artifact_dir).ok();
}

fn checkpoint_path(artifact_dir: &str) -> String {
    format!("{artifact_dir}/checkpoint")
}

/// Full training driver. Expects `train.bin` and `test.bin` archives under
/// `data_dir`; leaves `config.json` and a model checkpoint in
/// `artifact_dir`. With `resume`, continues from the existing checkpoint
/// instead of starting fresh.
pub fn train<B: AutodiffBackend>(
    artifact_dir: &str,
    data_dir: &Path,
    config: TrainingConfig,
    device: B::Device,
    monitor: &Monitor,
    resume: bool,
) -> crate::error::Result<PatchUpsampler<B>> {
    if !resume {
        create_artifact_dir(artifact_dir);
    }
    config
        .save(format!("{artifact_dir}/config.json"))
        .map_err(|e| Error::Config(format!("cannot save config: {e}")))?;

    B::seed(config.seed);

    let mut model = config.model.init::<B>(&device)?;
    // full precision: checkpoints must restore bit-identical parameters
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    if resume {
        let path = checkpoint_path(artifact_dir);
        let record = recorder
            .load(path.clone().into(), &device)
            .map_err(|e| Error::Checkpoint {
                path: path.clone().into(),
                message: e.to_string(),
            })?;
        model = model.load_record(record);
        log::info!("resumed from {path}");
    }

    let train_set = PatchDataset::from_archive(
        &data_dir.join("train.bin"),
        config.cascade(),
        config.patches_per_shape,
        Some(Augmentor::default()),
    )?;
    let valid_set = PatchDataset::from_archive(
        &data_dir.join("test.bin"),
        config.cascade(),
        config.patches_per_shape,
        None,
    )?;

    let dataloader_train = DataLoaderBuilder::new(PatchBatcher::new(config.cascade()))
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(train_set);
    let dataloader_valid = DataLoaderBuilder::new(PatchBatcher::new(config.cascade()))
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(valid_set);

    let mut optim = config.optimizer.init();
    let loss_fn = config.loss.init();

    for epoch in 1..=config.num_epochs {
        let mut train_sum = 0.0;
        let mut train_steps = 0;
        for (step, batch) in dataloader_train.iter().enumerate() {
            let outputs = model.forward(batch.input);
            let loss = loss_fn.forward(&outputs, &batch.targets);
            let loss_value = loss.clone().into_scalar().to_f32();
            if !loss_value.is_finite() {
                return Err(Error::NonFiniteLoss { epoch, step });
            }

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(config.learning_rate, model, grads);

            train_sum += loss_value;
            train_steps += 1;
            log::debug!("epoch {epoch} step {step}: loss {loss_value:.6}");
        }

        let valid_model = model.valid();
        let mut valid_sum = 0.0;
        let mut valid_steps = 0;
        for batch in dataloader_valid.iter() {
            let outputs = valid_model.forward(batch.input);
            let loss = loss_fn.forward(&outputs, &batch.targets);
            valid_sum += loss.into_scalar().to_f32();
            valid_steps += 1;
        }

        let train_avg = train_sum / train_steps.max(1) as f32;
        let valid_avg = valid_sum / valid_steps.max(1) as f32;
        log::info!(
            "epoch {epoch}/{}: train {train_avg:.6}, valid {valid_avg:.6}",
            config.num_epochs
        );
        monitor.scalar("loss/train", epoch, train_avg);
        monitor.scalar("loss/valid", epoch, valid_avg);

        let path = checkpoint_path(artifact_dir);
        model
            .clone()
            .save_file(path.clone(), &recorder)
            .map_err(|e| Error::Checkpoint {
                path: path.into(),
                message: e.to_string(),
            })?;
    }

    Ok(model)
}
