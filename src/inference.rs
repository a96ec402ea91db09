use std::path::Path;

use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};

use crate::config::CascadeConfig;
use crate::data::{self, normalize};
use crate::error::{Error, Result};
use crate::model::{PatchUpsampler, host_points};
use crate::ops::{grouping, sampling};
use crate::training::TrainingConfig;

/// Average number of patches each input point is covered by. Overlap hides
/// patch seams; the final farthest point pass removes the duplication.
const PATCH_COVER: usize = 3;

/// Upsample one cloud with a trained model: load checkpoint and config from
/// `artifact_dir`, read `input`, write the dense cloud to `output`.
pub fn infer<B: Backend>(
    artifact_dir: &str,
    input: &Path,
    output: &Path,
    device: B::Device,
) -> Result<()> {
    let config = TrainingConfig::load(format!("{artifact_dir}/config.json"))
        .map_err(|e| Error::Config(format!("cannot load training config: {e}")))?;
    let checkpoint = format!("{artifact_dir}/checkpoint");
    let record = NamedMpkFileRecorder::<FullPrecisionSettings>::new()
        .load(checkpoint.clone().into(), &device)
        .map_err(|e| Error::Checkpoint {
            path: checkpoint.into(),
            message: e.to_string(),
        })?;
    let model = config.model.init::<B>(&device)?.load_record(record);
    let cascade = &config.model.cascade;

    let mut shape = data::read_xyz(input)?;
    if shape.len() < cascade.num_point {
        return Err(Error::PatchLargerThanShape {
            num_point: cascade.num_point,
            num_shape_point: shape.len(),
        });
    }
    if shape.len() > cascade.num_shape_point {
        log::info!(
            "downsampling input from {} to {} points",
            shape.len(),
            cascade.num_shape_point
        );
        let idx = sampling::farthest_point_indices(&shape, cascade.num_shape_point, 0)?;
        shape = sampling::gather(&shape, &idx);
    }

    let dense = upsample_cloud(&model, cascade, &shape, config.batch_size, &device)?;
    log::info!(
        "upsampled {} -> {} points, writing {}",
        shape.len(),
        dense.len(),
        output.display()
    );
    data::write_xyz(output, &dense)
}

/// Patch-based whole-shape upsampling.
///
/// Seeds are spread over the shape with farthest point sampling, the patch
/// around each seed is normalized, run through the cascade, mapped back
/// into shape coordinates, and the merged overlap is thinned to exactly
/// `input · up_ratio` points with a final farthest point pass.
pub fn upsample_cloud<B: Backend>(
    model: &PatchUpsampler<B>,
    cascade: &CascadeConfig,
    shape: &[[f32; 3]],
    batch_size: usize,
    device: &B::Device,
) -> Result<Vec<[f32; 3]>> {
    let n = shape.len();
    let num_point = cascade.num_point;
    let seed_count = (n * PATCH_COVER).div_ceil(num_point).clamp(1, n);
    let seed_indices = sampling::farthest_point_indices(shape, seed_count, 0)?;

    // floating-point accumulation order depends on the backend's worker
    // count; one worker keeps repeated runs bitwise identical
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .map_err(|e| Error::Config(format!("cannot build inference pool: {e}")))?;

    let mut inputs = Vec::with_capacity(seed_count);
    let mut transforms = Vec::with_capacity(seed_count);
    for &seed in &seed_indices {
        let idx = grouping::knn_indices(&[shape[seed]], shape, num_point);
        let (patch, transform) = normalize(&sampling::gather(shape, &idx));
        inputs.push(patch);
        transforms.push(transform);
    }

    let up_ratio = cascade.up_ratio;
    let chunk_size = batch_size.max(1);
    let model = model.clone();
    let device = device.clone();
    let merged = pool.install(move || {
        let mut merged = Vec::with_capacity(n * up_ratio);
        for (chunk, chunk_transforms) in
            inputs.chunks(chunk_size).zip(transforms.chunks(chunk_size))
        {
            let batch = batch_tensor::<B>(chunk, num_point, &device);
            let dense = model.upsample(batch);
            for (patch, transform) in host_points(&dense).iter().zip(chunk_transforms) {
                merged.extend(patch.iter().map(|&p| transform.invert(p)));
            }
        }
        merged
    });

    let target = n * cascade.up_ratio;
    let idx = sampling::farthest_point_indices(&merged, target.min(merged.len()), 0)?;
    Ok(sampling::gather(&merged, &idx))
}

fn batch_tensor<B: Backend>(
    patches: &[Vec<[f32; 3]>],
    num_point: usize,
    device: &B::Device,
) -> Tensor<B, 3> {
    let mut flat: Vec<f32> = Vec::with_capacity(patches.len() * num_point * 3);
    for patch in patches {
        flat.extend(patch.iter().flatten().copied());
    }
    Tensor::from_data(TensorData::new(flat, [patches.len(), num_point, 3]), device)
}
