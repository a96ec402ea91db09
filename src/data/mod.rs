mod archive;
mod patches;
mod xyz;

pub use archive::{ShapeRecord, TrainingArchive};
pub use patches::{Augmentor, PatchSet, extract_patches, normalize};
pub use xyz::{read_xyz, write_xyz};

use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;

use crate::config::CascadeConfig;
use crate::error::{Error, Result};

/// One flattened patch as handed to the dataloader: `x y z` triples for the
/// input and for every stage target.
#[derive(Debug, Clone)]
pub struct PatchItem {
    pub input: Vec<f32>,
    pub targets: Vec<Vec<f32>>,
}

fn flatten(points: &[[f32; 3]]) -> Vec<f32> {
    points.iter().flatten().copied().collect()
}

/// In-memory dataset of pre-cut patches. Augmentation, when configured,
/// is applied per `get` so every epoch sees a fresh pose of each patch.
pub struct PatchDataset {
    patches: Vec<PatchSet>,
    augmentor: Option<Augmentor>,
}

impl PatchDataset {
    pub fn from_archive(
        path: &Path,
        cascade: &CascadeConfig,
        patches_per_shape: usize,
        augmentor: Option<Augmentor>,
    ) -> Result<Self> {
        let archive = TrainingArchive::load(path)?;
        archive.validate_against(cascade, path)?;

        let mut patches = Vec::new();
        for (index, shape) in archive.shapes.iter().enumerate() {
            let levels = archive.shape_levels(index);
            let count = patches_per_shape.min(levels[0].len());
            let mut cut = extract_patches(&levels, cascade, count, index)?;
            log::debug!("shape {:?}: {} patches", shape.name, cut.len());
            patches.append(&mut cut);
        }
        if patches.is_empty() {
            return Err(Error::EmptyPointSet(path.display().to_string()));
        }
        log::info!(
            "loaded {} patches from {} shapes in {}",
            patches.len(),
            archive.shapes.len(),
            path.display()
        );
        Ok(Self { patches, augmentor })
    }

    #[cfg(test)]
    pub fn from_patches(patches: Vec<PatchSet>, augmentor: Option<Augmentor>) -> Self {
        Self { patches, augmentor }
    }
}

impl Dataset<PatchItem> for PatchDataset {
    fn get(&self, index: usize) -> Option<PatchItem> {
        let mut patch = self.patches.get(index)?.clone();
        if let Some(augmentor) = &self.augmentor {
            augmentor.apply(&mut patch, &mut rand::rng());
        }
        Some(PatchItem {
            input: flatten(&patch.input),
            targets: patch.targets.iter().map(|t| flatten(t)).collect(),
        })
    }

    fn len(&self) -> usize {
        self.patches.len()
    }
}

/// Stacks flattened patches into `[batch, count, 3]` tensors, one per
/// resolution level.
#[derive(Clone)]
pub struct PatchBatcher {
    num_point: usize,
    target_counts: Vec<usize>,
}

impl PatchBatcher {
    pub fn new(cascade: &CascadeConfig) -> Self {
        Self {
            num_point: cascade.num_point,
            target_counts: cascade.target_counts(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PatchBatch<B: Backend> {
    pub input: Tensor<B, 3>,
    /// One target per cascade stage, densest last.
    pub targets: Vec<Tensor<B, 3>>,
}

impl<B: Backend> Batcher<B, PatchItem, PatchBatch<B>> for PatchBatcher {
    fn batch(&self, items: Vec<PatchItem>, device: &B::Device) -> PatchBatch<B> {
        let batch_size = items.len();

        let mut input = Vec::with_capacity(batch_size * self.num_point * 3);
        let mut targets: Vec<Vec<f32>> = self
            .target_counts
            .iter()
            .map(|&count| Vec::with_capacity(batch_size * count * 3))
            .collect();
        for item in items {
            input.extend_from_slice(&item.input);
            for (buffer, target) in targets.iter_mut().zip(&item.targets) {
                buffer.extend_from_slice(target);
            }
        }

        let input = Tensor::from_data(
            TensorData::new(input, [batch_size, self.num_point, 3]),
            device,
        );
        let targets = targets
            .into_iter()
            .zip(&self.target_counts)
            .map(|(buffer, &count)| {
                Tensor::from_data(TensorData::new(buffer, [batch_size, count, 3]), device)
            })
            .collect();
        PatchBatch { input, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn line_cloud(count: usize) -> Vec<[f32; 3]> {
        (0..count).map(|i| [i as f32, 0.0, 0.0]).collect()
    }

    fn sample_cascade() -> CascadeConfig {
        CascadeConfig::new(2, vec![2], 8)
    }

    fn sample_patches(count: usize) -> Vec<PatchSet> {
        let levels = vec![line_cloud(32), line_cloud(64)];
        extract_patches(&levels, &sample_cascade(), count, 0).unwrap()
    }

    #[test]
    fn dataset_serves_flattened_patches() {
        let dataset = PatchDataset::from_patches(sample_patches(3), None);
        assert_eq!(dataset.len(), 3);
        let item = dataset.get(1).unwrap();
        assert_eq!(item.input.len(), 8 * 3);
        assert_eq!(item.targets.len(), 1);
        assert_eq!(item.targets[0].len(), 16 * 3);
        assert!(dataset.get(3).is_none());
    }

    #[test]
    fn augmented_items_differ_between_reads() {
        let dataset = PatchDataset::from_patches(sample_patches(1), Some(Augmentor::default()));
        let a = dataset.get(0).unwrap();
        let b = dataset.get(0).unwrap();
        assert_ne!(a.input, b.input);
    }

    #[test]
    fn batcher_stacks_per_level_tensors() {
        let dataset = PatchDataset::from_patches(sample_patches(2), None);
        let items = vec![dataset.get(0).unwrap(), dataset.get(1).unwrap()];
        let batcher = PatchBatcher::new(&sample_cascade());
        let batch: PatchBatch<TestBackend> = batcher.batch(items, &Default::default());
        assert_eq!(batch.input.dims(), [2, 8, 3]);
        assert_eq!(batch.targets.len(), 1);
        assert_eq!(batch.targets[0].dims(), [2, 16, 3]);
    }

    #[test]
    fn missing_archive_is_reported() {
        let cascade = sample_cascade();
        let result = PatchDataset::from_archive(
            Path::new("/nonexistent/train.bin"),
            &cascade,
            4,
            None,
        );
        assert!(matches!(result, Err(Error::Archive { .. })));
    }
}
