//! Patch extraction and normalization.
//!
//! Training never sees whole shapes. Seed points are spread over the base
//! cloud with farthest point sampling, a k-nearest patch is cut around each
//! seed at every resolution level, and the whole stack is normalized into
//! the unit sphere with one transform so predictions can be mapped back.

use std::f32::consts::TAU;

use nalgebra::{Rotation3, Vector3};
use ndarray::{Array2, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::config::CascadeConfig;
use crate::error::Result;
use crate::ops::{grouping, sampling};

/// Centroid shift and uniform scale that carried a patch into the unit
/// sphere. Inverting it places predictions back into shape coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchTransform {
    pub centroid: [f32; 3],
    pub scale: f32,
}

impl PatchTransform {
    pub fn apply(&self, point: [f32; 3]) -> [f32; 3] {
        [
            (point[0] - self.centroid[0]) / self.scale,
            (point[1] - self.centroid[1]) / self.scale,
            (point[2] - self.centroid[2]) / self.scale,
        ]
    }

    pub fn invert(&self, point: [f32; 3]) -> [f32; 3] {
        [
            point[0] * self.scale + self.centroid[0],
            point[1] * self.scale + self.centroid[1],
            point[2] * self.scale + self.centroid[2],
        ]
    }
}

/// Center a cloud on its centroid and scale it into the unit sphere.
pub fn normalize(points: &[[f32; 3]]) -> (Vec<[f32; 3]>, PatchTransform) {
    let flat: Vec<f32> = points.iter().flatten().copied().collect();
    let mut cloud = Array2::from_shape_vec((points.len(), 3), flat)
        .expect("cloud buffer matches its point count");
    let centroid = cloud
        .mean_axis(Axis(0))
        .expect("normalize is never called on an empty cloud");
    cloud -= &centroid;
    let scale = cloud
        .rows()
        .into_iter()
        .map(|row| row.dot(&row).sqrt())
        .fold(0.0f32, f32::max);
    // a degenerate single-point patch keeps unit scale
    let scale = if scale > 0.0 { scale } else { 1.0 };
    cloud /= scale;

    let normalized = cloud
        .into_raw_vec_and_offset()
        .0
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect();
    let transform = PatchTransform {
        centroid: [centroid[0], centroid[1], centroid[2]],
        scale,
    };
    (normalized, transform)
}

/// One training patch: the normalized input plus one ground-truth cloud per
/// cascade stage, all under the same transform.
#[derive(Debug, Clone)]
pub struct PatchSet {
    pub input: Vec<[f32; 3]>,
    pub targets: Vec<Vec<[f32; 3]>>,
    pub transform: PatchTransform,
}

/// Cut `count` patches from a shape stored at every cascade resolution.
///
/// `levels` is coarsest first; level `l` contributes a patch of
/// `num_point · r1 · … · rl` points around the same seed, so each cascade
/// stage gets a target at exactly its output density.
pub fn extract_patches(
    levels: &[Vec<[f32; 3]>],
    cascade: &CascadeConfig,
    count: usize,
    seed: usize,
) -> Result<Vec<PatchSet>> {
    let counts = cascade.level_counts();
    debug_assert_eq!(levels.len(), counts.len());

    let base = &levels[0];
    let seed_indices = sampling::farthest_point_indices(base, count, seed)?;

    let mut patches = Vec::with_capacity(count);
    for &seed_index in &seed_indices {
        let anchor = [base[seed_index]];
        let input_idx = grouping::knn_indices(&anchor, base, counts[0]);
        let raw_input = sampling::gather(base, &input_idx);
        let (input, transform) = normalize(&raw_input);

        let mut targets = Vec::with_capacity(levels.len() - 1);
        for (level, &level_count) in levels.iter().zip(&counts).skip(1) {
            let idx = grouping::knn_indices(&anchor, level, level_count);
            let target = sampling::gather(level, &idx)
                .into_iter()
                .map(|p| transform.apply(p))
                .collect();
            targets.push(target);
        }
        patches.push(PatchSet {
            input,
            targets,
            transform,
        });
    }
    Ok(patches)
}

/// Training-time augmentation: a shared random rotation and uniform scale
/// over the whole patch stack, plus clipped Gaussian jitter on the input
/// only. Targets stay clean so the loss pulls toward the true surface.
#[derive(Debug, Clone)]
pub struct Augmentor {
    pub jitter_sigma: f32,
    pub jitter_clip: f32,
    pub scale_low: f32,
    pub scale_high: f32,
}

impl Default for Augmentor {
    fn default() -> Self {
        Self {
            jitter_sigma: 0.005,
            jitter_clip: 0.015,
            scale_low: 0.8,
            scale_high: 1.2,
        }
    }
}

impl Augmentor {
    pub fn apply<R: Rng>(&self, patch: &mut PatchSet, rng: &mut R) {
        let rotation = Rotation3::from_euler_angles(
            rng.random_range(0.0..TAU),
            rng.random_range(0.0..TAU),
            rng.random_range(0.0..TAU),
        );
        let scale: f32 = rng.random_range(self.scale_low..self.scale_high);

        let rotate = |p: &mut [f32; 3]| {
            let v = rotation * Vector3::new(p[0], p[1], p[2]) * scale;
            *p = [v.x, v.y, v.z];
        };
        patch.input.iter_mut().for_each(rotate);
        for target in &mut patch.targets {
            target.iter_mut().for_each(rotate);
        }

        let normal = Normal::new(0.0, self.jitter_sigma)
            .expect("jitter sigma is a positive constant");
        for p in &mut patch.input {
            for value in p.iter_mut() {
                let noise: f32 = normal.sample(rng);
                *value += noise.clamp(-self.jitter_clip, self.jitter_clip);
            }
        }
    }
}
