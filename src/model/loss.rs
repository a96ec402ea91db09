//! Set-to-set losses for progressive supervision.

use burn::prelude::*;

use crate::ops::grouping;

use super::CascadeOutput;
use super::kernels::{gather_groups, host_points, index_tensor};

/// Pairwise squared distances between two point sets:
/// `a [B, N, 3]`, `b [B, M, 3]` -> `[B, N, M]`.
fn pairwise_squared_distances<B: Backend>(a: &Tensor<B, 3>, b: &Tensor<B, 3>) -> Tensor<B, 3> {
    let ai = a.clone().unsqueeze_dim::<4>(2);
    let bj = b.clone().unsqueeze_dim::<4>(1);
    (ai - bj).powi_scalar(2).sum_dim(3).squeeze::<3>(3)
}

/// Symmetric Chamfer distance over squared nearest-neighbor distances,
/// averaged in both directions. Exactly zero for identical sets.
pub fn chamfer_distance<B: Backend>(pred: &Tensor<B, 3>, target: &Tensor<B, 3>) -> Tensor<B, 1> {
    let distances = pairwise_squared_distances(pred, target);
    let forward = distances.clone().min_dim(2).mean_dim(1);
    let backward = distances.min_dim(1).mean_dim(2);
    (forward + backward).mean()
}

/// Repulsion penalty over each point's nearest in-set neighbors.
///
/// Penalty per neighbor is `max(0, radius - d)²`: it saturates to zero once
/// spacing reaches `radius`, so an already well-spread set incurs nothing,
/// while clumped points are pushed apart quadratically.
pub fn repulsion_loss<B: Backend>(
    points: &Tensor<B, 3>,
    neighbors: usize,
    radius: f64,
) -> Tensor<B, 1> {
    let [b, n, _] = points.dims();
    let device = points.device();
    let k = neighbors.min(n.saturating_sub(1)).max(1);

    let clouds = host_points(points);
    let mut flat = Vec::with_capacity(b * n * (k + 1));
    for cloud in &clouds {
        flat.extend(
            grouping::knn_indices(cloud, cloud, k + 1)
                .into_iter()
                .map(|i| i as i64),
        );
    }
    // column 0 is a zero-distance entry (the point itself); drop it
    let idx = index_tensor::<B, 3>(flat, [b, n, k + 1], &device).slice([0..b, 0..n, 1..k + 1]);

    let neighbor_xyz = gather_groups(points.clone(), idx);
    let diff = points.clone().unsqueeze_dim::<4>(2) - neighbor_xyz;
    let dist = diff.powi_scalar(2).sum_dim(3).clamp_min(1e-12).sqrt();
    let gap = dist.neg().add_scalar(radius).clamp_min(0.0);
    gap.powi_scalar(2).mean()
}

/// Weighted combination of per-stage Chamfer terms and repulsion, applied
/// to every cascade output so intermediate stages are supervised too.
#[derive(Config, Debug)]
pub struct ProgressiveLossConfig {
    #[config(default = 1.0)]
    pub chamfer_weight: f64,
    #[config(default = 0.05)]
    pub repulsion_weight: f64,
    /// Saturation threshold of the repulsion kernel, in normalized patch
    /// units.
    #[config(default = 0.07)]
    pub repulsion_radius: f64,
    #[config(default = 4)]
    pub repulsion_neighbors: usize,
}

impl ProgressiveLossConfig {
    pub fn init(&self) -> ProgressiveLoss {
        ProgressiveLoss {
            chamfer_weight: self.chamfer_weight,
            repulsion_weight: self.repulsion_weight,
            repulsion_radius: self.repulsion_radius,
            repulsion_neighbors: self.repulsion_neighbors,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressiveLoss {
    chamfer_weight: f64,
    repulsion_weight: f64,
    repulsion_radius: f64,
    repulsion_neighbors: usize,
}

impl ProgressiveLoss {
    /// One target per cascade stage, at the stage's output resolution.
    pub fn forward<B: Backend>(
        &self,
        outputs: &CascadeOutput<B>,
        targets: &[Tensor<B, 3>],
    ) -> Tensor<B, 1> {
        assert_eq!(
            outputs.stages.len(),
            targets.len(),
            "one ground-truth resolution per cascade stage"
        );
        let device = targets[0].device();
        let mut total = Tensor::zeros([1], &device);
        for (pred, target) in outputs.stages.iter().zip(targets) {
            let chamfer = chamfer_distance(pred, target) * self.chamfer_weight;
            let repulsion = repulsion_loss(pred, self.repulsion_neighbors, self.repulsion_radius)
                * self.repulsion_weight;
            total = total + chamfer + repulsion;
        }
        crate::debug_assert_finite!(total);
        total
    }
}
