//! Bridges between the host-side geometric kernels and device tensors.
//!
//! Sampling and grouping produce plain indices on the host (`crate::ops`);
//! the indices are then applied on-device with `select`, which keeps the
//! gathered coordinates and features on the autodiff graph. Index selection
//! itself is non-differentiable, as in the native kernels this mirrors.

use burn::prelude::*;

/// Copy a `[B, N, 3]` coordinate tensor to the host, one cloud per batch
/// element.
pub(crate) fn host_points<B: Backend>(points: &Tensor<B, 3>) -> Vec<Vec<[f32; 3]>> {
    let [b, n, _] = points.dims();
    let data = points.to_data().convert::<f32>();
    let flat = data
        .to_vec::<f32>()
        .expect("point tensor holds contiguous f32 data");
    (0..b)
        .map(|bi| {
            flat[bi * n * 3..(bi + 1) * n * 3]
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect()
        })
        .collect()
}

/// Build an integer index tensor from host indices.
pub(crate) fn index_tensor<B: Backend, const D: usize>(
    indices: Vec<i64>,
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D, Int> {
    Tensor::from_data(TensorData::new(indices, shape), device)
}

/// Offsets turning per-batch row indices into indices over a `[B·N, C]`
/// flattening.
fn batch_offsets<B: Backend>(b: usize, n: usize, device: &B::Device) -> Tensor<B, 1, Int> {
    Tensor::arange(0..b as i64, device).mul_scalar(n as i64)
}

/// Gather rows: `src [B, N, C]`, `idx [B, M]` -> `[B, M, C]`.
///
/// The batch is flattened and rows picked with `select` along the leading
/// dimension, which keeps a gradient path back to `src`.
pub(crate) fn gather_rows<B: Backend>(src: Tensor<B, 3>, idx: Tensor<B, 2, Int>) -> Tensor<B, 3> {
    let [b, n, c] = src.dims();
    let m = idx.dims()[1];
    let offsets = batch_offsets::<B>(b, n, &src.device()).reshape([b, 1]);
    let flat_idx = (idx + offsets).reshape([b * m]);
    src.reshape([b * n, c]).select(0, flat_idx).reshape([b, m, c])
}

/// Gather neighborhoods: `src [B, N, C]`, `idx [B, M, K]` -> `[B, M, K, C]`.
pub(crate) fn gather_groups<B: Backend>(
    src: Tensor<B, 3>,
    idx: Tensor<B, 3, Int>,
) -> Tensor<B, 4> {
    let [b, n, c] = src.dims();
    let [_, m, k] = idx.dims();
    let offsets = batch_offsets::<B>(b, n, &src.device()).reshape([b, 1, 1]);
    let flat_idx = (idx + offsets).reshape([b * m * k]);
    src.reshape([b * n, c]).select(0, flat_idx).reshape([b, m, k, c])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    type TestBackend = NdArray;
    type AutodiffTestBackend = Autodiff<NdArray>;

    fn cloud(values: Vec<f32>, shape: [usize; 3]) -> Tensor<TestBackend, 3> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn host_points_round_trips() {
        let t = cloud(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [1, 2, 3]);
        let host = host_points(&t);
        assert_eq!(host, vec![vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]]);
    }

    #[test]
    fn gather_rows_picks_selected_points() {
        let t = cloud((0..12).map(|v| v as f32).collect(), [2, 2, 3]);
        let idx = index_tensor::<TestBackend, 2>(vec![1, 0], [2, 1], &Default::default());
        let picked = gather_rows(t, idx);
        let values = picked.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn gather_groups_builds_neighborhoods() {
        let t = cloud((0..6).map(|v| v as f32).collect(), [1, 2, 3]);
        let idx = index_tensor::<TestBackend, 3>(vec![1, 1, 0, 0], [1, 2, 2], &Default::default());
        let groups = gather_groups(t, idx);
        assert_eq!(groups.dims(), [1, 2, 2, 3]);
        let values = groups.into_data().to_vec::<f32>().unwrap();
        assert_eq!(
            values,
            vec![3.0, 4.0, 5.0, 3.0, 4.0, 5.0, 0.0, 1.0, 2.0, 0.0, 1.0, 2.0]
        );
    }

    #[test]
    fn gather_rows_backward_reaches_the_source() {
        let device = Default::default();
        let src = Tensor::<AutodiffTestBackend, 3>::random(
            [2, 16, 3],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        )
        .require_grad();
        let idx = index_tensor::<AutodiffTestBackend, 2>(vec![3, 0, 7, 1], [2, 2], &device);
        let grads = gather_rows(src.clone(), idx).sum().backward();
        let grad = src.grad(&grads).expect("source receives a gradient");
        assert_eq!(grad.dims(), [2, 16, 3]);
    }

    #[test]
    fn gather_groups_backward_reaches_the_source() {
        let device = Default::default();
        let src = Tensor::<AutodiffTestBackend, 3>::random(
            [2, 8, 4],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        )
        .require_grad();
        let idx = index_tensor::<AutodiffTestBackend, 3>(
            vec![0, 1, 5, 5, 2, 3, 7, 0],
            [2, 2, 2],
            &device,
        );
        let grads = gather_groups(src.clone(), idx).sum().backward();
        let grad = src.grad(&grads).expect("source receives a gradient");
        assert_eq!(grad.dims(), [2, 8, 4]);
    }
}
