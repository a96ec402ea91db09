//! Feature expansion for one cascade stage.
//!
//! Per-point features are replicated `ratio` times, each copy tagged with a
//! distinct code channel, and decoded into a 3D displacement added to the
//! replicated base coordinate. The decoder output is always a residual: the
//! stage nudges duplicated points apart instead of predicting absolute
//! positions.

use burn::module::Module;
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;

const DECODER_DIMS: [usize; 2] = [128, 64];

#[derive(Module, Debug)]
pub struct ExpansionUnit<B: Backend> {
    decoder: Vec<Linear<B>>,
    activation: Relu,
    ratio: usize,
}

impl<B: Backend> ExpansionUnit<B> {
    pub fn new(feature_dim: usize, ratio: usize, device: &B::Device) -> Self {
        let decoder = vec![
            LinearConfig::new(feature_dim + 1, DECODER_DIMS[0]).init(device),
            LinearConfig::new(DECODER_DIMS[0], DECODER_DIMS[1]).init(device),
            LinearConfig::new(DECODER_DIMS[1], 3).init(device),
        ];
        Self {
            decoder,
            activation: Relu::new(),
            ratio,
        }
    }

    pub fn ratio(&self) -> usize {
        self.ratio
    }

    /// `xyz [B, N, 3]`, `features [B, N, C]` -> `[B, N·ratio, 3]`.
    pub fn forward(&self, xyz: &Tensor<B, 3>, features: &Tensor<B, 3>) -> Tensor<B, 3> {
        let [b, n, _] = xyz.dims();
        let r = self.ratio;
        let c = features.dims()[2];
        let device = xyz.device();

        let base = xyz
            .clone()
            .unsqueeze_dim::<4>(2)
            .repeat(&[1, 1, r, 1])
            .reshape([b, n * r, 3]);
        let replicated = features.clone().unsqueeze_dim::<4>(2).repeat(&[1, 1, r, 1]);

        // per-copy code in [-1, 1] distinguishes otherwise identical copies
        let code: Vec<f32> = (0..r)
            .map(|i| {
                if r == 1 {
                    0.0
                } else {
                    -1.0 + 2.0 * i as f32 / (r - 1) as f32
                }
            })
            .collect();
        let code =
            Tensor::<B, 4>::from_data(TensorData::new(code, [1, 1, r, 1]), &device)
                .repeat(&[b, n, 1, 1]);

        let mut x = Tensor::cat(vec![replicated, code], 3).reshape([b, n * r, c + 1]);
        let last = self.decoder.len() - 1;
        for (i, layer) in self.decoder.iter().enumerate() {
            x = layer.forward(x);
            if i < last {
                x = self.activation.forward(x);
            }
        }

        base + x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn expands_point_count_by_ratio() {
        let device = Default::default();
        let unit = ExpansionUnit::<TestBackend>::new(16, 4, &device);
        let xyz = Tensor::random([2, 10, 3], Distribution::Uniform(-1.0, 1.0), &device);
        let features = Tensor::random([2, 10, 16], Distribution::Uniform(-1.0, 1.0), &device);
        let out = unit.forward(&xyz, &features);
        assert_eq!(out.dims(), [2, 40, 3]);
    }

    #[test]
    fn copies_of_one_point_share_a_base() {
        // with identical features per copy, the only difference between the
        // r outputs of one input point is the decoded code channel; all stay
        // anchored near the replicated base point rather than anywhere else
        let device = Default::default();
        let unit = ExpansionUnit::<TestBackend>::new(8, 2, &device);
        let xyz = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![5.0f32, 5.0, 5.0], [1, 1, 3]),
            &device,
        );
        let features = Tensor::zeros([1, 1, 8], &device);
        let out = unit.forward(&xyz, &features);
        assert_eq!(out.dims(), [1, 2, 3]);
        let values = out.into_data().to_vec::<f32>().unwrap();
        // residual decoders start near zero-mean init; both copies must stay
        // in the neighborhood of the base, not of the origin
        let base = [5.0f32; 3];
        for chunk in values.chunks_exact(3) {
            let to_base: f32 = chunk.iter().zip(base).map(|(v, b)| (v - b).powi(2)).sum();
            let to_origin: f32 = chunk.iter().map(|v| v.powi(2)).sum();
            assert!(to_base < to_origin, "copy must remain anchored to its base point");
        }
    }
}
