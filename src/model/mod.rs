mod expansion;
mod extractor;
mod kernels;
mod loss;

use burn::config::Config;
use burn::module::Module;
use burn::prelude::*;

pub use expansion::ExpansionUnit;
pub use extractor::FeatureExtractor;
pub use loss::ProgressiveLossConfig;

pub(crate) use kernels::host_points;

use crate::config::CascadeConfig;

#[macro_export]
macro_rules! debug_assert_finite {
    ($tensor:expr) => {{
        #[cfg(debug_assertions)]
        {
            use burn::tensor::cast::ToElement;
            debug_assert!(
                !$tensor.clone().is_nan().any().into_scalar().to_bool(),
                "tensor contains NaN"
            );
            debug_assert!(
                !$tensor.clone().is_inf().any().into_scalar().to_bool(),
                "tensor contains inf"
            );
        }
    }};
}

/// One link of the cascade: extract per-point features from the current
/// point set, expand them by the stage ratio into a denser set.
#[derive(Module, Debug)]
pub struct CascadeStage<B: Backend> {
    extractor: FeatureExtractor<B>,
    expansion: ExpansionUnit<B>,
}

impl<B: Backend> CascadeStage<B> {
    pub fn ratio(&self) -> usize {
        self.expansion.ratio()
    }

    fn forward(&self, xyz: &Tensor<B, 3>) -> Tensor<B, 3> {
        let features = self.extractor.forward(xyz);
        self.expansion.forward(xyz, &features)
    }
}

/// Every stage's predicted point set, in cascade order. The last entry is
/// the final dense patch; earlier entries feed progressive supervision.
#[derive(Debug, Clone)]
pub struct CascadeOutput<B: Backend> {
    pub stages: Vec<Tensor<B, 3>>,
}

impl<B: Backend> CascadeOutput<B> {
    pub fn final_points(&self) -> Tensor<B, 3> {
        self.stages
            .last()
            .expect("cascade has at least one stage")
            .clone()
    }
}

/// Progressive patch upsampler: cascade stages applied in fixed order, each
/// multiplying the point count by its ratio.
#[derive(Module, Debug)]
pub struct PatchUpsampler<B: Backend> {
    stages: Vec<CascadeStage<B>>,
}

impl<B: Backend> PatchUpsampler<B> {
    /// `patch [B, N, 3]` -> one output per stage, the k-th holding
    /// `N·r1·…·rk` points.
    pub fn forward(&self, patch: Tensor<B, 3>) -> CascadeOutput<B> {
        let mut outputs = Vec::with_capacity(self.stages.len());
        let mut current = patch;
        for stage in &self.stages {
            current = stage.forward(&current);
            outputs.push(current.clone());
        }
        CascadeOutput { stages: outputs }
    }

    /// Final dense patch only.
    pub fn upsample(&self, patch: Tensor<B, 3>) -> Tensor<B, 3> {
        self.forward(patch).final_points()
    }
}

#[derive(Config, Debug)]
pub struct UpsamplerConfig {
    pub cascade: CascadeConfig,
    /// Neighborhood size of the set-abstraction levels.
    #[config(default = 16)]
    pub knn: usize,
    /// Per-point feature width handed to each expansion unit.
    #[config(default = 128)]
    pub feature_dim: usize,
}

impl UpsamplerConfig {
    /// Builds the cascade; a stage-ratio product that misses `up_ratio` is
    /// rejected here, before any data is touched.
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::error::Result<PatchUpsampler<B>> {
        self.cascade.validate()?;
        let stages = self
            .cascade
            .stage_ratios
            .iter()
            .map(|&ratio| CascadeStage {
                extractor: FeatureExtractor::new(self.knn, self.feature_dim, device),
                expansion: ExpansionUnit::new(self.feature_dim, ratio, device),
            })
            .collect();
        Ok(PatchUpsampler { stages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    use crate::error::Error;

    type TestBackend = NdArray;

    #[test]
    fn mismatched_ratios_fail_at_init() {
        let config = UpsamplerConfig::new(CascadeConfig::new(16, vec![2, 2, 2], 32));
        let result = config.init::<TestBackend>(&Default::default());
        assert!(matches!(result, Err(Error::CascadeMismatch { .. })));
    }

    #[test]
    fn cascade_multiplies_point_counts_stage_by_stage() {
        let device = Default::default();
        let config = UpsamplerConfig::new(CascadeConfig::new(4, vec![2, 2], 16))
            .with_knn(8)
            .with_feature_dim(32);
        let model = config.init::<TestBackend>(&device).unwrap();
        let patch = Tensor::random([2, 16, 3], Distribution::Uniform(-1.0, 1.0), &device);
        let outputs = model.forward(patch);
        assert_eq!(outputs.stages.len(), 2);
        assert_eq!(outputs.stages[0].dims(), [2, 32, 3]);
        assert_eq!(outputs.stages[1].dims(), [2, 64, 3]);
        assert_eq!(outputs.final_points().dims(), [2, 64, 3]);
    }

    #[test]
    fn four_doubling_stages_reach_the_full_ratio() {
        let device = Default::default();
        let config = UpsamplerConfig::new(CascadeConfig::new(16, vec![2, 2, 2, 2], 312))
            .with_knn(8)
            .with_feature_dim(32);
        let model = config.init::<TestBackend>(&device).unwrap();
        let patch = Tensor::random([1, 312, 3], Distribution::Uniform(-1.0, 1.0), &device);
        let outputs = model.forward(patch);
        let counts: Vec<usize> = outputs.stages.iter().map(|s| s.dims()[1]).collect();
        assert_eq!(counts, vec![624, 1248, 2496, 4992]);
    }

    #[test]
    fn checkpoint_round_trip_preserves_outputs() {
        use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};

        let device = Default::default();
        let config = UpsamplerConfig::new(CascadeConfig::new(2, vec![2], 16))
            .with_knn(4)
            .with_feature_dim(16);
        let model = config.init::<TestBackend>(&device).unwrap();
        let patch = Tensor::random([1, 16, 3], Distribution::Uniform(-1.0, 1.0), &device);
        let before = model
            .forward(patch.clone())
            .final_points()
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        let path = std::env::temp_dir().join(format!("pointup-ckpt-{}", std::process::id()));
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        model.clone().save_file(path.clone(), &recorder).unwrap();
        let restored = config
            .init::<TestBackend>(&device)
            .unwrap()
            .load_record(recorder.load(path.clone(), &device).unwrap());
        let after = restored
            .forward(patch)
            .final_points()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(before, after);
        std::fs::remove_file(path.with_extension("mpk")).ok();
    }

    #[test]
    fn stage_ratios_are_preserved_in_order() {
        let device = Default::default();
        let config = UpsamplerConfig::new(CascadeConfig::new(8, vec![2, 4], 16)).with_knn(4);
        let model = config.init::<TestBackend>(&device).unwrap();
        let ratios: Vec<usize> = model.stages.iter().map(|s| s.ratio()).collect();
        assert_eq!(ratios, vec![2, 4]);
    }
}
