//! Run configuration, validated before any compute starts.

use burn::prelude::*;

use crate::error::Error;

/// Geometry of the upsampling cascade and the patches fed through it.
///
/// Threaded explicitly through the data pipeline, the model constructor and
/// both drivers; there is no ambient/global configuration anywhere.
#[derive(Config, Debug)]
pub struct CascadeConfig {
    /// Overall upsampling ratio the cascade must reach.
    pub up_ratio: usize,
    /// Per-stage expansion ratios, applied in order. Their product must
    /// equal `up_ratio`.
    pub stage_ratios: Vec<usize>,
    /// Points per input patch.
    pub num_point: usize,
    /// Points per whole shape at the input resolution. Inference inputs
    /// larger than this are downsampled first.
    #[config(default = 5000)]
    pub num_shape_point: usize,
}

impl CascadeConfig {
    /// Reject impossible cascades up front: a mismatched ratio product or a
    /// patch larger than the shape is a configuration error, never a
    /// runtime one.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.stage_ratios.is_empty() {
            return Err(Error::Config("cascade has no stages".into()));
        }
        if let Some(&r) = self.stage_ratios.iter().find(|&&r| r < 2) {
            return Err(Error::Config(format!(
                "stage ratio {r} is below 2; every stage must expand"
            )));
        }
        let product: usize = self.stage_ratios.iter().product();
        if product != self.up_ratio {
            return Err(Error::CascadeMismatch {
                ratios: self.stage_ratios.clone(),
                product,
                up_ratio: self.up_ratio,
            });
        }
        if self.num_point < 8 {
            return Err(Error::Config(format!(
                "num_point {} is too small for two downsampling levels",
                self.num_point
            )));
        }
        if self.num_point > self.num_shape_point {
            return Err(Error::PatchLargerThanShape {
                num_point: self.num_point,
                num_shape_point: self.num_shape_point,
            });
        }
        Ok(())
    }

    /// Patch point counts at every resolution level, input first:
    /// `[n, n·r1, n·r1·r2, ...]`.
    pub fn level_counts(&self) -> Vec<usize> {
        let mut counts = Vec::with_capacity(self.stage_ratios.len() + 1);
        let mut n = self.num_point;
        counts.push(n);
        for &r in &self.stage_ratios {
            n *= r;
            counts.push(n);
        }
        counts
    }

    /// Point counts each stage output is supervised against
    /// (`level_counts` without the input level).
    pub fn target_counts(&self) -> Vec<usize> {
        self.level_counts()[1..].to_vec()
    }

    pub fn num_stages(&self) -> usize {
        self.stage_ratios.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_cascade() {
        let config = CascadeConfig::new(16, vec![2, 2, 2, 2], 312);
        assert!(config.validate().is_ok());
        assert_eq!(config.level_counts(), vec![312, 624, 1248, 2496, 4992]);
        assert_eq!(config.target_counts(), vec![624, 1248, 2496, 4992]);
    }

    #[test]
    fn rejects_ratio_mismatch_at_config_time() {
        let config = CascadeConfig::new(16, vec![2, 2, 2], 312);
        assert!(matches!(
            config.validate(),
            Err(Error::CascadeMismatch { product: 8, up_ratio: 16, .. })
        ));
    }

    #[test]
    fn rejects_patch_larger_than_shape() {
        let config = CascadeConfig::new(4, vec![2, 2], 312).with_num_shape_point(100);
        assert!(matches!(
            config.validate(),
            Err(Error::PatchLargerThanShape { num_point: 312, num_shape_point: 100 })
        ));
    }

    #[test]
    fn rejects_empty_and_degenerate_stages() {
        assert!(CascadeConfig::new(1, vec![], 312).validate().is_err());
        assert!(CascadeConfig::new(2, vec![2, 1], 312).validate().is_err());
    }
}
