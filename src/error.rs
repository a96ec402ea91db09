use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the upsampling pipeline.
///
/// Configuration problems are reported before any compute starts; geometric
/// edge cases inside a batch (too few neighbors) are handled by the grouper's
/// padding policy and never show up here.
#[derive(Error, Debug)]
pub enum Error {
    /// Cascade stage ratios do not multiply out to the target ratio.
    #[error(
        "cascade ratios {ratios:?} multiply to {product}, expected up_ratio {up_ratio}"
    )]
    CascadeMismatch {
        ratios: Vec<usize>,
        product: usize,
        up_ratio: usize,
    },

    #[error("patch size {num_point} exceeds shape size {num_shape_point}")]
    PatchLargerThanShape {
        num_point: usize,
        num_shape_point: usize,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Farthest-point sampling asked for more points than the input holds.
    #[error("cannot sample {requested} points from a set of {available}")]
    SampleCountExceedsInput { requested: usize, available: usize },

    #[error("empty point set: {0}")]
    EmptyPointSet(String),

    #[error("{path:?}:{line}: cannot parse point: {message}")]
    XyzParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("training archive {path:?}: {message}")]
    Archive { path: PathBuf, message: String },

    #[error("checkpoint {path:?}: {message}")]
    Checkpoint { path: PathBuf, message: String },

    /// Loss went NaN/Inf; training aborts before the value can reach a
    /// checkpoint.
    #[error("non-finite loss at epoch {epoch}, step {step}")]
    NonFiniteLoss { epoch: usize, step: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
