//! Pure geometric kernels over host-side point sets.
//!
//! Everything in here is framework-free: plain slices in, plain indices out.
//! The model pulls coordinates to the host, runs these kernels, and applies
//! the resulting indices back on-device with differentiable gathers. Index
//! selection itself carries no gradient, matching the non-differentiable
//! sampling/grouping kernels of classic point networks.

pub mod grouping;
pub mod sampling;

pub(crate) fn squared_distance(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}
