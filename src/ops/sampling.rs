//! Farthest-point sampling.

use crate::error::{Error, Result};

use super::squared_distance;

/// Greedy farthest-point sampling: returns `count` indices into `points`,
/// each pick maximizing the minimum distance to the already-selected set,
/// starting from `seed`.
///
/// Deterministic for a fixed `seed`: the running minimum distances are
/// scanned in index order with a strict `>` comparison, so ties keep the
/// lowest index. Every returned index is unique and in `[0, points.len())`.
///
/// Errors when `count` exceeds the input size or the input is empty.
pub fn farthest_point_indices(
    points: &[[f32; 3]],
    count: usize,
    seed: usize,
) -> Result<Vec<usize>> {
    if points.is_empty() {
        return Err(Error::EmptyPointSet("farthest-point sampling".into()));
    }
    if count > points.len() {
        return Err(Error::SampleCountExceedsInput {
            requested: count,
            available: points.len(),
        });
    }

    let seed = seed % points.len();
    let mut selected = Vec::with_capacity(count);
    let mut taken = vec![false; points.len()];
    // min_dist[i] = squared distance from points[i] to the selected set
    let mut min_dist = vec![f32::INFINITY; points.len()];
    let mut current = seed;

    for picked in 0..count {
        selected.push(current);
        taken[current] = true;
        if picked + 1 == count {
            break;
        }
        let picked_point = points[current];

        let mut best = current;
        let mut best_dist = f32::NEG_INFINITY;
        for (i, point) in points.iter().enumerate() {
            let d = squared_distance(&picked_point, point);
            if d < min_dist[i] {
                min_dist[i] = d;
            }
            // coincident duplicates leave min_dist at zero; only unselected
            // indices are eligible, so every pick stays unique
            if !taken[i] && min_dist[i] > best_dist {
                best_dist = min_dist[i];
                best = i;
            }
        }
        current = best;
    }

    Ok(selected)
}

/// Gather the coordinates selected by `indices`.
pub fn gather(points: &[[f32; 3]], indices: &[usize]) -> Vec<[f32; 3]> {
    indices.iter().map(|&i| points[i]).collect()
}
