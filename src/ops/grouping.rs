//! Neighborhood grouping: k-nearest and radius-bounded queries.
//!
//! Padding policy: every query row holds exactly `k` indices. When fewer
//! than `k` candidates exist (a source set smaller than `k`, or a radius
//! bound that excludes too many points), the nearest neighbor is repeated to
//! fill the row. Candidates are ordered by `(squared distance, index)`, so
//! results are deterministic under distance ties.

use super::squared_distance;

/// Indices of the `k` nearest `points` per query, row-major `queries.len() × k`.
///
/// Rows are sorted nearest-first; ties broken by lowest index. If
/// `points.len() < k` the nearest point is repeated to pad the row.
/// Panics on an empty source set; callers validate non-emptiness up front.
pub fn knn_indices(queries: &[[f32; 3]], points: &[[f32; 3]], k: usize) -> Vec<usize> {
    assert!(!points.is_empty(), "knn over an empty point set");

    let mut out = Vec::with_capacity(queries.len() * k);
    let mut candidates: Vec<(f32, usize)> = Vec::with_capacity(points.len());

    for query in queries {
        candidates.clear();
        candidates.extend(
            points
                .iter()
                .enumerate()
                .map(|(i, p)| (squared_distance(query, p), i)),
        );
        candidates.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        push_padded(&mut out, &candidates, candidates.len(), k);
    }
    out
}

/// Like [`knn_indices`], but only neighbors within `radius` count.
///
/// Each row keeps the in-radius neighbors nearest-first, truncated to `k`;
/// rows with fewer than `k` in-radius neighbors are padded by repeating the
/// globally nearest point, so a degenerate neighborhood never fails a batch.
pub fn radius_indices(
    queries: &[[f32; 3]],
    points: &[[f32; 3]],
    radius: f32,
    k: usize,
) -> Vec<usize> {
    assert!(!points.is_empty(), "radius grouping over an empty point set");

    let radius_sq = radius * radius;
    let mut out = Vec::with_capacity(queries.len() * k);
    let mut candidates: Vec<(f32, usize)> = Vec::with_capacity(points.len());

    for query in queries {
        candidates.clear();
        candidates.extend(
            points
                .iter()
                .enumerate()
                .map(|(i, p)| (squared_distance(query, p), i)),
        );
        candidates.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let in_radius = candidates.partition_point(|&(d, _)| d <= radius_sq);
        push_padded(&mut out, &candidates, in_radius.max(1), k);
    }
    out
}

fn push_padded(out: &mut Vec<usize>, sorted: &[(f32, usize)], usable: usize, k: usize) {
    let take = usable.min(k);
    out.extend(sorted[..take].iter().map(|&(_, i)| i));
    // padding: repeat the nearest neighbor
    out.extend(std::iter::repeat(sorted[0].1).take(k - take));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> Vec<[f32; 3]> {
        (0..n).map(|i| [i as f32, 0.0, 0.0]).collect()
    }

    #[test]
    fn rows_are_nearest_first() {
        let points = line(10);
        let queries = [[0.2, 0.0, 0.0], [8.9, 0.0, 0.0]];
        let idx = knn_indices(&queries, &points, 3);
        assert_eq!(&idx[..3], &[0, 1, 2]);
        assert_eq!(&idx[3..], &[9, 8, 7]);
    }

    #[test]
    fn exactly_k_per_query_with_small_source() {
        let points = line(2);
        let queries = [[0.0, 0.0, 0.0]];
        let idx = knn_indices(&queries, &points, 5);
        assert_eq!(idx.len(), 5);
        // nearest point repeated to fill the row
        assert_eq!(idx, vec![0, 1, 0, 0, 0]);
    }

    #[test]
    fn distance_ties_break_by_index() {
        // two points equidistant from the query
        let points = [[1.0, 0.0, 0.0], [-1.0, 0.0, 0.0], [5.0, 0.0, 0.0]];
        let queries = [[0.0, 0.0, 0.0]];
        let idx = knn_indices(&queries, &points, 2);
        assert_eq!(idx, vec![0, 1]);
    }

    #[test]
    fn radius_pads_degenerate_neighborhoods() {
        let points = line(10);
        // only index 0 lies within radius 0.5 of the query
        let queries = [[0.1, 0.0, 0.0]];
        let idx = radius_indices(&queries, &points, 0.5, 4);
        assert_eq!(idx, vec![0, 0, 0, 0]);
    }

    #[test]
    fn radius_truncates_to_k_nearest() {
        let points = line(10);
        let queries = [[4.5, 0.0, 0.0]];
        let idx = radius_indices(&queries, &points, 3.0, 2);
        assert_eq!(idx.len(), 2);
        assert_eq!(idx, vec![4, 5]);
    }

    #[test]
    fn radius_excluding_everything_still_pads() {
        let points = line(4);
        let queries = [[100.0, 0.0, 0.0]];
        let idx = radius_indices(&queries, &points, 0.1, 3);
        // nearest point is index 3; repeated as padding
        assert_eq!(idx, vec![3, 3, 3]);
    }
}
