//! Minimal static 2-D k-d tree for projected-grid regridding.
//!
//! Built once per regrid over the non-NaN source cells, queried once per
//! target cell. Coordinates are (lat, lon) in degrees; the metric is squared
//! Euclidean distance in degrees, matching the rest of the kernel.

use std::cmp::Ordering;

pub(crate) struct KdTree {
    points: Vec<[f64; 2]>,
    /// Point ids arranged as an implicit balanced tree: the median of every
    /// slice is its node, halves are subtrees with the split axis alternating
    /// per level.
    order: Vec<u32>,
}

impl KdTree {
    pub(crate) fn build(points: Vec<[f64; 2]>) -> Self {
        let mut order: Vec<u32> = (0..points.len() as u32).collect();
        build_rec(&points, &mut order, 0);
        KdTree { points, order }
    }

    /// Id of the point nearest to `query`; ties resolve to the lowest id.
    ///
    /// Panics on an empty tree; callers guarantee at least one point.
    pub(crate) fn nearest(&self, query: [f64; 2]) -> usize {
        debug_assert!(!self.points.is_empty());
        let mut best = (f64::INFINITY, u32::MAX);
        nearest_rec(&self.points, &self.order, 0, query, &mut best);
        best.1 as usize
    }
}

fn build_rec(points: &[[f64; 2]], order: &mut [u32], axis: usize) {
    if order.len() <= 1 {
        return;
    }
    let mid = order.len() / 2;
    order.select_nth_unstable_by(mid, |&a, &b| {
        points[a as usize][axis]
            .partial_cmp(&points[b as usize][axis])
            .unwrap_or(Ordering::Equal)
    });
    let (lower, rest) = order.split_at_mut(mid);
    build_rec(points, lower, 1 - axis);
    build_rec(points, &mut rest[1..], 1 - axis);
}

fn nearest_rec(
    points: &[[f64; 2]],
    order: &[u32],
    axis: usize,
    query: [f64; 2],
    best: &mut (f64, u32),
) {
    if order.is_empty() {
        return;
    }
    let mid = order.len() / 2;
    let id = order[mid];
    let p = points[id as usize];
    let d = (p[0] - query[0]) * (p[0] - query[0]) + (p[1] - query[1]) * (p[1] - query[1]);
    if d < best.0 || (d == best.0 && id < best.1) {
        *best = (d, id);
    }
    let diff = query[axis] - p[axis];
    let (near, far) = if diff < 0.0 {
        (&order[..mid], &order[mid + 1..])
    } else {
        (&order[mid + 1..], &order[..mid])
    };
    nearest_rec(points, near, 1 - axis, query, best);
    if diff * diff <= best.0 {
        nearest_rec(points, far, 1 - axis, query, best);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_exact_matches() {
        let pts = vec![[0.0, 0.0], [1.0, 1.0], [2.0, 0.5], [0.5, 2.0]];
        let tree = KdTree::build(pts.clone());
        for (i, p) in pts.iter().enumerate() {
            assert_eq!(tree.nearest(*p), i);
        }
    }

    #[test]
    fn matches_linear_scan_on_a_grid() {
        let mut pts = Vec::new();
        for i in 0..20 {
            for j in 0..20 {
                pts.push([i as f64 * 0.3, j as f64 * 0.7]);
            }
        }
        let tree = KdTree::build(pts.clone());
        for &q in &[[1.1, 2.2], [0.0, 13.9], [5.95, 0.05], [-1.0, -1.0], [10.0, 20.0]] {
            let brute = pts
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    let da = (a[0] - q[0]).powi(2) + (a[1] - q[1]).powi(2);
                    let db = (b[0] - q[0]).powi(2) + (b[1] - q[1]).powi(2);
                    da.partial_cmp(&db).unwrap()
                })
                .map(|(i, _)| i)
                .unwrap();
            assert_eq!(tree.nearest(q), brute, "query {:?}", q);
        }
    }

    #[test]
    fn tie_breaks_to_lowest_id() {
        let pts = vec![[0.0, 1.0], [1.0, 0.0], [0.0, -1.0], [-1.0, 0.0]];
        let tree = KdTree::build(pts);
        assert_eq!(tree.nearest([0.0, 0.0]), 0);
    }
}
