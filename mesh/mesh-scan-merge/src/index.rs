//! Static nearest-neighbor index over scan points.
//!
//! [`SpatialIndex`] wraps a kiddo KD-tree built once over a slice of points.
//! Items are the points' positions in the source slice, so query results can
//! be used directly to address parallel per-point arrays.
//!
//! # Example
//!
//! ```
//! use mesh_scan_merge::SpatialIndex;
//! use nalgebra::Point3;
//!
//! let points = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(5.0, 0.0, 0.0),
//! ];
//! let index = SpatialIndex::build(&points);
//!
//! let nearest = index.k_nearest(&Point3::new(0.9, 0.0, 0.0), 1);
//! assert_eq!(nearest[0].index, 1);
//!
//! let close = index.within(&Point3::origin(), 1.5);
//! assert_eq!(close.len(), 2);
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::ops::ControlFlow;

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Point3, Rotation3, Vector3};
use tracing::debug;

/// Sites fetched by the first round of a nearest-first search.
const FIRST_BATCH: usize = 8;

/// A query result: which point, and how far away (squared) it is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Position of the point in the slice the index was built from.
    pub index: usize,
    /// Squared Euclidean distance to the query point.
    pub distance_sq: f64,
}

impl Neighbor {
    /// Euclidean distance to the query point.
    #[must_use]
    pub fn distance(&self) -> f64 {
        self.distance_sq.sqrt()
    }
}

/// Read-only KD-tree over a fixed set of points.
///
/// Non-finite points are left out of the tree, so they are never returned by
/// a query, but every other point keeps its original index.
///
/// Coincident points share one tree entry (a *site*). Sites are stored in a
/// fixed rotated frame, so flat axis-aligned walls, range grids and repeated
/// samples never put a bucket's worth of equal values on one split axis.
/// Reported distances are always computed from the original coordinates.
pub struct SpatialIndex {
    tree: KdTree<f64, 3>,
    frame: Rotation3<f64>,
    /// Original position of each site.
    sites: Vec<Point3<f64>>,
    /// `members[starts[s]..starts[s + 1]]` are the point indices at site `s`,
    /// ascending.
    starts: Vec<usize>,
    members: Vec<usize>,
    /// Largest distance from the origin to any site.
    extent: f64,
}

impl SpatialIndex {
    /// Builds an index over `points`.
    #[must_use]
    pub fn build(points: &[Point3<f64>]) -> Self {
        let mut members: Vec<usize> = (0..points.len())
            .filter(|&i| is_finite(&points[i]))
            .collect();
        members.sort_unstable_by_key(|&i| (position_key(&points[i]), i));

        let frame = tree_frame();
        let mut tree: KdTree<f64, 3> = KdTree::new();
        let mut sites = Vec::new();
        let mut starts = Vec::new();
        let mut extent = 0.0_f64;

        let mut previous = None;
        for (slot, &i) in members.iter().enumerate() {
            let key = position_key(&points[i]);
            if previous == Some(key) {
                continue;
            }
            previous = Some(key);

            #[allow(clippy::cast_possible_truncation)]
            let site = sites.len() as u64;
            tree.add(&coords(&frame.transform_point(&points[i])), site);
            sites.push(points[i]);
            starts.push(slot);
            extent = extent.max(points[i].coords.norm());
        }
        starts.push(members.len());

        debug!(
            points = points.len(),
            indexed = members.len(),
            sites = sites.len(),
            "Built spatial index"
        );

        Self {
            tree,
            frame,
            sites,
            starts,
            members,
            extent,
        }
    }

    /// Number of indexed (finite) points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if no point is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The `k` points closest to `point`, nearest first.
    ///
    /// Equal distances are ordered by index. When fewer than `k` points are
    /// indexed, all of them are returned.
    #[must_use]
    pub fn k_nearest(&self, point: &Point3<f64>, k: usize) -> Vec<Neighbor> {
        if k == 0 || self.is_empty() || !is_finite(point) {
            return Vec::new();
        }

        // Any k sites hold at least k points, so the k nearest points lie no
        // farther than the farthest of them. Gathering that whole ball keeps
        // every tied candidate in play before the cut.
        let reach_sq = self
            .tree
            .nearest_n::<SquaredEuclidean>(&self.tree_coords(point), k)
            .iter()
            .map(|found| (self.sites[site_of(found.item)] - point).norm_squared())
            .fold(0.0, f64::max);

        let mut neighbors = Vec::new();
        let _ = self.visit_within_sq(point, reach_sq, |neighbor| {
            neighbors.push(neighbor);
            ControlFlow::Continue(())
        });
        neighbors.sort_by(by_distance_then_index);
        neighbors.truncate(k);
        neighbors
    }

    /// Visits every point within `radius` of `point` (boundary included), in
    /// no particular order.
    ///
    /// The visitor returns [`ControlFlow::Break`] to stop the enumeration;
    /// that break is passed back to the caller.
    pub fn radius_search<F>(
        &self,
        point: &Point3<f64>,
        radius: f64,
        visitor: F,
    ) -> ControlFlow<()>
    where
        F: FnMut(Neighbor) -> ControlFlow<()>,
    {
        // `!(r >= 0)` also rejects NaN.
        if self.is_empty() || !is_finite(point) || !(radius >= 0.0) {
            return ControlFlow::Continue(());
        }
        self.visit_within_sq(point, radius * radius, visitor)
    }

    /// Visits the points within `radius` of `point` nearest first, ties by
    /// index.
    ///
    /// Candidates are pulled from the tree in growing batches, so a visitor
    /// that breaks early never pays for the whole ball.
    pub fn nearest_first<F>(
        &self,
        point: &Point3<f64>,
        radius: f64,
        mut visitor: F,
    ) -> ControlFlow<()>
    where
        F: FnMut(Neighbor) -> ControlFlow<()>,
    {
        if self.is_empty() || !is_finite(point) || !(radius >= 0.0) {
            return ControlFlow::Continue(());
        }

        let radius_sq = radius * radius;
        let query = self.tree_coords(point);
        let bound = self.search_bound(point, radius_sq);
        let slack = self.slack(point, radius);

        let mut batch = FIRST_BATCH;
        let mut floor = f64::NEG_INFINITY;
        loop {
            let found = self
                .tree
                .nearest_n_within::<SquaredEuclidean>(&query, bound, batch, true);
            let exhausted = found.len() < batch;

            // Sites the tree has not returned yet are at least this far away.
            let ceiling = match found.last() {
                Some(last) if !exhausted => (last.distance.sqrt() - slack).max(0.0).powi(2),
                _ => f64::INFINITY,
            };

            let mut ready = Vec::new();
            for hit in &found {
                let site = site_of(hit.item);
                let distance_sq = (self.sites[site] - point).norm_squared();
                if distance_sq >= floor && distance_sq < ceiling && distance_sq <= radius_sq {
                    ready.extend(
                        self.site_members(site)
                            .iter()
                            .map(|&index| Neighbor { index, distance_sq }),
                    );
                }
            }
            ready.sort_by(by_distance_then_index);
            for neighbor in ready {
                visitor(neighbor)?;
            }

            if exhausted {
                return ControlFlow::Continue(());
            }
            floor = floor.max(ceiling);
            batch = batch.saturating_mul(2);
        }
    }

    /// All points within `radius` of `point`, nearest first.
    #[must_use]
    pub fn within(&self, point: &Point3<f64>, radius: f64) -> Vec<Neighbor> {
        let mut found = Vec::new();
        let _ = self.radius_search(point, radius, |neighbor| {
            found.push(neighbor);
            ControlFlow::Continue(())
        });
        found.sort_by(by_distance_then_index);
        found
    }

    fn visit_within_sq<F>(
        &self,
        point: &Point3<f64>,
        radius_sq: f64,
        mut visitor: F,
    ) -> ControlFlow<()>
    where
        F: FnMut(Neighbor) -> ControlFlow<()>,
    {
        let bound = self.search_bound(point, radius_sq);
        for found in self
            .tree
            .within_unsorted::<SquaredEuclidean>(&self.tree_coords(point), bound)
        {
            let site = site_of(found.item);
            let distance_sq = (self.sites[site] - point).norm_squared();
            if distance_sq > radius_sq {
                continue;
            }
            for &index in self.site_members(site) {
                visitor(Neighbor { index, distance_sq })?;
            }
        }
        ControlFlow::Continue(())
    }

    fn site_members(&self, site: usize) -> &[usize] {
        &self.members[self.starts[site]..self.starts[site + 1]]
    }

    fn tree_coords(&self, point: &Point3<f64>) -> [f64; 3] {
        coords(&self.frame.transform_point(point))
    }

    /// Upper bound on how far rotation rounding can move a distance.
    fn slack(&self, point: &Point3<f64>, radius: f64) -> f64 {
        32.0 * f64::EPSILON * (self.extent + point.coords.norm() + radius)
    }

    /// Squared tree-frame radius that contains every point whose exact
    /// squared distance is at most `radius_sq`. Tree queries are strict, so
    /// this is also always positive.
    fn search_bound(&self, point: &Point3<f64>, radius_sq: f64) -> f64 {
        let radius = radius_sq.sqrt();
        (radius + self.slack(point, radius)).powi(2)
    }
}

impl fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("len", &self.len())
            .field("sites", &self.sites.len())
            .finish_non_exhaustive()
    }
}

/// Fixed rotation with no axis-aligned rows.
fn tree_frame() -> Rotation3<f64> {
    Rotation3::from_scaled_axis(Vector3::new(0.5873, 0.3319, 0.7541))
}

/// Exact identity of a finite position; `-0.0` and `0.0` compare equal.
fn position_key(point: &Point3<f64>) -> [u64; 3] {
    [
        (point.x + 0.0).to_bits(),
        (point.y + 0.0).to_bits(),
        (point.z + 0.0).to_bits(),
    ]
}

#[inline]
fn coords(point: &Point3<f64>) -> [f64; 3] {
    [point.x, point.y, point.z]
}

#[inline]
pub(crate) fn is_finite(point: &Point3<f64>) -> bool {
    point.x.is_finite() && point.y.is_finite() && point.z.is_finite()
}

#[allow(clippy::cast_possible_truncation)]
fn site_of(item: u64) -> usize {
    item as usize
}

fn by_distance_then_index(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance_sq
        .total_cmp(&b.distance_sq)
        .then(a.index.cmp(&b.index))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::float_cmp,
    clippy::cast_precision_loss,
    clippy::cast_lossless
)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line(n: usize) -> Vec<Point3<f64>> {
        (0..n).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect()
    }

    #[test]
    fn test_k_nearest_sorted() {
        let index = SpatialIndex::build(&line(10));
        let found = index.k_nearest(&Point3::new(4.2, 0.0, 0.0), 3);

        let order: Vec<_> = found.iter().map(|n| n.index).collect();
        assert_eq!(order, vec![4, 5, 3]);
        assert_relative_eq!(found[0].distance(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_k_nearest_fewer_points_than_k() {
        let index = SpatialIndex::build(&line(4));
        let found = index.k_nearest(&Point3::origin(), 20);
        assert_eq!(found.len(), 4);
    }

    #[test]
    fn test_k_nearest_ties_follow_insertion_order() {
        let points = vec![
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let index = SpatialIndex::build(&points);
        let found = index.k_nearest(&Point3::origin(), 3);

        let order: Vec<_> = found.iter().map(|n| n.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_k_zero_is_empty() {
        let index = SpatialIndex::build(&line(4));
        assert!(index.k_nearest(&Point3::origin(), 0).is_empty());
    }

    #[test]
    fn test_empty_index_matches_nothing() {
        let index = SpatialIndex::build(&[]);
        assert!(index.is_empty());
        assert!(index.k_nearest(&Point3::origin(), 5).is_empty());
        assert!(index.within(&Point3::origin(), 100.0).is_empty());
    }

    #[test]
    fn test_non_finite_points_are_skipped() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(f64::NAN, f64::NAN, f64::NAN),
            Point3::new(2.0, 0.0, 0.0),
        ];
        let index = SpatialIndex::build(&points);

        assert_eq!(index.len(), 2);
        let found = index.k_nearest(&Point3::origin(), 3);
        let order: Vec<_> = found.iter().map(|n| n.index).collect();
        assert_eq!(order, vec![0, 2]);
    }

    #[test]
    fn test_radius_search_inclusive_boundary() {
        let index = SpatialIndex::build(&line(5));
        let found = index.within(&Point3::origin(), 2.0);

        let order: Vec<_> = found.iter().map(|n| n.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_radius_zero_returns_coincident_only() {
        let points = vec![
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(1.0, 1.0, 1.0 + 1e-9),
            Point3::new(1.0, 1.0, 1.0),
        ];
        let index = SpatialIndex::build(&points);
        let found = index.within(&Point3::new(1.0, 1.0, 1.0), 0.0);

        let order: Vec<_> = found.iter().map(|n| n.index).collect();
        assert_eq!(order, vec![0, 2]);
        assert!(found.iter().all(|n| n.distance_sq == 0.0));
    }

    #[test]
    fn test_radius_search_early_exit() {
        let index = SpatialIndex::build(&line(10));
        let mut visited = 0;

        let flow = index.radius_search(&Point3::origin(), 100.0, |_| {
            visited += 1;
            if visited == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        assert_eq!(visited, 3);
        assert!(flow.is_break());
    }

    #[test]
    fn test_negative_radius_matches_nothing() {
        let index = SpatialIndex::build(&line(3));
        assert!(index.within(&Point3::origin(), -1.0).is_empty());
        assert!(index.within(&Point3::origin(), f64::NAN).is_empty());
    }

    #[test]
    fn test_many_coincident_points() {
        let points = vec![Point3::new(0.5, 0.5, 0.5); 40];
        let index = SpatialIndex::build(&points);
        assert_eq!(index.len(), 40);

        let found = index.within(&Point3::new(0.5, 0.5, 0.5), 0.0);
        let order: Vec<_> = found.iter().map(|n| n.index).collect();
        assert_eq!(order, (0..40).collect::<Vec<_>>());

        let found = index.k_nearest(&Point3::new(3.0, 3.0, 3.0), 3);
        let order: Vec<_> = found.iter().map(|n| n.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_relative_eq!(found[2].distance_sq, 3.0 * 2.5 * 2.5);
    }

    #[test]
    fn test_axis_aligned_grid() {
        let points: Vec<_> = (0..20)
            .flat_map(|i| (0..20).map(move |j| Point3::new(i as f64, j as f64, 1.0)))
            .collect();
        let index = SpatialIndex::build(&points);
        assert_eq!(index.len(), 400);

        let found = index.k_nearest(&Point3::new(5.0, 5.0, 1.0), 5);
        let order: Vec<_> = found.iter().map(|n| n.index).collect();
        assert_eq!(order, vec![105, 85, 104, 106, 125]);

        assert_eq!(index.within(&Point3::new(0.0, 0.0, 1.0), 1.0).len(), 3);
    }

    #[test]
    fn test_k_nearest_cut_inside_tie_group() {
        // Every integer point on the sphere of squared radius 50.
        let mut points = Vec::new();
        for x in -7_i32..=7 {
            for y in -7_i32..=7 {
                for z in -7_i32..=7 {
                    if x * x + y * y + z * z == 50 {
                        points.push(Point3::new(f64::from(x), f64::from(y), f64::from(z)));
                    }
                }
            }
        }
        assert!(points.len() > 32);
        let index = SpatialIndex::build(&points);

        let first: Vec<_> = index
            .k_nearest(&Point3::origin(), 1)
            .iter()
            .map(|n| n.index)
            .collect();
        assert_eq!(first, vec![0]);

        let found = index.k_nearest(&Point3::origin(), 3);
        let order: Vec<_> = found.iter().map(|n| n.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(found.iter().all(|n| n.distance_sq == 50.0));
    }

    #[test]
    fn test_nearest_first_matches_sorted_within() {
        // Repeated positions spread over several fetch rounds.
        let points: Vec<_> = (0..100)
            .map(|i| Point3::new((i % 37) as f64 * 0.25, 0.0, 0.0))
            .collect();
        let index = SpatialIndex::build(&points);
        let query = Point3::new(4.1, 0.0, 0.0);

        let mut visited = Vec::new();
        let flow = index.nearest_first(&query, 6.0, |neighbor| {
            visited.push(neighbor);
            ControlFlow::Continue(())
        });

        assert!(flow.is_continue());
        assert_eq!(visited, index.within(&query, 6.0));
        assert!(visited.len() > 2 * FIRST_BATCH);
    }

    #[test]
    fn test_nearest_first_stops_at_break() {
        let index = SpatialIndex::build(&line(50));
        let mut visited = Vec::new();

        let flow = index.nearest_first(&Point3::new(20.2, 0.0, 0.0), 100.0, |neighbor| {
            visited.push(neighbor.index);
            if visited.len() == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        assert!(flow.is_break());
        assert_eq!(visited, vec![20, 21, 19]);
    }

    #[test]
    fn test_nearest_first_respects_radius() {
        let index = SpatialIndex::build(&line(10));
        let mut visited = Vec::new();
        let _ = index.nearest_first(&Point3::origin(), 2.0, |neighbor| {
            visited.push(neighbor.index);
            ControlFlow::Continue(())
        });
        assert_eq!(visited, vec![0, 1, 2]);
        let flow = index.nearest_first(&Point3::origin(), -1.0, |_| ControlFlow::Break(()));
        assert!(flow.is_continue());
    }
}
