//! Removal of scan points that an existing surface already covers.
//!
//! The reconstructed surface is owned elsewhere; this module only needs to
//! ask it "is there anything near this world-space point?" through the
//! [`SurfaceQuery`] trait.

use std::ops::ControlFlow;

use nalgebra::Point3;
use rayon::prelude::*;
use tracing::info;

use crate::index::{is_finite, Neighbor, SpatialIndex};
use crate::scan::PointCloudScan;

/// Radius queries against already-reconstructed surface geometry.
///
/// Implementations are called from several threads at once, one query point
/// per call.
pub trait SurfaceQuery: Sync {
    /// Visits surface points within `radius` of the world-space `point`.
    /// The visitor may stop the enumeration with [`ControlFlow::Break`].
    fn for_each_within<F>(&self, point: &Point3<f64>, radius: f64, visitor: F)
    where
        F: FnMut(Neighbor) -> ControlFlow<()>;

    /// True if at least one surface point lies within `radius` of `point`.
    fn has_point_within(&self, point: &Point3<f64>, radius: f64) -> bool {
        let mut found = false;
        self.for_each_within(point, radius, |_| {
            found = true;
            ControlFlow::Break(())
        });
        found
    }
}

/// An index queried in the frame its points were given in.
impl SurfaceQuery for SpatialIndex {
    fn for_each_within<F>(&self, point: &Point3<f64>, radius: f64, visitor: F)
    where
        F: FnMut(Neighbor) -> ControlFlow<()>,
    {
        let _ = self.radius_search(point, radius, visitor);
    }
}

impl PointCloudScan {
    /// Invalidates every point whose world-space position lies within
    /// `distance` of the existing surface.
    ///
    /// Invalidated points get `NaN` coordinates; they keep their slot and
    /// cannot be restored. Only positions change: call
    /// [`sync_bounds`](Self::sync_bounds) and rebuild the index afterwards if
    /// they are needed.
    ///
    /// Returns the number of points invalidated by this call.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_scan_merge::{PointCloudScan, SpatialIndex};
    /// use nalgebra::Point3;
    ///
    /// let surface = SpatialIndex::build(&[Point3::new(1.0, 0.0, 0.0)]);
    /// let mut scan = PointCloudScan::from_positions(vec![
    ///     Point3::new(0.0, 0.0, 0.0),
    ///     Point3::new(1.01, 0.0, 0.0),
    /// ]);
    ///
    /// assert_eq!(scan.clean_overlap(&surface, 0.05), 1);
    /// assert!(scan.is_valid(0));
    /// assert!(!scan.is_valid(1));
    /// ```
    pub fn clean_overlap<S>(&mut self, surface: &S, distance: f64) -> usize
    where
        S: SurfaceQuery,
    {
        let transform = self.transform;
        let overlapping: Vec<bool> = self
            .positions
            .par_iter()
            .map(|p| {
                is_finite(p) && surface.has_point_within(&transform.transform_point(p), distance)
            })
            .collect();

        let mut removed = 0;
        for (position, _) in self
            .positions
            .iter_mut()
            .zip(overlapping)
            .filter(|(_, overlaps)| *overlaps)
        {
            *position = Point3::new(f64::NAN, f64::NAN, f64::NAN);
            removed += 1;
        }

        info!(
            scan = %self.name,
            distance,
            removed,
            remaining = self.positions.len() - self.invalid_count(),
            "Cleaned overlap with existing surface"
        );

        removed
    }
}
