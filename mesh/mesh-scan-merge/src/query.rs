//! Normal-aware closest-point search for correspondence finding.
//!
//! A candidate only counts if its normal faces roughly the same way as the
//! reference direction, which keeps a query near a thin sheet from snapping
//! to the sheet's back side.

use std::ops::ControlFlow;

use nalgebra::{Point3, Vector3};

use crate::error::{ScanError, ScanResult};
use crate::scan::{unit_or_zero, PointCloudScan};

impl PointCloudScan {
    /// Closest point within the configured
    /// [`closest_point_radius`](crate::ScanParams::closest_point_radius) whose
    /// normal is compatible with `direction`.
    ///
    /// Both `point` and `direction` are in the scan's local frame. Returns
    /// `Ok(None)` if no point qualifies.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::IndexNotBuilt`] if [`build_index`](Self::build_index)
    /// has not been called, and [`ScanError::NormalsNotComputed`] if the scan
    /// has no normals. The index is never built implicitly here.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_scan_merge::PointCloudScan;
    /// use nalgebra::{Point3, Vector3};
    ///
    /// let mut scan = PointCloudScan::from_positions(vec![
    ///     Point3::new(0.0, 0.0, 0.0),
    ///     Point3::new(0.0, 0.0, 0.01),
    /// ])
    /// .with_normals(vec![Vector3::z(), -Vector3::z()])
    /// .unwrap();
    /// scan.build_index();
    ///
    /// let hit = scan
    ///     .find_closest_compatible_point(&Point3::new(0.0, 0.0, 0.009), &-Vector3::z())
    ///     .unwrap();
    /// assert_eq!(hit, Some(1));
    /// ```
    pub fn find_closest_compatible_point(
        &self,
        point: &Point3<f64>,
        direction: &Vector3<f64>,
    ) -> ScanResult<Option<usize>> {
        self.find_closest_compatible_point_with_radius(
            point,
            direction,
            self.params.closest_point_radius,
        )
    }

    /// Same as [`find_closest_compatible_point`](Self::find_closest_compatible_point)
    /// with an explicit search radius. Points exactly at `radius` count.
    ///
    /// # Errors
    ///
    /// See [`find_closest_compatible_point`](Self::find_closest_compatible_point).
    pub fn find_closest_compatible_point_with_radius(
        &self,
        point: &Point3<f64>,
        direction: &Vector3<f64>,
        radius: f64,
    ) -> ScanResult<Option<usize>> {
        let index = self.index.as_ref().ok_or(ScanError::IndexNotBuilt)?;
        if !self.has_normals() {
            return Err(ScanError::NormalsNotComputed);
        }

        let threshold = self.params.compatibility_threshold;
        let mut best = None;

        // Candidates arrive nearest first, so the first compatible one wins.
        let _ = index.nearest_first(point, radius, |candidate| {
            if self.normals[candidate.index].dot(direction) >= threshold {
                best = Some(candidate.index);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        Ok(best)
    }

    /// World-space variant: maps `point` and `direction` into the local frame
    /// with the inverse placement, then searches with the configured radius
    /// (measured in local units).
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::SingularTransform`] if the placement cannot be
    /// inverted, plus the errors of
    /// [`find_closest_compatible_point`](Self::find_closest_compatible_point).
    pub fn find_closest_compatible_point_world(
        &self,
        point: &Point3<f64>,
        direction: &Vector3<f64>,
    ) -> ScanResult<Option<usize>> {
        let inverse = self
            .transform
            .try_inverse()
            .ok_or(ScanError::SingularTransform)?;

        let local_point = inverse.transform_point(point);
        let local_direction = unit_or_zero(&inverse.transform_vector(direction));

        self.find_closest_compatible_point(&local_point, &local_direction)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::params::ScanParams;
    use nalgebra::{Affine3, Matrix4, Rotation3, Translation3};
    use std::f64::consts::FRAC_PI_2;

    fn indexed(positions: Vec<Point3<f64>>, normals: Vec<Vector3<f64>>) -> PointCloudScan {
        let mut scan = PointCloudScan::from_positions(positions)
            .with_normals(normals)
            .unwrap()
            .with_params(ScanParams::new().with_closest_point_radius(1.0));
        scan.build_index();
        scan
    }

    #[test]
    fn test_requires_index() {
        let scan = PointCloudScan::from_positions(vec![Point3::origin()])
            .with_normals(vec![Vector3::z()])
            .unwrap();

        let result = scan.find_closest_compatible_point(&Point3::origin(), &Vector3::z());
        assert!(matches!(result, Err(ScanError::IndexNotBuilt)));
        assert!(!scan.has_index());
    }

    #[test]
    fn test_requires_normals() {
        let mut scan = PointCloudScan::from_positions(vec![Point3::origin()]);
        scan.build_index();

        let result = scan.find_closest_compatible_point(&Point3::origin(), &Vector3::z());
        assert!(matches!(result, Err(ScanError::NormalsNotComputed)));
    }

    #[test]
    fn test_rejects_opposite_facing_point() {
        let scan = indexed(
            vec![Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, 0.0)],
            vec![-Vector3::z(), Vector3::z()],
        );

        let hit = scan
            .find_closest_compatible_point(&Point3::new(0.0, 0.0, 0.1), &Vector3::z())
            .unwrap();
        assert_eq!(hit, Some(1));

        let hit = scan
            .find_closest_compatible_point(&Point3::new(0.0, 0.0, 0.1), &-Vector3::z())
            .unwrap();
        assert_eq!(hit, Some(0));
    }

    #[test]
    fn test_closer_incompatible_point_is_skipped() {
        let scan = indexed(
            vec![Point3::new(0.0, 0.0, 0.05), Point3::new(0.0, 0.0, 0.5)],
            vec![-Vector3::z(), Vector3::z()],
        );

        let hit = scan
            .find_closest_compatible_point(&Point3::origin(), &Vector3::z())
            .unwrap();
        assert_eq!(hit, Some(1));
    }

    #[test]
    fn test_picks_closest_compatible() {
        let scan = indexed(
            vec![
                Point3::new(0.5, 0.0, 0.0),
                Point3::new(0.2, 0.0, 0.0),
                Point3::new(0.3, 0.0, 0.0),
            ],
            vec![Vector3::z(); 3],
        );

        let hit = scan
            .find_closest_compatible_point(&Point3::origin(), &Vector3::z())
            .unwrap();
        assert_eq!(hit, Some(1));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // Perpendicular normal: dot is exactly zero.
        let mut scan = indexed(vec![Point3::origin()], vec![Vector3::x()]);

        scan.set_params(
            ScanParams::new()
                .with_closest_point_radius(1.0)
                .with_compatibility_threshold(0.0),
        );
        let hit = scan
            .find_closest_compatible_point(&Point3::origin(), &Vector3::z())
            .unwrap();
        assert_eq!(hit, Some(0));

        scan.set_params(
            ScanParams::new()
                .with_closest_point_radius(1.0)
                .with_compatibility_threshold(0.01),
        );
        let hit = scan
            .find_closest_compatible_point(&Point3::origin(), &Vector3::z())
            .unwrap();
        assert_eq!(hit, None);
    }

    #[test]
    fn test_not_found_outside_radius() {
        let scan = indexed(vec![Point3::new(2.0, 0.0, 0.0)], vec![Vector3::z()]);

        let hit = scan
            .find_closest_compatible_point(&Point3::origin(), &Vector3::z())
            .unwrap();
        assert_eq!(hit, None);

        let hit = scan
            .find_closest_compatible_point_with_radius(&Point3::origin(), &Vector3::z(), 2.0)
            .unwrap();
        assert_eq!(hit, Some(0));
    }

    #[test]
    fn test_invalidated_points_never_match() {
        let mut scan = PointCloudScan::from_positions(vec![
            Point3::new(f64::NAN, f64::NAN, f64::NAN),
            Point3::new(0.5, 0.0, 0.0),
        ])
        .with_normals(vec![Vector3::z(), Vector3::z()])
        .unwrap()
        .with_params(ScanParams::new().with_closest_point_radius(1.0));
        scan.build_index();

        let hit = scan
            .find_closest_compatible_point(&Point3::origin(), &Vector3::z())
            .unwrap();
        assert_eq!(hit, Some(1));
    }

    #[test]
    fn test_world_query_uses_inverse_placement() {
        let rotation = Rotation3::from_axis_angle(&Vector3::x_axis(), FRAC_PI_2);
        let placement: Matrix4<f64> =
            Translation3::new(0.0, 0.0, 10.0).to_homogeneous() * rotation.to_homogeneous();

        let mut scan = indexed(
            vec![Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, 0.0)],
            vec![Vector3::z(), -Vector3::z()],
        );
        scan.set_transform(Affine3::from_matrix_unchecked(placement));

        // Local +z maps to world -y after the rotation.
        let world_point = scan.position(0);
        let hit = scan
            .find_closest_compatible_point_world(&world_point, &-Vector3::y())
            .unwrap();
        assert_eq!(hit, Some(0));

        let hit = scan
            .find_closest_compatible_point_world(&world_point, &Vector3::y())
            .unwrap();
        assert_eq!(hit, Some(1));
    }

    #[test]
    fn test_world_query_singular_transform() {
        let mut scan = indexed(vec![Point3::origin()], vec![Vector3::z()]);
        scan.set_transform(Affine3::from_matrix_unchecked(
            Matrix4::new_nonuniform_scaling(&Vector3::new(1.0, 0.0, 1.0)),
        ));

        let result = scan.find_closest_compatible_point_world(&Point3::origin(), &Vector3::z());
        assert!(matches!(result, Err(ScanError::SingularTransform)));
    }

    #[test]
    fn test_stops_at_nearest_compatible_among_many() {
        // A long row of back-facing points with one front-facing point in
        // the middle of the ball.
        let positions: Vec<_> = (0..200)
            .map(|i| Point3::new(f64::from(i) * 0.01, 0.0, 0.0))
            .collect();
        let mut normals = vec![-Vector3::z(); 200];
        normals[150] = Vector3::z();
        normals[10] = Vector3::z();
        let scan = indexed(positions, normals);

        let hit = scan
            .find_closest_compatible_point(&Point3::new(1.48, 0.0, 0.0), &Vector3::z())
            .unwrap();
        assert_eq!(hit, Some(150));
    }
}
