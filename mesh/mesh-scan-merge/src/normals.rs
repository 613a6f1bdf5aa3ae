//! Normal estimation for scans.
//!
//! Triangulated scans get area-weighted vertex normals from their faces.
//! Unstructured scans get PCA normals over the k nearest neighbors, oriented
//! toward the local origin where the sensor is assumed to sit.
//!
//! # Example
//!
//! ```
//! use mesh_scan_merge::PointCloudScan;
//! use nalgebra::Point3;
//!
//! // A slanted plane in front of the sensor.
//! let positions: Vec<_> = (0..10)
//!     .flat_map(|i| (0..10).map(move |j| {
//!         let (x, y) = (f64::from(i) * 0.1, f64::from(j) * 0.1);
//!         Point3::new(x, y, 2.0 + 0.3 * x)
//!     }))
//!     .collect();
//!
//! let mut scan = PointCloudScan::from_positions(positions);
//! scan.calculate_normals();
//!
//! assert!(scan.has_normals());
//! // Oriented back toward the origin.
//! assert!(scan.normals()[0].z < 0.0);
//! ```

use std::time::Instant;

use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::index::{is_finite, SpatialIndex};
use crate::scan::{unit_or_zero, PointCloudScan};

impl PointCloudScan {
    /// Computes normals if the scan has none yet.
    ///
    /// Uses the faces when the scan is triangulated and PCA otherwise. Calling
    /// this on a scan that already has normals does nothing.
    pub fn calculate_normals(&mut self) {
        if self.has_normals() {
            return;
        }

        if self.has_faces() {
            self.calculate_normals_from_faces();
        } else {
            self.calculate_normals_pca();
        }
    }

    /// Replaces the normals with area-weighted averages of incident face
    /// normals.
    ///
    /// Each face contributes `(v1 - v0) × (v2 - v0)`, so winding order fixes
    /// orientation. Faces touching an invalidated point are skipped. Vertices
    /// without a usable contribution get the zero vector.
    pub fn calculate_normals_from_faces(&mut self) {
        let mut normals = vec![Vector3::zeros(); self.positions.len()];

        for &[a, b, c] in &self.faces {
            let (i0, i1, i2) = (a as usize, b as usize, c as usize);
            let (v0, v1, v2) = (self.positions[i0], self.positions[i1], self.positions[i2]);
            if !(is_finite(&v0) && is_finite(&v1) && is_finite(&v2)) {
                continue;
            }

            let n = (v1 - v0).cross(&(v2 - v0));
            normals[i0] += n;
            normals[i1] += n;
            normals[i2] += n;
        }

        self.normals = normals.iter().map(unit_or_zero).collect();

        debug!(
            scan = %self.name,
            faces = self.faces.len(),
            "Calculated normals from faces"
        );
    }

    /// Replaces the normals with PCA estimates.
    ///
    /// Uses the scan's spatial index if one is built; otherwise a temporary
    /// index is built for this call and dropped before returning.
    pub fn calculate_normals_pca(&mut self) {
        let start = Instant::now();
        let k = self.params.pca_neighbors;

        let scoped;
        let index = match self.index.as_ref() {
            Some(index) => index,
            None => {
                scoped = SpatialIndex::build(&self.positions);
                &scoped
            }
        };

        let positions = &self.positions;
        let normals: Vec<Vector3<f64>> = positions
            .par_iter()
            .map(|point| estimate_point_normal(point, index, positions, k))
            .collect();

        self.normals = normals;

        info!(
            scan = %self.name,
            points = self.positions.len(),
            k,
            elapsed_ms = start.elapsed().as_millis(),
            "Calculated normals with PCA"
        );
    }
}

/// PCA normal of one point: smallest-eigenvalue eigenvector of the covariance
/// of its `k` nearest neighbors, flipped to face the local origin.
fn estimate_point_normal(
    point: &Point3<f64>,
    index: &SpatialIndex,
    positions: &[Point3<f64>],
    k: usize,
) -> Vector3<f64> {
    if !is_finite(point) {
        return Vector3::zeros();
    }

    let neighbors = index.k_nearest(point, k);
    if neighbors.len() < 3 {
        return Vector3::zeros();
    }

    let centroid: Vector3<f64> = neighbors
        .iter()
        .map(|n| positions[n.index].coords)
        .sum::<Vector3<f64>>()
        / neighbors.len() as f64;

    let mut covariance = Matrix3::zeros();
    for n in &neighbors {
        let d = positions[n.index].coords - centroid;
        covariance += d * d.transpose();
    }

    let eigen = SymmetricEigen::new(covariance);
    let (min_idx, _) = eigen.eigenvalues.argmin();
    let mut normal = unit_or_zero(&eigen.eigenvectors.column(min_idx).into_owned());

    // The sensor is assumed to sit at the local origin.
    if normal.dot(&point.coords) > 0.0 {
        normal = -normal;
    }

    normal
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

    /// Grid on the plane `n · p = offset`, sampled over `n * n` points.
    fn slanted_plane(n: usize, normal: Vector3<f64>, offset: f64) -> Vec<Point3<f64>> {
        let normal = normal.normalize();
        let u = normal.cross(&Vector3::new(0.3, 0.5, 0.7)).normalize();
        let v = normal.cross(&u);
        let origin = normal * offset;

        (0..n)
            .flat_map(|i| {
                (0..n).map(move |j| {
                    Point3::from(origin + u * (i as f64 * 0.1) + v * (j as f64 * 0.1))
                })
            })
            .collect()
    }

    #[test]
    fn test_faces_single_triangle() {
        let mut scan = PointCloudScan::from_mesh(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
        .unwrap();
        scan.calculate_normals_from_faces();

        for normal in scan.normals() {
            assert_relative_eq!(*normal, Vector3::z());
        }
    }

    #[test]
    fn test_faces_winding_sets_orientation() {
        let mut scan = PointCloudScan::from_mesh(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 2, 1]],
        )
        .unwrap();
        scan.calculate_normals_from_faces();

        assert_relative_eq!(scan.normals()[0], -Vector3::z());
    }

    #[test]
    fn test_faces_unit_length_and_isolated_vertex() {
        // Two triangles folded along the x axis, plus an isolated point.
        let mut scan = PointCloudScan::from_mesh(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
                Point3::new(9.0, 9.0, 9.0),
            ],
            vec![[0, 1, 2], [0, 3, 1]],
        )
        .unwrap();
        scan.calculate_normals_from_faces();

        for normal in &scan.normals()[..4] {
            assert_relative_eq!(normal.norm(), 1.0, epsilon = 1e-12);
        }
        // Shared edge vertices average both faces.
        let expected = Vector3::new(0.0, 1.0, 1.0).normalize();
        assert_relative_eq!(scan.normals()[0], expected, epsilon = 1e-12);
        assert_eq!(scan.normals()[4], Vector3::zeros());
    }

    #[test]
    fn test_faces_degenerate_triangle_gives_zero() {
        let mut scan = PointCloudScan::from_mesh(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(2.0, 0.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
        .unwrap();
        scan.calculate_normals_from_faces();

        assert!(scan.normals().iter().all(|n| *n == Vector3::zeros()));
    }

    #[test]
    fn test_pca_plane_normals_face_origin() {
        let true_normal = Vector3::new(0.2, -0.1, 1.0).normalize();
        let mut scan = PointCloudScan::from_positions(slanted_plane(12, true_normal, 3.0));
        scan.calculate_normals_pca();

        assert_eq!(scan.normals().len(), scan.len());
        for normal in scan.normals() {
            // The plane lies on the +normal side of the origin, so the
            // estimate must point back along -normal.
            assert_relative_eq!(*normal, -true_normal, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_pca_plane_behind_origin_flips_other_way() {
        let true_normal = Vector3::new(0.0, 0.1, 1.0).normalize();
        let mut scan = PointCloudScan::from_positions(slanted_plane(8, true_normal, -2.0));
        scan.calculate_normals_pca();

        for normal in scan.normals() {
            assert_relative_eq!(*normal, true_normal, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_pca_uses_scoped_index() {
        let plane = slanted_plane(6, Vector3::new(0.1, 0.2, 1.0), 1.0);
        let mut scan = PointCloudScan::from_positions(plane.clone());
        scan.calculate_normals_pca();
        assert!(!scan.has_index());

        let mut indexed = PointCloudScan::from_positions(plane);
        indexed.build_index();
        indexed.calculate_normals_pca();
        assert!(indexed.has_index());
        assert_eq!(indexed.normals(), scan.normals());
    }

    #[test]
    fn test_pca_too_few_points_gives_zero() {
        let mut scan = PointCloudScan::from_positions(vec![
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, 1.0),
        ]);
        scan.calculate_normals_pca();

        assert_eq!(scan.normals().len(), 2);
        assert!(scan.normals().iter().all(|n| *n == Vector3::zeros()));
    }

    #[test]
    fn test_pca_skips_invalidated_points() {
        let mut positions = slanted_plane(6, Vector3::new(0.1, 0.2, 1.0), 1.0);
        positions[7] = Point3::new(f64::NAN, f64::NAN, f64::NAN);
        let mut scan = PointCloudScan::from_positions(positions);
        scan.calculate_normals_pca();

        assert_eq!(scan.normals()[7], Vector3::zeros());
        assert_relative_eq!(scan.normals()[0].norm(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_calculate_normals_is_noop_when_present() {
        let sentinel = Vector3::new(1.0, 0.0, 0.0);
        let plane = slanted_plane(5, Vector3::new(0.1, 0.2, 1.0), 1.0);
        let mut scan = PointCloudScan::from_positions(plane)
            .with_normals(vec![sentinel; 25])
            .unwrap();

        scan.calculate_normals();
        scan.calculate_normals();

        assert!(scan.normals().iter().all(|n| *n == sentinel));
    }

    #[test]
    fn test_calculate_normals_prefers_faces() {
        // PCA would fail here (3 points); faces give a clean answer.
        let mut scan = PointCloudScan::from_mesh(
            vec![
                Point3::new(0.0, 0.0, 1.0),
                Point3::new(1.0, 0.0, 1.0),
                Point3::new(0.0, 1.0, 1.0),
            ],
            vec![[0, 1, 2]],
        )
        .unwrap();
        scan.calculate_normals();

        assert_relative_eq!(scan.normals()[1], Vector3::z());
    }

    #[test]
    fn test_pca_axis_aligned_wall() {
        let positions: Vec<_> = (0..20)
            .flat_map(|i| (0..20).map(move |j| Point3::new(i as f64 * 0.1, j as f64 * 0.1, 1.0)))
            .collect();
        let mut scan = PointCloudScan::from_positions(positions);
        scan.calculate_normals();

        assert_eq!(scan.normals().len(), 400);
        for normal in scan.normals() {
            assert_relative_eq!(*normal, -Vector3::z(), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_pca_repeated_samples() {
        let mut positions = vec![Point3::new(0.3, 0.2, 1.0); 40];
        positions.extend(slanted_plane(6, Vector3::new(0.1, 0.2, 1.0), 1.0));
        let mut scan = PointCloudScan::from_positions(positions);
        scan.calculate_normals();

        assert_eq!(scan.normals().len(), 76);
        assert!(scan.normals().iter().all(|n| n.iter().all(|c| c.is_finite())));
    }
}
