//! Property-based tests for the spatial index and compatible-point search.
//!
//! Every query is checked against a brute-force scan over the same points.
//!
//! Run with: cargo test -p mesh-scan-merge -- proptest

#![allow(clippy::unwrap_used)]

use std::ops::ControlFlow;

use mesh_scan_merge::{PointCloudScan, ScanParams, SpatialIndex};
use nalgebra::{Point3, Vector3};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn arb_point() -> impl Strategy<Value = Point3<f64>> {
    prop::array::uniform3(-100.0..100.0f64).prop_map(|[x, y, z]| Point3::new(x, y, z))
}

fn arb_unit_vector() -> impl Strategy<Value = Vector3<f64>> {
    prop::array::uniform3(-1.0..1.0f64)
        .prop_filter("needs a direction", |[x, y, z]| x * x + y * y + z * z > 1e-3)
        .prop_map(|[x, y, z]| Vector3::new(x, y, z).normalize())
}

fn arb_cloud(max: usize) -> impl Strategy<Value = Vec<Point3<f64>>> {
    prop::collection::vec(arb_point(), 1..=max)
}

/// Points on a coarse integer lattice: repeated positions, shared axis values
/// and equal distances are the norm rather than the exception.
fn arb_lattice_point() -> impl Strategy<Value = Point3<f64>> {
    prop::array::uniform3(-3i32..=3)
        .prop_map(|[x, y, z]| Point3::new(f64::from(x), f64::from(y), f64::from(z)))
}

fn arb_lattice_cloud(max: usize) -> impl Strategy<Value = Vec<Point3<f64>>> {
    prop::collection::vec(arb_lattice_point(), 1..=max)
}

/// An axis-aligned wall at a lattice height, sampled with repeats.
fn arb_flat_wall() -> impl Strategy<Value = Vec<Point3<f64>>> {
    (-3i32..=3, prop::collection::vec((0i32..12, 0i32..12), 80..=300)).prop_map(|(z, cells)| {
        cells
            .into_iter()
            .map(|(x, y)| Point3::new(f64::from(x) * 0.5, f64::from(y) * 0.5, f64::from(z)))
            .collect()
    })
}

fn brute_force_sorted(points: &[Point3<f64>], query: &Point3<f64>) -> Vec<(f64, usize)> {
    let mut all: Vec<(f64, usize)> = points
        .iter()
        .enumerate()
        .map(|(i, p)| ((p - query).norm_squared(), i))
        .collect();
    all.sort_by(|a, b| a.partial_cmp(b).unwrap());
    all
}

// =============================================================================
// Property Tests: Spatial Index
// =============================================================================

proptest! {
    /// k-nearest returns the same points as sorting all distances.
    #[test]
    fn k_nearest_matches_brute_force(
        points in arb_cloud(200),
        query in arb_point(),
        k in 1usize..30,
    ) {
        let index = SpatialIndex::build(&points);
        let found = index.k_nearest(&query, k);
        let expected = brute_force_sorted(&points, &query);

        prop_assert_eq!(found.len(), k.min(points.len()));
        for (neighbor, (distance_sq, i)) in found.iter().zip(&expected) {
            prop_assert_eq!(neighbor.index, *i);
            prop_assert!((neighbor.distance_sq - distance_sq).abs() <= 1e-9 * distance_sq.max(1.0));
        }
    }

    /// k-nearest results are sorted nearest first.
    #[test]
    fn k_nearest_is_sorted(points in arb_cloud(100), query in arb_point(), k in 1usize..50) {
        let index = SpatialIndex::build(&points);
        let found = index.k_nearest(&query, k);

        for pair in found.windows(2) {
            prop_assert!(pair[0].distance_sq <= pair[1].distance_sq);
        }
    }

    /// Radius search finds exactly the points inside the sphere.
    #[test]
    fn within_matches_brute_force(
        points in arb_cloud(200),
        query in arb_point(),
        radius in 0.0..80.0f64,
    ) {
        let index = SpatialIndex::build(&points);
        let found: Vec<usize> = index.within(&query, radius).iter().map(|n| n.index).collect();
        let expected: Vec<usize> = brute_force_sorted(&points, &query)
            .into_iter()
            .filter(|(d, _)| *d <= radius * radius)
            .map(|(_, i)| i)
            .collect();

        prop_assert_eq!(found, expected);
    }

    /// Non-finite points are never returned, whatever the query.
    #[test]
    fn invalid_points_never_returned(
        mut points in arb_cloud(100),
        query in arb_point(),
        hole in 0usize..100,
    ) {
        let hole = hole % points.len();
        points[hole] = Point3::new(f64::NAN, f64::NAN, f64::NAN);

        let index = SpatialIndex::build(&points);
        prop_assert_eq!(index.len(), points.len() - 1);
        prop_assert!(index.k_nearest(&query, points.len()).iter().all(|n| n.index != hole));
        prop_assert!(index.within(&query, 500.0).iter().all(|n| n.index != hole));
    }
}

// =============================================================================
// Property Tests: Degenerate Layouts
// =============================================================================

proptest! {
    /// On a lattice, k-nearest equals the brute-force (distance, index) prefix.
    #[test]
    fn lattice_k_nearest_follows_index_order(
        points in arb_lattice_cloud(300),
        query in arb_lattice_point(),
        k in 1usize..60,
    ) {
        let index = SpatialIndex::build(&points);
        let found: Vec<(f64, usize)> = index
            .k_nearest(&query, k)
            .iter()
            .map(|n| (n.distance_sq, n.index))
            .collect();
        let mut expected = brute_force_sorted(&points, &query);
        expected.truncate(k);

        prop_assert_eq!(found, expected);
    }

    /// On a lattice, radius search includes the whole boundary shell.
    #[test]
    fn lattice_within_matches_brute_force(
        points in arb_lattice_cloud(300),
        query in arb_lattice_point(),
        radius_sq in 0i32..30,
    ) {
        let radius = f64::from(radius_sq).sqrt();
        let index = SpatialIndex::build(&points);
        let found: Vec<usize> = index.within(&query, radius).iter().map(|n| n.index).collect();
        let expected: Vec<usize> = brute_force_sorted(&points, &query)
            .into_iter()
            .filter(|(d, _)| *d <= radius * radius)
            .map(|(_, i)| i)
            .collect();

        prop_assert_eq!(found, expected);
    }

    /// Nearest-first enumeration visits exactly the sorted radius result.
    #[test]
    fn lattice_nearest_first_is_sorted_within(
        points in arb_lattice_cloud(300),
        query in arb_lattice_point(),
        radius in 0.0..6.0f64,
    ) {
        let index = SpatialIndex::build(&points);
        let mut visited = Vec::new();
        let _ = index.nearest_first(&query, radius, |neighbor| {
            visited.push(neighbor);
            ControlFlow::Continue(())
        });

        prop_assert_eq!(visited, index.within(&query, radius));
    }

    /// Axis-aligned walls index and estimate normals without trouble.
    #[test]
    fn flat_wall_normals_are_axis_aligned(points in arb_flat_wall()) {
        let n = points.len();
        let mut scan = PointCloudScan::from_positions(points);
        scan.calculate_normals();

        prop_assert_eq!(scan.normals().len(), n);
        for normal in scan.normals() {
            prop_assert!(normal.x.abs() < 1e-9 && normal.y.abs() < 1e-9);
        }
    }
}

// =============================================================================
// Property Tests: Compatible Closest Point
// =============================================================================

proptest! {
    /// The compatible-point search agrees with a linear scan over candidates.
    #[test]
    fn compatible_point_matches_brute_force(
        points in arb_cloud(100),
        normals in prop::collection::vec(arb_unit_vector(), 100),
        query in arb_point(),
        direction in arb_unit_vector(),
        radius in 0.0..60.0f64,
    ) {
        let normals = normals[..points.len()].to_vec();
        let mut scan = PointCloudScan::from_positions(points.clone())
            .with_normals(normals)
            .unwrap()
            .with_params(ScanParams::new().with_closest_point_radius(radius));
        scan.build_index();

        let threshold = scan.params().compatibility_threshold;
        let expected = brute_force_sorted(&points, &query)
            .into_iter()
            .filter(|(d, _)| *d <= radius * radius)
            .find(|(_, i)| scan.normals()[*i].dot(&direction) >= threshold)
            .map(|(_, i)| i);

        prop_assert_eq!(scan.find_closest_compatible_point(&query, &direction).unwrap(), expected);
    }
}
