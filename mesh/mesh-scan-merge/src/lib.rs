//! Per-scan spatial queries and normal estimation for incremental surface
//! merging.
//!
//! A [`PointCloudScan`] is one captured frame: positions in the scan's local
//! frame, optional normals, colors and triangles, plus a rigid placement into
//! world space. This crate answers the questions a merging pipeline asks of
//! each incoming scan:
//!
//! - **Normals** - area-weighted face normals, or PCA over k nearest neighbors
//! - **Spatial index** - k-nearest and inclusive radius queries over positions
//! - **Compatible closest point** - nearest point whose normal agrees with a
//!   reference direction
//! - **Overlap cleaning** - invalidate points that already-reconstructed
//!   geometry covers
//!
//! Invalidated points keep their slot with `NaN` coordinates so indices stay
//! stable for every attribute array.
//!
//! # Quick Start
//!
//! ```
//! use mesh_scan_merge::{PointCloudScan, ScanParams};
//! use nalgebra::{Point3, Vector3};
//!
//! let positions: Vec<_> = (0..8)
//!     .flat_map(|i| (0..8).map(move |j| {
//!         let (x, y) = (f64::from(i) * 0.05, f64::from(j) * 0.05);
//!         Point3::new(x, y, 1.0 + 0.2 * x + 0.1 * y)
//!     }))
//!     .collect();
//!
//! let mut scan = PointCloudScan::from_positions(positions)
//!     .with_name("frame-0")
//!     .with_params(ScanParams::new().with_closest_point_radius(0.1));
//! scan.initialize();
//! scan.build_index();
//!
//! let query = scan.positions()[10];
//! let normal = scan.normals()[10];
//! let hit = scan.find_closest_compatible_point(&query, &normal).unwrap();
//! assert_eq!(hit, Some(10));
//! ```
//!
//! # Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`scan`] | The scan container, placement and validity |
//! | [`index`] | k-d tree over scan positions |
//! | [`normals`] | Face and PCA normal estimation |
//! | [`query`] | Normal-compatible closest-point search |
//! | [`overlap`] | Overlap removal against an existing surface |
//! | [`bounds`] | Axis-aligned bounding boxes |
//! | [`params`] | Tunable thresholds |

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_const_for_fn)] // Not all functions benefit from const
#![allow(clippy::cast_precision_loss)] // Expected when converting counts to f64
#![allow(clippy::trivially_copy_pass_by_ref)] // Consistency in function signatures
#![allow(clippy::manual_let_else)] // Match expressions can be clearer

pub mod bounds;
pub mod error;
pub mod index;
pub mod normals;
pub mod overlap;
pub mod params;
pub mod query;
pub mod scan;

pub use bounds::Aabb;
pub use error::{ScanError, ScanResult};
pub use index::{Neighbor, SpatialIndex};
pub use overlap::SurfaceQuery;
pub use params::ScanParams;
pub use scan::{LabColor, PointCloudScan};
