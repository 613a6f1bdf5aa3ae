//! The scan aggregate: raw geometry, placement and spatial index.
//!
//! Normal estimation, overlap filtering and compatible-point queries add
//! their own `impl PointCloudScan` blocks in [`crate::normals`],
//! [`crate::overlap`] and [`crate::query`].

use nalgebra::{Affine3, Point3, Vector3};
use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bounds::Aabb;
use crate::error::{ScanError, ScanResult};
use crate::index::{is_finite, SpatialIndex};
use crate::params::ScanParams;

/// Per-point color in 16-bit CIE-Lab.
///
/// Conversion to a display color space is left to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LabColor {
    /// Lightness.
    pub l: u16,
    /// Green–red component.
    pub a: u16,
    /// Blue–yellow component.
    pub b: u16,
}

impl LabColor {
    /// Creates a color from its three components.
    #[must_use]
    pub const fn new(l: u16, a: u16, b: u16) -> Self {
        Self { l, a, b }
    }
}

/// A single captured scan in its own local frame.
///
/// All per-point arrays are parallel to `positions` and indices never change:
/// points removed by overlap filtering stay in place with `NaN` coordinates.
///
/// # Example
///
/// ```
/// use mesh_scan_merge::PointCloudScan;
/// use nalgebra::{Affine3, Point3, Translation3};
///
/// let scan = PointCloudScan::from_positions(vec![
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
/// ])
/// .with_name("front")
/// .with_transform(Affine3::from_matrix_unchecked(
///     Translation3::new(0.0, 0.0, 5.0).to_homogeneous(),
/// ));
///
/// assert_eq!(scan.len(), 2);
/// assert_eq!(scan.position(1), Point3::new(1.0, 0.0, 5.0));
/// ```
#[derive(Debug)]
pub struct PointCloudScan {
    pub(crate) name: String,
    pub(crate) positions: Vec<Point3<f64>>,
    pub(crate) normals: Vec<Vector3<f64>>,
    pub(crate) colors: Vec<LabColor>,
    pub(crate) faces: Vec<[u32; 3]>,
    pub(crate) transform: Affine3<f64>,
    pub(crate) bounds: Aabb,
    pub(crate) index: Option<SpatialIndex>,
    pub(crate) params: ScanParams,
}

impl PointCloudScan {
    /// Creates an unstructured scan from local-space positions.
    #[must_use]
    pub fn from_positions(positions: Vec<Point3<f64>>) -> Self {
        let bounds = Aabb::from_points(&positions);
        Self {
            name: String::new(),
            positions,
            normals: Vec::new(),
            colors: Vec::new(),
            faces: Vec::new(),
            transform: Affine3::identity(),
            bounds,
            index: None,
            params: ScanParams::default(),
        }
    }

    /// Creates a triangulated scan.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::FaceIndexOutOfBounds`] if a face references a
    /// point that does not exist.
    pub fn from_mesh(positions: Vec<Point3<f64>>, faces: Vec<[u32; 3]>) -> ScanResult<Self> {
        let vertex_count = positions.len();
        for (face, triangle) in faces.iter().enumerate() {
            if let Some(&index) = triangle.iter().find(|&&v| v as usize >= vertex_count) {
                return Err(ScanError::FaceIndexOutOfBounds {
                    face,
                    index,
                    vertex_count,
                });
            }
        }

        let mut scan = Self::from_positions(positions);
        scan.faces = faces;
        Ok(scan)
    }

    /// Attaches per-point normals. Each one is normalized to unit length;
    /// zero vectors stay zero.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::AttributeLengthMismatch`] unless there is exactly
    /// one normal per point. An empty vector is accepted and means "no normals".
    pub fn with_normals(mut self, normals: Vec<Vector3<f64>>) -> ScanResult<Self> {
        if !normals.is_empty() {
            self.check_parallel("normals", normals.len())?;
        }
        self.normals = normals.iter().map(unit_or_zero).collect();
        Ok(self)
    }

    /// Attaches per-point colors.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::AttributeLengthMismatch`] unless the array is empty
    /// or has one color per point.
    pub fn with_colors(mut self, colors: Vec<LabColor>) -> ScanResult<Self> {
        if !colors.is_empty() {
            self.check_parallel("colors", colors.len())?;
        }
        self.colors = colors;
        Ok(self)
    }

    /// Sets the scan label used in log output.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the local → world placement.
    #[must_use]
    pub fn with_transform(mut self, transform: Affine3<f64>) -> Self {
        self.transform = transform;
        self
    }

    /// Sets the query parameters.
    #[must_use]
    pub fn with_params(mut self, params: ScanParams) -> Self {
        self.params = params;
        self
    }

    /// Prepares the scan for merging: computes normals if none were given.
    pub fn initialize(&mut self) {
        self.calculate_normals();
        debug!(
            scan = %self.name,
            points = self.positions.len(),
            faces = self.faces.len(),
            "Initialized scan"
        );
    }

    /// Scan label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of points, including invalidated ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True if the scan has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Local-space positions.
    #[must_use]
    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    /// Local-space unit normals; empty until computed.
    #[must_use]
    pub fn normals(&self) -> &[Vector3<f64>] {
        &self.normals
    }

    /// Per-point colors; may be empty.
    #[must_use]
    pub fn colors(&self) -> &[LabColor] {
        &self.colors
    }

    /// Triangle indices; empty for an unstructured cloud.
    #[must_use]
    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    /// True once every point has a normal.
    #[must_use]
    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    /// True if the scan has triangle topology.
    #[must_use]
    pub fn has_faces(&self) -> bool {
        !self.faces.is_empty()
    }

    /// True if the scan carries colors.
    #[must_use]
    pub fn has_colors(&self) -> bool {
        !self.colors.is_empty()
    }

    /// Local → world placement.
    #[must_use]
    pub const fn transform(&self) -> &Affine3<f64> {
        &self.transform
    }

    /// Replaces the placement. Local data, bounds and index are unaffected.
    pub fn set_transform(&mut self, transform: Affine3<f64>) {
        self.transform = transform;
    }

    /// Query parameters.
    #[must_use]
    pub const fn params(&self) -> &ScanParams {
        &self.params
    }

    /// Replaces the query parameters.
    pub fn set_params(&mut self, params: ScanParams) {
        self.params = params;
    }

    /// World-space position of point `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    #[must_use]
    pub fn position(&self, idx: usize) -> Point3<f64> {
        self.transform.transform_point(&self.positions[idx])
    }

    /// World-space normal of point `idx`: the local normal mapped through the
    /// linear part of the placement (no translation, no renormalization).
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds or normals have not been computed.
    #[must_use]
    pub fn normal(&self, idx: usize) -> Vector3<f64> {
        self.transform.transform_vector(&self.normals[idx])
    }

    /// False if point `idx` has been invalidated.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    #[must_use]
    pub fn is_valid(&self, idx: usize) -> bool {
        is_finite(&self.positions[idx])
    }

    /// Indices of all points that have not been invalidated.
    pub fn valid_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.positions
            .iter()
            .enumerate()
            .filter(|(_, p)| is_finite(p))
            .map(|(i, _)| i)
    }

    /// Number of invalidated points.
    #[must_use]
    pub fn invalid_count(&self) -> usize {
        self.positions.iter().filter(|p| !is_finite(p)).count()
    }

    /// Local-space bounding box of the finite positions.
    #[must_use]
    pub const fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    /// Bounding box of the scan in world space.
    #[must_use]
    pub fn transformed_bounds(&self) -> Aabb {
        self.bounds.transformed(&self.transform)
    }

    /// Re-expands the bounding box over the current positions.
    ///
    /// Expansion is additive: the box never shrinks, even when points have
    /// since been invalidated.
    pub fn sync_bounds(&mut self) {
        self.bounds.expand(&self.positions);
    }

    /// Builds the spatial index over the current local positions, replacing
    /// any previous one.
    pub fn build_index(&mut self) {
        self.index = Some(SpatialIndex::build(&self.positions));
    }

    /// Drops the spatial index, if any.
    pub fn discard_index(&mut self) {
        self.index = None;
    }

    /// True if a spatial index is currently held.
    #[must_use]
    pub const fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// The spatial index, if built.
    #[must_use]
    pub const fn index(&self) -> Option<&SpatialIndex> {
        self.index.as_ref()
    }

    fn check_parallel(&self, attribute: &'static str, actual: usize) -> ScanResult<()> {
        if actual == self.positions.len() {
            Ok(())
        } else {
            Err(ScanError::AttributeLengthMismatch {
                attribute,
                expected: self.positions.len(),
                actual,
            })
        }
    }
}

/// Unit vector in the direction of `v`, or zero if it has no usable direction.
pub(crate) fn unit_or_zero(v: &Vector3<f64>) -> Vector3<f64> {
    v.try_normalize(0.0)
        .filter(|n| n.iter().all(|c| c.is_finite()))
        .unwrap_or_else(Vector3::zeros)
}
