//! Tunable parameters for scan queries and normal estimation.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// Parameters shared by the queries a [`PointCloudScan`](crate::PointCloudScan) runs.
///
/// # Example
///
/// ```
/// use mesh_scan_merge::ScanParams;
///
/// let params = ScanParams::new()
///     .with_closest_point_radius(0.02)
///     .with_pca_neighbors(30);
///
/// assert!(params.validate().is_ok());
/// assert_eq!(params.pca_neighbors, 30);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanParams {
    /// Default search radius for compatible-point queries, in local units. Default: 0.05.
    pub closest_point_radius: f64,

    /// Number of nearest neighbors used for PCA normal estimation. Default: 20.
    pub pca_neighbors: usize,

    /// Minimum dot product between a candidate's normal and the reference
    /// direction for the candidate to count as compatible. Default: 0.7.
    pub compatibility_threshold: f64,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            closest_point_radius: 0.05,
            pca_neighbors: 20,
            compatibility_threshold: 0.7,
        }
    }
}

impl ScanParams {
    /// Creates new parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default compatible-point search radius.
    #[must_use]
    pub const fn with_closest_point_radius(mut self, radius: f64) -> Self {
        self.closest_point_radius = radius;
        self
    }

    /// Sets the neighborhood size for PCA normals.
    #[must_use]
    pub const fn with_pca_neighbors(mut self, k: usize) -> Self {
        self.pca_neighbors = k;
        self
    }

    /// Sets the normal compatibility threshold.
    #[must_use]
    pub const fn with_compatibility_threshold(mut self, threshold: f64) -> Self {
        self.compatibility_threshold = threshold;
        self
    }

    /// Checks that every parameter is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidParameter`] if the radius is negative or not
    /// finite, if fewer than 3 PCA neighbors are requested, or if the
    /// threshold lies outside `[-1, 1]`.
    pub fn validate(&self) -> ScanResult<()> {
        if !self.closest_point_radius.is_finite() || self.closest_point_radius < 0.0 {
            return Err(ScanError::InvalidParameter(format!(
                "closest point radius must be finite and non-negative, got {}",
                self.closest_point_radius
            )));
        }

        // A plane needs three points; fewer always yields a degenerate covariance.
        if self.pca_neighbors < 3 {
            return Err(ScanError::InvalidParameter(format!(
                "PCA needs at least 3 neighbors, got {}",
                self.pca_neighbors
            )));
        }

        if !(-1.0..=1.0).contains(&self.compatibility_threshold) {
            return Err(ScanError::InvalidParameter(format!(
                "compatibility threshold must lie in [-1, 1], got {}",
                self.compatibility_threshold
            )));
        }

        Ok(())
    }
}
