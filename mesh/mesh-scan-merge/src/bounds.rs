//! Axis-aligned bounding box over scan points.

use nalgebra::{Affine3, Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box (AABB).
///
/// Only finite points ever enlarge the box, so invalidated scan points
/// (stored as `NaN`) are ignored.
///
/// # Example
///
/// ```
/// use mesh_scan_merge::Aabb;
/// use nalgebra::Point3;
///
/// let mut aabb = Aabb::empty();
/// assert!(aabb.is_empty());
///
/// aabb.expand_to_include(&Point3::new(1.0, 2.0, 3.0));
/// aabb.expand_to_include(&Point3::new(f64::NAN, f64::NAN, f64::NAN));
/// assert_eq!(aabb.min, Point3::new(1.0, 2.0, 3.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aabb {
    /// Minimum corner (smallest x, y, z values).
    pub min: Point3<f64>,
    /// Maximum corner (largest x, y, z values).
    pub max: Point3<f64>,
}

impl Aabb {
    /// Create a new AABB from minimum and maximum corners.
    ///
    /// The corners are swapped per axis if given in the wrong order.
    #[must_use]
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self {
            min: Point3::new(min.x.min(max.x), min.y.min(max.y), min.z.min(max.z)),
            max: Point3::new(min.x.max(max.x), min.y.max(max.y), min.z.max(max.z)),
        }
    }

    /// Create an empty AABB (min > max), ready to be expanded.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Create an AABB covering all finite points of an iterator.
    #[must_use]
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f64>>) -> Self {
        let mut aabb = Self::empty();
        aabb.expand(points);
        aabb
    }

    /// True if the box contains no point at all.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Width, height and depth of the box.
    #[inline]
    #[must_use]
    pub fn size(&self) -> Vector3<f64> {
        self.max - self.min
    }

    /// Center of the box.
    #[inline]
    #[must_use]
    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Length of the box diagonal; 0 for an empty box.
    #[inline]
    #[must_use]
    pub fn diagonal(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.size().norm()
    }

    /// Check if the AABB contains a point. Boundary points are inside.
    #[inline]
    #[must_use]
    pub fn contains(&self, point: &Point3<f64>) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// Expand the AABB to include a point. Non-finite points are ignored.
    pub fn expand_to_include(&mut self, point: &Point3<f64>) {
        if !point.coords.iter().all(|c| c.is_finite()) {
            return;
        }
        self.min.x = self.min.x.min(point.x);
        self.min.y = self.min.y.min(point.y);
        self.min.z = self.min.z.min(point.z);
        self.max.x = self.max.x.max(point.x);
        self.max.y = self.max.y.max(point.y);
        self.max.z = self.max.z.max(point.z);
    }

    /// Expand the AABB to include every finite point of an iterator.
    pub fn expand<'a>(&mut self, points: impl IntoIterator<Item = &'a Point3<f64>>) {
        for point in points {
            self.expand_to_include(point);
        }
    }

    /// The eight corner points of the box.
    #[must_use]
    pub fn corners(&self) -> [Point3<f64>; 8] {
        [
            Point3::new(self.min.x, self.min.y, self.min.z),
            Point3::new(self.max.x, self.min.y, self.min.z),
            Point3::new(self.min.x, self.max.y, self.min.z),
            Point3::new(self.max.x, self.max.y, self.min.z),
            Point3::new(self.min.x, self.min.y, self.max.z),
            Point3::new(self.max.x, self.min.y, self.max.z),
            Point3::new(self.min.x, self.max.y, self.max.z),
            Point3::new(self.max.x, self.max.y, self.max.z),
        ]
    }

    /// The smallest axis-aligned box enclosing this box after `transform`.
    ///
    /// An empty box stays empty.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_scan_merge::Aabb;
    /// use nalgebra::{Affine3, Point3, Translation3};
    ///
    /// let aabb = Aabb::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
    /// let shift = Affine3::from_matrix_unchecked(
    ///     Translation3::new(2.0, 0.0, 0.0).to_homogeneous(),
    /// );
    ///
    /// let moved = aabb.transformed(&shift);
    /// assert_eq!(moved.min, Point3::new(2.0, 0.0, 0.0));
    /// ```
    #[must_use]
    pub fn transformed(&self, transform: &Affine3<f64>) -> Self {
        if self.is_empty() {
            return *self;
        }
        let corners = self.corners().map(|c| transform.transform_point(&c));
        Self::from_points(corners.iter())
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}
