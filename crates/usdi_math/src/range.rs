use glam::{DMat4, DVec3};

/// Double-precision axis-aligned range in 3D.
///
/// Unlike a ray-tracing AABB this type is allowed to be empty (min > max on
/// every axis) and is never padded, so a flat triangle keeps a zero-width
/// axis. Bounds are accumulated in double precision and narrowed to `f32`
/// only when they leave the library.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Range3d {
    pub min: DVec3,
    pub max: DVec3,
}

impl Default for Range3d {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Range3d {
    /// An empty range (contains nothing).
    pub const EMPTY: Range3d = Range3d {
        min: DVec3::splat(f64::INFINITY),
        max: DVec3::splat(f64::NEG_INFINITY),
    };

    /// Create a range from two corner points, in any order.
    pub fn new(a: DVec3, b: DVec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Create the smallest range containing every point.
    pub fn from_points<I: IntoIterator<Item = DVec3>>(points: I) -> Self {
        let mut range = Self::EMPTY;
        for p in points {
            range.extend_by_point(p);
        }
        range
    }

    /// True when the range contains nothing.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Grow the range to include a point.
    pub fn extend_by_point(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Grow the range to include another range. Empty ranges are ignored.
    pub fn union_with(&mut self, other: &Range3d) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Per-axis size (max - min). Zero for an empty range.
    pub fn size(&self) -> DVec3 {
        if self.is_empty() {
            DVec3::ZERO
        } else {
            self.max - self.min
        }
    }

    /// Center point of the range.
    pub fn midpoint(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Largest of the three per-axis extents.
    pub fn max_extent(&self) -> f64 {
        self.size().max_element()
    }

    /// Transform the range and return the axis-aligned range of the 8
    /// transformed corners.
    pub fn transformed(&self, matrix: &DMat4) -> Range3d {
        if self.is_empty() {
            return Self::EMPTY;
        }

        let (lo, hi) = (self.min, self.max);
        let corners = [
            DVec3::new(lo.x, lo.y, lo.z),
            DVec3::new(hi.x, lo.y, lo.z),
            DVec3::new(lo.x, hi.y, lo.z),
            DVec3::new(hi.x, hi.y, lo.z),
            DVec3::new(lo.x, lo.y, hi.z),
            DVec3::new(hi.x, lo.y, hi.z),
            DVec3::new(lo.x, hi.y, hi.z),
            DVec3::new(hi.x, hi.y, hi.z),
        ];

        Range3d::from_points(corners.iter().map(|&c| matrix.transform_point3(c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_range() {
        let range = Range3d::EMPTY;
        assert!(range.is_empty());
        assert_eq!(range.size(), DVec3::ZERO);
        assert!(Range3d::default().is_empty());
    }

    #[test]
    fn test_from_points_keeps_flat_axis() {
        let range = Range3d::from_points([
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
        ]);

        assert!(!range.is_empty());
        assert_eq!(range.min, DVec3::ZERO);
        assert_eq!(range.max, DVec3::new(1.0, 1.0, 0.0));
        assert_eq!(range.midpoint(), DVec3::new(0.5, 0.5, 0.0));
        assert_eq!(range.max_extent(), 1.0);
    }

    #[test]
    fn test_union_ignores_empty() {
        let mut range = Range3d::new(DVec3::ZERO, DVec3::ONE);
        range.union_with(&Range3d::EMPTY);
        assert_eq!(range, Range3d::new(DVec3::ZERO, DVec3::ONE));

        range.union_with(&Range3d::new(DVec3::splat(-1.0), DVec3::ZERO));
        assert_eq!(range.min, DVec3::splat(-1.0));
        assert_eq!(range.max, DVec3::ONE);
    }

    #[test]
    fn test_transformed_rotation() {
        let range = Range3d::new(DVec3::ZERO, DVec3::new(2.0, 1.0, 1.0));
        let rotated = range.transformed(&DMat4::from_rotation_z(std::f64::consts::FRAC_PI_2));

        // 90 degrees about Z maps +X to +Y
        assert!((rotated.min - DVec3::new(-1.0, 0.0, 0.0)).length() < 1e-9);
        assert!((rotated.max - DVec3::new(0.0, 2.0, 1.0)).length() < 1e-9);
    }

    #[test]
    fn test_transformed_empty_stays_empty() {
        let moved = Range3d::EMPTY.transformed(&DMat4::from_translation(DVec3::ONE));
        assert!(moved.is_empty());
    }
}
