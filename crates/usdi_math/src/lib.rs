// Re-export glam for convenience
pub use glam::*;

// USDI math types
mod range;
pub use range::Range3d;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dvec3_creation() {
        let v = DVec3::new(1.0, 2.0, 3.0);
        assert_eq!(v.x, 1.0);
        assert_eq!(v.y, 2.0);
        assert_eq!(v.z, 3.0);
    }

    #[test]
    fn test_dmat4_translation() {
        let m = DMat4::from_translation(DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(m.transform_point3(DVec3::ZERO), DVec3::new(1.0, 2.0, 3.0));
    }
}
