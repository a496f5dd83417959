//! Point types and related functionality

use nalgebra::{Point3, Vector3};

/// A 3D point with floating point coordinates
pub type Point3f = Point3<f32>;

/// A 3D vector with floating point components
pub type Vector3f = Vector3<f32>;

/// Normalize a vector, returning zero when its length is below `eps`
pub fn normalize_or_zero(v: &Vector3f, eps: f32) -> Vector3f {
    let norm = v.norm();
    if norm < eps {
        Vector3f::zeros()
    } else {
        v / norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalize_or_zero() {
        let v = normalize_or_zero(&Vector3f::new(3.0, 0.0, 4.0), 1e-8);
        assert_relative_eq!(v.norm(), 1.0, epsilon = 1e-6);

        let tiny = normalize_or_zero(&Vector3f::new(1e-12, 0.0, 0.0), 1e-8);
        assert_eq!(tiny, Vector3f::zeros());
    }
}
