//! Surface-aware correction of point offsets
//!
//! After each optimizer step the offset of every candidate point from its
//! original position is compared with the original surface normal. Offsets
//! that move outward are kept; offsets that move into the surface are either
//! flattened into the tangent plane or dropped.

use crate::config::ProjectionMode;
use geoattack_core::{CloudBatch, Result, Vector3f};

/// Threshold below which an in-plane direction is considered undefined
pub const PROJECTION_EPS: f32 = 1e-6;

/// Correct a single offset against its normal
pub fn project_offset(offset: &Vector3f, normal: &Vector3f, mode: ProjectionMode) -> Vector3f {
    let inner = offset.dot(normal);
    if inner >= 0.0 {
        return *offset;
    }

    match mode {
        ProjectionMode::Clip => Vector3f::zeros(),
        ProjectionMode::Direction => {
            let across = normal.cross(offset);
            if across.norm() <= PROJECTION_EPS {
                return Vector3f::zeros();
            }
            let in_plane = across.cross(normal);
            let direction = in_plane / (in_plane.norm() + PROJECTION_EPS);
            direction * offset.dot(&direction)
        }
    }
}

/// Replace every candidate point by `original + project_offset(candidate - original)`
pub fn project_batch(
    candidate: &mut CloudBatch,
    original: &CloudBatch,
    normals: &CloudBatch,
    mode: ProjectionMode,
) -> Result<()> {
    candidate.ensure_same_shape(original)?;
    candidate.ensure_same_shape(normals)?;

    for k in 0..candidate.num_samples() {
        for i in 0..candidate.num_points() {
            let base = original.vector(k, i);
            let offset = candidate.vector(k, i) - base;
            let corrected = project_offset(&offset, &normals.vector(k, i), mode);
            candidate.set_vector(k, i, &(base + corrected));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geoattack_core::Point3f;

    #[test]
    fn test_outward_offset_is_kept() {
        let offset = Vector3f::new(0.3, -0.1, 0.2);
        let normal = Vector3f::z();
        assert_eq!(project_offset(&offset, &normal, ProjectionMode::Direction), offset);
        assert_eq!(project_offset(&offset, &normal, ProjectionMode::Clip), offset);
    }

    #[test]
    fn test_inward_offset_is_flattened() {
        let offset = Vector3f::new(0.3, -0.1, -0.2);
        let projected = project_offset(&offset, &Vector3f::z(), ProjectionMode::Direction);
        assert_relative_eq!(projected, Vector3f::new(0.3, -0.1, 0.0), epsilon = 1e-5);

        let clipped = project_offset(&offset, &Vector3f::z(), ProjectionMode::Clip);
        assert_eq!(clipped, Vector3f::zeros());
    }

    #[test]
    fn test_projection_is_idempotent() {
        let normal = Vector3f::new(0.2, 0.5, -0.8).normalize();
        let offset = Vector3f::new(0.4, -0.3, 0.6);
        let once = project_offset(&offset, &normal, ProjectionMode::Direction);
        let twice = project_offset(&once, &normal, ProjectionMode::Direction);
        assert_relative_eq!(once, twice, epsilon = 1e-5);
    }

    #[test]
    fn test_zero_offset_is_fixed_point() {
        for normal in [Vector3f::z(), Vector3f::new(-0.3, 0.9, 0.1), Vector3f::zeros()] {
            for mode in [ProjectionMode::Direction, ProjectionMode::Clip] {
                assert_eq!(project_offset(&Vector3f::zeros(), &normal, mode), Vector3f::zeros());
            }
        }
    }

    #[test]
    fn test_anti_parallel_offset_projects_to_zero() {
        let offset = Vector3f::new(0.0, 0.0, -0.5);
        let projected = project_offset(&offset, &Vector3f::z(), ProjectionMode::Direction);
        assert_eq!(projected, Vector3f::zeros());
    }

    #[test]
    fn test_project_batch() {
        let original =
            CloudBatch::from_points(&[vec![Point3f::origin(), Point3f::new(1.0, 0.0, 0.0)]])
                .unwrap();
        let normals = CloudBatch::from_vectors(&[vec![Vector3f::z(), Vector3f::z()]]).unwrap();
        let mut candidate = CloudBatch::from_points(&[vec![
            Point3f::new(0.1, 0.0, -0.1),
            Point3f::new(1.0, 0.0, 0.2),
        ]])
        .unwrap();

        project_batch(&mut candidate, &original, &normals, ProjectionMode::Direction).unwrap();
        assert_relative_eq!(candidate.vector(0, 0), Vector3f::new(0.1, 0.0, 0.0), epsilon = 1e-5);
        assert_eq!(candidate.point(0, 1), Point3f::new(1.0, 0.0, 0.2));

        let wrong = CloudBatch::zeros(1, 3);
        assert!(project_batch(&mut candidate, &wrong, &normals, ProjectionMode::Clip).is_err());
    }
}
