//! Normal estimation algorithms
//!
//! Normals and tangent planes come from the eigen-decomposition of the local
//! covariance of each point's neighborhood: the eigenvector of the smallest
//! eigenvalue is the normal, the other two span the tangent plane.

use crate::nearest_neighbor::{k_nearest_within, nearest_correspondences};
use geoattack_core::{Error, Matrix3, Point3f, Result, Vector3f};
use rayon::prelude::*;

/// Principal axes of a point neighborhood
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    /// Eigenvector of the smallest covariance eigenvalue
    pub normal: Vector3f,
    /// Eigenvectors of the two largest eigenvalues, largest first
    pub tangents: [Vector3f; 2],
    /// Eigenvalues sorted ascending
    pub eigenvalues: [f32; 3],
}

/// Sample covariance of the selected points around their own mean
///
/// Uses the unbiased `1 / (k - 1)` factor. Returns `None` for fewer than two points.
pub fn neighborhood_covariance(points: &[Point3f], indices: &[usize]) -> Option<Matrix3<f32>> {
    if indices.len() < 2 {
        return None;
    }

    let n = indices.len() as f32;
    let mean = indices
        .iter()
        .fold(Vector3f::zeros(), |acc, &i| acc + points[i].coords)
        / n;

    let mut covariance = Matrix3::zeros();
    for &i in indices {
        let diff = points[i].coords - mean;
        covariance += diff * diff.transpose();
    }
    Some(covariance / (n - 1.0))
}

/// Principal axes of the neighborhood given by `indices`
pub fn local_frame(points: &[Point3f], indices: &[usize]) -> Option<LocalFrame> {
    let covariance = neighborhood_covariance(points, indices)?;
    let eigen = covariance.symmetric_eigen();

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[a]
            .partial_cmp(&eigen.eigenvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let axis = |i: usize| -> Vector3f { eigen.eigenvectors.column(order[i]).into_owned() };

    Some(LocalFrame {
        normal: axis(0),
        tangents: [axis(2), axis(1)],
        eigenvalues: [
            eigen.eigenvalues[order[0]],
            eigen.eigenvalues[order[1]],
            eigen.eigenvalues[order[2]],
        ],
    })
}

/// Estimate unit normals for a point cloud using its k nearest neighbors
///
/// Normals are unoriented (the sign of each eigenvector is arbitrary); use
/// [`orient_normals_outward`] when an outward orientation is needed. Points
/// whose neighborhood is degenerate get the +Z axis.
pub fn estimate_normals(points: &[Point3f], k: usize) -> Result<Vec<Vector3f>> {
    if k < 2 {
        return Err(Error::InvalidData(
            "normal estimation needs at least 2 neighbors".to_string(),
        ));
    }
    if points.len() < 3 {
        return Err(Error::InvalidData(
            "normal estimation needs at least 3 points".to_string(),
        ));
    }

    let neighbors = k_nearest_within(points, k);
    Ok(neighbors
        .par_iter()
        .map(|indices| {
            local_frame(points, indices)
                .map(|frame| frame.normal)
                .unwrap_or_else(Vector3f::z)
        })
        .collect())
}

/// Flip each normal so that it points away from the cloud centroid
pub fn orient_normals_outward(points: &[Point3f], normals: &mut [Vector3f]) {
    if points.is_empty() {
        return;
    }
    let centroid = points
        .iter()
        .fold(Vector3f::zeros(), |acc, p| acc + p.coords)
        / points.len() as f32;

    for (point, normal) in points.iter().zip(normals.iter_mut()) {
        if normal.dot(&(point.coords - centroid)) < 0.0 {
            *normal = -*normal;
        }
    }
}

/// Give every point the normal of its nearest point in a denser reference cloud
pub fn transfer_normals(
    points: &[Point3f],
    reference_points: &[Point3f],
    reference_normals: &[Vector3f],
) -> Result<Vec<Vector3f>> {
    if reference_points.len() != reference_normals.len() {
        return Err(Error::ShapeMismatch {
            expected: vec![reference_points.len()],
            found: vec![reference_normals.len()],
        });
    }
    if reference_points.is_empty() {
        return Err(Error::InvalidData("reference cloud is empty".to_string()));
    }

    Ok(nearest_correspondences(points, reference_points)
        .into_iter()
        .map(|(idx, _)| reference_normals[idx])
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn plane_grid() -> Vec<Point3f> {
        let mut points = Vec::new();
        for x in 0..6 {
            for y in 0..6 {
                points.push(Point3f::new(x as f32 * 0.1, y as f32 * 0.1, 0.0));
            }
        }
        points
    }

    #[test]
    fn test_local_frame_of_plane() {
        let points = plane_grid();
        let indices: Vec<usize> = (0..points.len()).collect();
        let frame = local_frame(&points, &indices).unwrap();

        assert_relative_eq!(frame.normal.z.abs(), 1.0, epsilon = 1e-5);
        assert!(frame.eigenvalues[0].abs() < 1e-6);
        assert!(frame.eigenvalues[0] <= frame.eigenvalues[1]);
        assert!(frame.eigenvalues[1] <= frame.eigenvalues[2]);
        for t in &frame.tangents {
            assert!(t.z.abs() < 1e-5);
        }
    }

    #[test]
    fn test_local_frame_needs_two_points() {
        let points = plane_grid();
        assert!(local_frame(&points, &[0]).is_none());
    }

    #[test]
    fn test_estimate_normals_plane() {
        let points = plane_grid();
        let normals = estimate_normals(&points, 8).unwrap();

        assert_eq!(normals.len(), points.len());
        for n in &normals {
            assert_relative_eq!(n.z.abs(), 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_estimate_normals_validation() {
        let points = plane_grid();
        assert!(estimate_normals(&points, 1).is_err());
        assert!(estimate_normals(&points[..2], 4).is_err());
    }

    #[test]
    fn test_orient_normals_outward() {
        let points = vec![Point3f::new(1.0, 0.0, 0.0), Point3f::new(-1.0, 0.0, 0.0)];
        let mut normals = vec![Vector3f::new(-1.0, 0.0, 0.0), Vector3f::new(-1.0, 0.0, 0.0)];
        orient_normals_outward(&points, &mut normals);

        assert_eq!(normals[0], Vector3f::new(1.0, 0.0, 0.0));
        assert_eq!(normals[1], Vector3f::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn test_transfer_normals() {
        let reference = vec![Point3f::new(0.0, 0.0, 0.0), Point3f::new(1.0, 0.0, 0.0)];
        let normals = vec![Vector3f::x(), Vector3f::y()];
        let query = vec![Point3f::new(0.9, 0.1, 0.0), Point3f::new(0.2, 0.0, 0.0)];

        let transferred = transfer_normals(&query, &reference, &normals).unwrap();
        assert_eq!(transferred, vec![Vector3f::y(), Vector3f::x()]);

        assert!(transfer_normals(&query, &reference, &normals[..1]).is_err());
    }
}
