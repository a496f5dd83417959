//! Curvature statistics derived from normals and local neighborhoods
//!
//! The per-point statistic used throughout is the mean absolute cosine
//! between the point's normal and the directions to its nearest neighbors.
//! On a flat patch every direction is tangent and the value is zero; it grows
//! with the dihedral angle between the local surface and its neighbors.

use crate::nearest_neighbor::k_nearest_within;
use crate::normals::estimate_normals;
use geoattack_core::{Error, Point3f, Result, Vector3f};
use rayon::prelude::*;

/// Lower bound on direction length when normalizing neighbor offsets
pub const DIRECTION_EPS: f32 = 1e-12;

/// Mean `|<normalize(q - center), normal>|` over the given neighbors
pub fn neighborhood_alignment(
    points: &[Point3f],
    center: &Point3f,
    neighbors: &[usize],
    normal: &Vector3f,
) -> f32 {
    if neighbors.is_empty() {
        return 0.0;
    }
    let total: f32 = neighbors
        .iter()
        .map(|&q| {
            let v = points[q] - center;
            (v.dot(normal) / v.norm().max(DIRECTION_EPS)).abs()
        })
        .sum();
    total / neighbors.len() as f32
}

/// Per-point curvature reference of a cloud with known normals
///
/// Computed once per sample from the unperturbed cloud and reused for every
/// iteration of an attack.
pub fn theta_normal(points: &[Point3f], normals: &[Vector3f], k: usize) -> Result<Vec<f32>> {
    if points.len() != normals.len() {
        return Err(Error::ShapeMismatch {
            expected: vec![points.len()],
            found: vec![normals.len()],
        });
    }
    if k == 0 {
        return Err(Error::InvalidData(
            "curvature needs at least one neighbor".to_string(),
        ));
    }

    let neighbors = k_nearest_within(points, k);
    Ok(neighbors
        .par_iter()
        .enumerate()
        .map(|(i, indices)| neighborhood_alignment(points, &points[i], indices, &normals[i]))
        .collect())
}

/// Surface roughness of a cloud: the largest mean out-of-plane offset to its neighbors
///
/// Normals are estimated from `k_normal` neighbors; the offsets are measured
/// over `k` neighbors and are not normalized, so the result carries the
/// cloud's length units.
pub fn smoothness(points: &[Point3f], k_normal: usize, k: usize) -> Result<f32> {
    if k == 0 {
        return Err(Error::InvalidData(
            "smoothness needs at least one neighbor".to_string(),
        ));
    }
    let normals = estimate_normals(points, k_normal)?;
    let neighbors = k_nearest_within(points, k);

    let roughness = neighbors
        .par_iter()
        .enumerate()
        .map(|(i, indices)| {
            if indices.is_empty() {
                return 0.0;
            }
            let total: f32 = indices
                .iter()
                .map(|&q| (points[q] - points[i]).dot(&normals[i]).abs())
                .sum();
            total / indices.len() as f32
        })
        .reduce(|| 0.0f32, f32::max);

    Ok(roughness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn plane_grid() -> Vec<Point3f> {
        let mut points = Vec::new();
        for x in 0..5 {
            for y in 0..5 {
                points.push(Point3f::new(x as f32 * 0.1, y as f32 * 0.1, 0.0));
            }
        }
        points
    }

    #[test]
    fn test_theta_normal_flat_plane_is_zero() {
        let points = plane_grid();
        let normals = vec![Vector3f::z(); points.len()];
        let theta = theta_normal(&points, &normals, 6).unwrap();

        assert_eq!(theta.len(), points.len());
        for t in theta {
            assert_relative_eq!(t, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_theta_normal_detects_tilted_neighbors() {
        // Apex above a ring: every direction makes 45 degrees with the normal
        let mut points = vec![Point3f::new(0.0, 0.0, 1.0)];
        for i in 0..4 {
            let angle = i as f32 * std::f32::consts::FRAC_PI_2;
            points.push(Point3f::new(angle.cos(), angle.sin(), 0.0));
        }
        let normals = vec![Vector3f::z(); points.len()];
        let theta = theta_normal(&points, &normals, 4).unwrap();

        assert_relative_eq!(theta[0], std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-5);
    }

    #[test]
    fn test_theta_normal_validation() {
        let points = plane_grid();
        assert!(theta_normal(&points, &[Vector3f::z()], 4).is_err());
        assert!(theta_normal(&points, &vec![Vector3f::z(); points.len()], 0).is_err());
    }

    #[test]
    fn test_neighborhood_alignment_ignores_coincident_points() {
        let points = vec![Point3f::origin(), Point3f::origin()];
        let value = neighborhood_alignment(&points, &points[0], &[1], &Vector3f::z());
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_smoothness_plane_vs_bumpy() {
        let flat = plane_grid();
        let flat_value = smoothness(&flat, 8, 8).unwrap();
        assert!(flat_value < 1e-5);

        let mut bumpy = plane_grid();
        bumpy[12].z = 0.2;
        let bumpy_value = smoothness(&bumpy, 8, 8).unwrap();
        assert!(bumpy_value > flat_value);
    }
}
