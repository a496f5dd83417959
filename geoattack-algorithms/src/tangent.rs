//! Tangent-plane projection and tangent-plane noise

use crate::nearest_neighbor::k_nearest_within;
use crate::normals::{local_frame, LocalFrame};
use geoattack_core::{normalize_or_zero, Error, Point3f, Result, Vector3f};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

/// Remove the normal component of `v`
///
/// `normal` need not be unit length; a vanishing normal leaves `v` unchanged.
pub fn project_to_tangent_plane(v: &Vector3f, normal: &Vector3f) -> Vector3f {
    let n = normalize_or_zero(normal, 1e-12);
    v - n * v.dot(&n)
}

/// Random displacement of every point inside its estimated tangent plane
///
/// The tangent plane of each point is spanned by the two principal axes of
/// its `k` nearest neighbors. Each axis is scaled by an independent draw of
/// `sigma * N(0, 1)` clamped to `[-clip, clip]`. Random numbers are drawn in
/// point order, so a seeded `rng` yields a reproducible field.
pub fn tangent_jitter<R: Rng>(
    points: &[Point3f],
    k: usize,
    sigma: f32,
    clip: f32,
    rng: &mut R,
) -> Result<Vec<Vector3f>> {
    if k < 2 {
        return Err(Error::InvalidData(
            "tangent jitter needs at least 2 neighbors".to_string(),
        ));
    }
    if clip < 0.0 {
        return Err(Error::InvalidData("jitter clip must be non-negative".to_string()));
    }

    let neighbors = k_nearest_within(points, k);
    let frames: Vec<Option<LocalFrame>> = neighbors
        .par_iter()
        .map(|indices| local_frame(points, indices))
        .collect();

    Ok(frames
        .iter()
        .map(|frame| {
            let a: f32 = rng.sample(StandardNormal);
            let b: f32 = rng.sample(StandardNormal);
            match frame {
                Some(frame) => {
                    let [t1, t2] = frame.tangents;
                    let offset =
                        t1 * (sigma * a).clamp(-clip, clip) + t2 * (sigma * b).clamp(-clip, clip);
                    // eigenvectors are only orthogonal up to rounding
                    project_to_tangent_plane(&offset, &frame.normal)
                }
                None => Vector3f::zeros(),
            }
        })
        .collect())
}
