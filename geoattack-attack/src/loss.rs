//! Loss library
//!
//! Every loss returns its value together with its gradient. Classification
//! losses act on one row of class scores and return the gradient with respect
//! to those scores; fidelity losses act on one candidate cloud and return the
//! gradient with respect to each candidate point. Nearest-neighbor
//! assignments, farthest-point seeds and ball-query groups are held fixed
//! while differentiating.

use crate::config::{AttackMode, UniformityTerm};
use crate::model::argmax;
use geoattack_algorithms::{
    ball_query, farthest_point_sample, k_nearest_within, nearest_correspondences,
    neighborhood_alignment, DIRECTION_EPS,
};
use geoattack_core::{Error, Point3f, Result, Vector3f};
use ndarray::{Array1, ArrayView1};

/// A loss on one row of class scores
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreLoss {
    pub value: f32,
    /// Gradient with respect to the scores
    pub grad: Array1<f32>,
}

impl ScoreLoss {
    pub fn zero(num_classes: usize) -> Self {
        Self {
            value: 0.0,
            grad: Array1::zeros(num_classes),
        }
    }
}

/// A loss on one candidate cloud
#[derive(Debug, Clone, PartialEq)]
pub struct PointLoss {
    pub value: f32,
    /// Gradient with respect to every candidate point
    pub grad: Vec<Vector3f>,
}

impl PointLoss {
    pub fn zero(num_points: usize) -> Self {
        Self {
            value: 0.0,
            grad: vec![Vector3f::zeros(); num_points],
        }
    }
}

/// Hinge on the score gap between the target class and the best other class
///
/// Targeted attacks minimize `max(other - fake + confidence, 0)`, untargeted
/// ones `max(fake - other + confidence, 0)`, where `fake` is the score of
/// `target` and `other` the highest score of any other class.
pub fn margin_loss(
    scores: ArrayView1<'_, f32>,
    target: usize,
    confidence: f32,
    mode: AttackMode,
) -> ScoreLoss {
    let num_classes = scores.len();
    let mut loss = ScoreLoss::zero(num_classes);
    if num_classes < 2 {
        return loss;
    }

    let mut other = if target == 0 { 1 } else { 0 };
    for (j, &s) in scores.iter().enumerate() {
        if j != target && s > scores[other] {
            other = j;
        }
    }

    let fake = scores[target];
    let (gap, sign) = match mode {
        AttackMode::Targeted => (scores[other] - fake, 1.0),
        AttackMode::Untargeted => (fake - scores[other], -1.0),
    };

    let value = gap + confidence;
    if value > 0.0 {
        loss.value = value;
        loss.grad[other] = sign;
        loss.grad[target] = -sign;
    }
    loss
}

/// Softmax cross-entropy against `target`, negated for untargeted attacks
pub fn cross_entropy_loss(
    scores: ArrayView1<'_, f32>,
    target: usize,
    mode: AttackMode,
) -> ScoreLoss {
    let max = scores[argmax(scores)];
    let exp = scores.mapv(|s| (s - max).exp());
    let sum = exp.sum();
    let log_sum_exp = max + sum.ln();

    let mut grad = exp / sum;
    grad[target] -= 1.0;
    let mut value = log_sum_exp - scores[target];

    if mode == AttackMode::Untargeted {
        value = -value;
        grad.mapv_inplace(|g| -g);
    }
    ScoreLoss { value, grad }
}

/// Nearest-neighbor assignments between a candidate cloud and its original
#[derive(Debug, Clone, PartialEq)]
pub struct NearestMatches {
    /// For every candidate point: nearest original index and squared distance
    pub to_original: Vec<(usize, f32)>,
    /// For every original point: nearest candidate index and squared distance
    pub to_candidate: Option<Vec<(usize, f32)>>,
}

impl NearestMatches {
    /// Match candidate to original, and original back to candidate when `both_ways`
    pub fn new(candidate: &[Point3f], original: &[Point3f], both_ways: bool) -> Self {
        Self {
            to_original: nearest_correspondences(candidate, original),
            to_candidate: both_ways.then(|| nearest_correspondences(original, candidate)),
        }
    }
}

/// Mean squared displacement of each point from its counterpart
pub fn l2_loss(candidate: &[Point3f], original: &[Point3f]) -> PointLoss {
    let n = candidate.len();
    if n == 0 {
        return PointLoss::zero(0);
    }
    let scale = 1.0 / n as f32;

    let mut value = 0.0;
    let grad = candidate
        .iter()
        .zip(original)
        .map(|(c, o)| {
            let d = c - o;
            value += d.norm_squared();
            d * (2.0 * scale)
        })
        .collect();

    PointLoss {
        value: value * scale,
        grad,
    }
}

/// Chamfer distance: mean nearest-neighbor squared distance from candidate to original
///
/// Unless `single_sided`, the mean from original to candidate is added too.
pub fn chamfer_loss(
    candidate: &[Point3f],
    original: &[Point3f],
    matches: &NearestMatches,
    single_sided: bool,
) -> PointLoss {
    let n = candidate.len();
    let mut loss = PointLoss::zero(n);
    if n == 0 || original.is_empty() {
        return loss;
    }

    let scale = 1.0 / n as f32;
    for (i, &(j, d)) in matches.to_original.iter().enumerate() {
        loss.value += d * scale;
        loss.grad[i] += (candidate[i] - original[j]) * (2.0 * scale);
    }

    if !single_sided {
        let computed;
        let reverse = match &matches.to_candidate {
            Some(reverse) => reverse,
            None => {
                computed = nearest_correspondences(original, candidate);
                &computed
            }
        };

        let scale = 1.0 / original.len() as f32;
        for (j, &(i, d)) in reverse.iter().enumerate() {
            loss.value += d * scale;
            loss.grad[i] += (candidate[i] - original[j]) * (2.0 * scale);
        }
    }

    loss
}

/// Largest nearest-neighbor squared distance from candidate to original
pub fn hausdorff_loss(
    candidate: &[Point3f],
    original: &[Point3f],
    matches: &NearestMatches,
) -> PointLoss {
    let mut loss = PointLoss::zero(candidate.len());

    let worst = matches
        .to_original
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, usize, f32)>, (i, &(j, d))| match best {
            Some((_, _, best_d)) if best_d >= d => best,
            _ => Some((i, j, d)),
        });

    if let Some((i, j, d)) = worst {
        loss.value = d;
        loss.grad[i] = (candidate[i] - original[j]) * 2.0;
    }
    loss
}

/// Squared deviation of the candidate's local curvature from the original's
///
/// Each candidate point borrows the normal and curvature reference of its
/// nearest original point, then measures the same alignment statistic over
/// its own `k` nearest candidate neighbors.
pub fn curvature_loss(
    candidate: &[Point3f],
    matches: &NearestMatches,
    original_normals: &[Vector3f],
    theta: &[f32],
    k: usize,
) -> Result<PointLoss> {
    if original_normals.len() != theta.len() {
        return Err(Error::ShapeMismatch {
            expected: vec![theta.len()],
            found: vec![original_normals.len()],
        });
    }

    let n = candidate.len();
    let mut loss = PointLoss::zero(n);
    if n == 0 {
        return Ok(loss);
    }
    let neighbors = k_nearest_within(candidate, k);
    let scale = 1.0 / n as f32;

    for (i, indices) in neighbors.iter().enumerate() {
        let (j, _) = matches.to_original[i];
        let normal = original_normals[j];
        let diff = neighborhood_alignment(candidate, &candidate[i], indices, &normal) - theta[j];
        loss.value += diff * diff * scale;

        if indices.is_empty() {
            continue;
        }
        let coefficient = 2.0 * diff * scale / indices.len() as f32;
        for &q in indices {
            let v = candidate[q] - candidate[i];
            let length = v.norm();
            if length <= DIRECTION_EPS {
                continue;
            }
            let u = v / length;
            let cosine = u.dot(&normal);
            if cosine == 0.0 {
                continue;
            }
            let d_v = (normal - u * cosine) * (cosine.signum() / length) * coefficient;
            loss.grad[q] += d_v;
            loss.grad[i] -= d_v;
        }
    }

    Ok(loss)
}

/// Spacing regularity of the candidate inside small balls around well-spread seeds
pub fn uniformity_loss(candidate: &[Point3f], term: &UniformityTerm) -> PointLoss {
    let n = candidate.len();
    let mut loss = PointLoss::zero(n);
    if n < 2 || term.percentages.is_empty() {
        return loss;
    }

    let seeds = farthest_point_sample(candidate, ((n as f32 * 0.05) as usize).max(1));
    let per_percentage = 1.0 / term.percentages.len() as f32;

    for &p in &term.percentages {
        let nsample = ((n as f32 * p) as usize).max(2);
        let ball_radius = (p * term.radius).sqrt();
        let expected =
            (std::f32::consts::PI * term.radius * term.radius * p / nsample as f32).sqrt();
        let weight = (100.0 * p).powi(2) * per_percentage / seeds.len() as f32;

        for &seed in &seeds {
            let group = ball_query(candidate, seed, ball_radius, nsample);
            let (spacing, grads) = group_spacing(candidate, &group);

            let penalty = (spacing - expected).powi(2) / (expected + 1e-8);
            loss.value += penalty * weight;

            let d_spacing = 2.0 * (spacing - expected) / (expected + 1e-8) * weight;
            for (idx, g) in grads {
                loss.grad[idx] += g * d_spacing;
            }
        }
    }

    loss
}

/// Mean distance from each group slot to its nearest other slot, and its gradient
///
/// Slots are compared by position, so a padded duplicate sits at distance zero.
fn group_spacing(points: &[Point3f], group: &[usize]) -> (f32, Vec<(usize, Vector3f)>) {
    if group.len() < 2 {
        return (0.0, Vec::new());
    }
    let scale = 1.0 / group.len() as f32;

    let mut spacing = 0.0;
    let mut grads = Vec::with_capacity(2 * group.len());
    for (slot_a, &a) in group.iter().enumerate() {
        let mut nearest = None;
        for (slot_b, &b) in group.iter().enumerate() {
            if slot_b == slot_a {
                continue;
            }
            let d = (points[a] - points[b]).norm_squared();
            if nearest.map_or(true, |(_, best)| d < best) {
                nearest = Some((b, d));
            }
        }

        if let Some((b, d)) = nearest {
            let distance = (d + 1e-8).sqrt();
            spacing += distance * scale;
            let g = (points[a] - points[b]) * (scale / distance);
            grads.push((a, g));
            grads.push((b, -g));
        }
    }

    (spacing, grads)
}
