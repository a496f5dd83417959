//! Forward-step evaluation: classification loss plus weighted fidelity terms
//!
//! For every sample the objective is
//! `classification + scale_const * (sum of active weighted fidelity terms)`.
//! The batch loss is the mean of the per-sample objectives, and the returned
//! gradient is the gradient of that mean with respect to the candidate.

use crate::config::{AttackConfig, ClassificationLoss, DistanceLoss};
use crate::loss::{
    chamfer_loss, cross_entropy_loss, curvature_loss, hausdorff_loss, l2_loss, margin_loss,
    uniformity_loss, NearestMatches, PointLoss, ScoreLoss,
};
use crate::model::ModelAdapter;
use geoattack_algorithms::theta_normal;
use geoattack_core::{CloudBatch, Error, Point3f, Result, Vector3f};
use ndarray::{Array2, Array3};
use rayon::prelude::*;

/// Weighted fidelity contributions of one sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FidelityTerms {
    pub distance: f32,
    pub hausdorff: f32,
    pub curvature: f32,
    pub uniformity: f32,
    /// Sum of the weighted terms above
    pub constraint: f32,
}

/// Per-sample breakdown of one evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossTerms {
    pub classification: f32,
    pub fidelity: FidelityTerms,
    /// `classification + scale_const * fidelity.constraint`
    pub total: f32,
}

/// Result of evaluating the objective at one candidate batch
#[derive(Debug, Clone)]
pub struct StepEvaluation {
    /// Raw classifier scores `[B, C]`
    pub scores: Array2<f32>,
    /// Batch mean of the per-sample objectives
    pub loss: f32,
    pub terms: Vec<LossTerms>,
    /// Gradient of `loss` with respect to the candidate, `[B, 3, N]`
    pub grad: Array3<f32>,
}

/// Original clouds of a batch, unpacked once for the per-sample loss terms
struct Reference {
    points: Vec<Vec<Point3f>>,
    normals: Vec<Vec<Vector3f>>,
    /// Curvature reference per sample, present when the curvature term is active
    theta: Option<Vec<Vec<f32>>>,
}

/// Evaluates the attack objective against a fixed batch of original clouds
pub struct ForwardStep<'a, M: ModelAdapter + ?Sized> {
    model: &'a M,
    config: &'a AttackConfig,
    reference: Reference,
}

impl<'a, M: ModelAdapter + ?Sized> ForwardStep<'a, M> {
    pub fn new(
        model: &'a M,
        config: &'a AttackConfig,
        original: &CloudBatch,
        normals: &CloudBatch,
    ) -> Result<Self> {
        original.ensure_same_shape(normals)?;

        let points: Vec<Vec<Point3f>> =
            (0..original.num_samples()).map(|k| original.points(k)).collect();
        let normals: Vec<Vec<Vector3f>> =
            (0..normals.num_samples()).map(|k| normals.vectors(k)).collect();

        let theta = match &config.fidelity.curvature {
            Some(term) if term.weight != 0.0 => Some(
                points
                    .par_iter()
                    .zip(normals.par_iter())
                    .map(|(p, n)| theta_normal(p, n, term.knn))
                    .collect::<Result<Vec<_>>>()?,
            ),
            _ => None,
        };

        Ok(Self {
            model,
            config,
            reference: Reference {
                points,
                normals,
                theta,
            },
        })
    }

    pub fn num_samples(&self) -> usize {
        self.reference.points.len()
    }

    /// Evaluate the objective and its gradient at `candidate`
    pub fn evaluate(
        &self,
        candidate: &CloudBatch,
        targets: &[usize],
        scale_const: &[f32],
    ) -> Result<StepEvaluation> {
        let b = self.check_batch(candidate)?;
        if targets.len() != b || scale_const.len() != b {
            return Err(Error::ShapeMismatch {
                expected: vec![b],
                found: vec![targets.len(), scale_const.len()],
            });
        }

        let scores = self.scores(candidate)?;
        let num_classes = scores.ncols();
        if let Some(&bad) = targets.iter().find(|&&t| t >= num_classes) {
            return Err(Error::InvalidData(format!(
                "target label {} out of range for {} classes",
                bad, num_classes
            )));
        }

        let per_sample: Vec<(ScoreLoss, FidelityTerms, Vec<Vector3f>)> = (0..b)
            .into_par_iter()
            .map(|k| {
                let classification = self.classification(&scores, k, targets[k]);
                let (fidelity, grad) = self.fidelity_sample(k, &candidate.points(k))?;
                Ok((classification, fidelity, grad))
            })
            .collect::<Result<_>>()?;

        let inv_b = 1.0 / b as f32;
        let mut grad_scores = Array2::zeros((b, num_classes));
        let mut terms = Vec::with_capacity(b);
        for (k, (classification, fidelity, _)) in per_sample.iter().enumerate() {
            grad_scores.row_mut(k).assign(&(&classification.grad * inv_b));
            terms.push(LossTerms {
                classification: classification.value,
                fidelity: *fidelity,
                total: classification.value + scale_const[k] * fidelity.constraint,
            });
        }

        let mut grad = match self.config.classification {
            ClassificationLoss::None => Array3::zeros((b, 3, candidate.num_points())),
            _ => self.model.backward(candidate, &grad_scores)?,
        };
        for (k, (_, _, point_grad)) in per_sample.iter().enumerate() {
            let scale = scale_const[k] * inv_b;
            for (i, g) in point_grad.iter().enumerate() {
                for d in 0..3 {
                    grad[[k, d, i]] += scale * g[d];
                }
            }
        }

        let loss = terms.iter().map(|t| t.total).sum::<f32>() * inv_b;
        Ok(StepEvaluation {
            scores,
            loss,
            terms,
            grad,
        })
    }

    /// Weighted fidelity terms of every sample, without gradients
    pub fn fidelity(&self, candidate: &CloudBatch) -> Result<Vec<FidelityTerms>> {
        let b = self.check_batch(candidate)?;
        (0..b)
            .into_par_iter()
            .map(|k| self.fidelity_sample(k, &candidate.points(k)).map(|(terms, _)| terms))
            .collect()
    }

    /// Classifier scores, checked against the batch size
    pub fn scores(&self, candidate: &CloudBatch) -> Result<Array2<f32>> {
        let scores = self.model.forward(candidate)?;
        if scores.nrows() != candidate.num_samples() {
            return Err(Error::ShapeMismatch {
                expected: vec![candidate.num_samples(), self.model.num_classes()],
                found: scores.shape().to_vec(),
            });
        }
        Ok(scores)
    }

    fn check_batch(&self, candidate: &CloudBatch) -> Result<usize> {
        let expected = [
            self.num_samples(),
            3,
            self.reference.points.first().map_or(0, |p| p.len()),
        ];
        if candidate.shape() != expected {
            return Err(Error::ShapeMismatch {
                expected: expected.to_vec(),
                found: candidate.shape().to_vec(),
            });
        }
        Ok(expected[0])
    }

    fn classification(&self, scores: &Array2<f32>, k: usize, target: usize) -> ScoreLoss {
        let row = scores.row(k);
        match self.config.classification {
            ClassificationLoss::Margin { confidence } => {
                margin_loss(row, target, confidence, self.config.mode)
            }
            ClassificationLoss::CrossEntropy => cross_entropy_loss(row, target, self.config.mode),
            ClassificationLoss::None => ScoreLoss::zero(row.len()),
        }
    }

    fn fidelity_sample(
        &self,
        k: usize,
        candidate: &[Point3f],
    ) -> Result<(FidelityTerms, Vec<Vector3f>)> {
        let fidelity = &self.config.fidelity;
        let original = &self.reference.points[k];
        let mut terms = FidelityTerms::default();
        let mut grad = vec![Vector3f::zeros(); candidate.len()];

        let chamfer = match fidelity.distance {
            DistanceLoss::Chamfer { single_sided } if fidelity.distance_weight != 0.0 => {
                Some(single_sided)
            }
            _ => None,
        };
        let curvature = fidelity.curvature.as_ref().zip(self.reference.theta.as_ref());
        let needs_matches =
            chamfer.is_some() || fidelity.hausdorff_weight != 0.0 || curvature.is_some();
        let matches = needs_matches
            .then(|| NearestMatches::new(candidate, original, chamfer == Some(false)));

        let mut accumulate = |slot: &mut f32, loss: PointLoss, weight: f32| {
            *slot = weight * loss.value;
            for (g, lg) in grad.iter_mut().zip(&loss.grad) {
                *g += lg * weight;
            }
        };

        if let Some(matches) = &matches {
            if let Some(single_sided) = chamfer {
                let loss = chamfer_loss(candidate, original, matches, single_sided);
                accumulate(&mut terms.distance, loss, fidelity.distance_weight);
            }
            if fidelity.hausdorff_weight != 0.0 {
                let loss = hausdorff_loss(candidate, original, matches);
                accumulate(&mut terms.hausdorff, loss, fidelity.hausdorff_weight);
            }
            if let Some((term, theta)) = curvature {
                let loss = curvature_loss(
                    candidate,
                    matches,
                    &self.reference.normals[k],
                    &theta[k],
                    term.knn,
                )?;
                accumulate(&mut terms.curvature, loss, term.weight);
            }
        }

        if fidelity.distance == DistanceLoss::L2 && fidelity.distance_weight != 0.0 {
            let loss = l2_loss(candidate, original);
            accumulate(&mut terms.distance, loss, fidelity.distance_weight);
        }

        if let Some(term) = fidelity.uniformity.as_ref().filter(|t| t.weight != 0.0) {
            let loss = uniformity_loss(candidate, term);
            accumulate(&mut terms.uniformity, loss, term.weight);
        }

        terms.constraint = terms.distance + terms.hausdorff + terms.curvature + terms.uniformity;
        Ok((terms, grad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttackMode, CurvatureTerm, FidelityConfig, UniformityTerm};
    use crate::model::PointNetClassifier;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sphere_batch(samples: usize, points: usize, seed: u64) -> (CloudBatch, CloudBatch) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut clouds = Vec::new();
        let mut fields = Vec::new();
        for _ in 0..samples {
            let mut cloud = Vec::new();
            let mut field = Vec::new();
            for _ in 0..points {
                let v = Vector3f::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                )
                .normalize();
                cloud.push(Point3f::from(v * 0.5));
                field.push(v);
            }
            clouds.push(cloud);
            fields.push(field);
        }
        (
            CloudBatch::from_points(&clouds).unwrap(),
            CloudBatch::from_vectors(&fields).unwrap(),
        )
    }

    fn jittered(batch: &CloudBatch, scale: f32, seed: u64) -> CloudBatch {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut out = batch.clone();
        out.data_mut().mapv_inplace(|v| v + rng.gen_range(-scale..scale));
        out
    }

    fn full_config() -> AttackConfig {
        AttackConfig {
            classification: ClassificationLoss::Margin { confidence: 0.5 },
            fidelity: FidelityConfig {
                distance: DistanceLoss::Chamfer { single_sided: false },
                distance_weight: 1.0,
                hausdorff_weight: 0.1,
                curvature: Some(CurvatureTerm { weight: 1.0, knn: 6 }),
                uniformity: Some(UniformityTerm::with_weight(0.5)),
            },
            ..AttackConfig::default()
        }
    }

    #[test]
    fn test_none_losses_give_zero_objective() {
        let model = PointNetClassifier::random(&[8], &[], 3, 0).unwrap();
        let config = AttackConfig {
            classification: ClassificationLoss::None,
            fidelity: FidelityConfig {
                distance: DistanceLoss::None,
                distance_weight: 1.0,
                hausdorff_weight: 0.0,
                curvature: None,
                uniformity: None,
            },
            ..AttackConfig::default()
        };
        let (original, normals) = sphere_batch(2, 32, 1);
        let step = ForwardStep::new(&model, &config, &original, &normals).unwrap();

        let eval = step.evaluate(&jittered(&original, 0.1, 2), &[0, 1], &[10.0, 10.0]).unwrap();
        assert_eq!(eval.loss, 0.0);
        assert!(eval.terms.iter().all(|t| t.total == 0.0));
        assert!(eval.grad.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_total_combines_terms_with_scale_const() {
        let model = PointNetClassifier::random(&[8], &[8], 4, 3).unwrap();
        let config = full_config();
        let (original, normals) = sphere_batch(2, 40, 4);
        let step = ForwardStep::new(&model, &config, &original, &normals).unwrap();
        let candidate = jittered(&original, 0.02, 5);

        let eval = step.evaluate(&candidate, &[1, 2], &[3.0, 0.5]).unwrap();
        for (t, c) in eval.terms.iter().zip([3.0f32, 0.5]) {
            let f = t.fidelity;
            assert_relative_eq!(
                f.constraint,
                f.distance + f.hausdorff + f.curvature + f.uniformity,
                epsilon = 1e-6
            );
            assert_relative_eq!(t.total, t.classification + c * f.constraint, epsilon = 1e-5);
            assert!(f.distance > 0.0);
        }
        assert_relative_eq!(
            eval.loss,
            (eval.terms[0].total + eval.terms[1].total) / 2.0,
            epsilon = 1e-5
        );

        let clean = step.fidelity(&candidate).unwrap();
        assert_eq!(clean[0], eval.terms[0].fidelity);
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let model = PointNetClassifier::random(&[8], &[8], 3, 6).unwrap();
        let mut config = full_config();
        config.fidelity.uniformity = None;
        config.classification = ClassificationLoss::CrossEntropy;
        config.mode = AttackMode::Untargeted;
        let (original, normals) = sphere_batch(1, 24, 7);
        let step = ForwardStep::new(&model, &config, &original, &normals).unwrap();
        let candidate = jittered(&original, 0.01, 8);

        let eval = step.evaluate(&candidate, &[0], &[2.0]).unwrap();
        let h = 2e-4;
        for i in 0..4 {
            for d in 0..3 {
                let mut plus = candidate.clone();
                plus.data_mut()[[0, d, i]] += h;
                let mut minus = candidate.clone();
                minus.data_mut()[[0, d, i]] -= h;
                let numeric = (step.evaluate(&plus, &[0], &[2.0]).unwrap().loss
                    - step.evaluate(&minus, &[0], &[2.0]).unwrap().loss)
                    / (2.0 * h);
                assert_relative_eq!(
                    eval.grad[[0, d, i]],
                    numeric,
                    epsilon = 5e-2,
                    max_relative = 5e-2
                );
            }
        }
    }

    #[test]
    fn test_rejects_mismatched_inputs() {
        let model = PointNetClassifier::random(&[8], &[], 3, 0).unwrap();
        let config = AttackConfig::cw_l2();
        let (original, normals) = sphere_batch(2, 16, 9);

        assert!(ForwardStep::new(&model, &config, &original, &CloudBatch::zeros(2, 15)).is_err());

        let step = ForwardStep::new(&model, &config, &original, &normals).unwrap();
        assert!(step.evaluate(&original, &[0], &[1.0, 1.0]).is_err());
        assert!(step.evaluate(&original, &[0, 7], &[1.0, 1.0]).is_err());
        assert!(step.evaluate(&CloudBatch::zeros(2, 10), &[0, 1], &[1.0, 1.0]).is_err());
    }
}
