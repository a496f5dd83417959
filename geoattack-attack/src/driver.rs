//! Attack driver: binary search over penalty constants around gradient descent
//!
//! Every outer step restarts the candidate from the original clouds plus a
//! little noise, projected like every later step when projection is on, and
//! runs a fixed number of optimizer steps with the current per-sample penalty
//! constants. While it runs, the driver remembers the
//! successful candidate with the lowest fidelity loss of every sample. After
//! the inner loop each sample's constant is moved independently: up when no
//! adversarial example was found, down when one was.

use crate::config::{AttackConfig, AttackMode};
use crate::evaluator::{FidelityTerms, ForwardStep, LossTerms, StepEvaluation};
use crate::model::{argmax, ModelAdapter};
use crate::optimizer::Optimizer;
use crate::projection::project_batch;
use geoattack_algorithms::tangent_jitter;
use geoattack_core::{CloudBatch, Error, Result};
use log::{debug, info, trace, warn};
use ndarray::{Array2, Array4};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Best-loss value of a sample for which no adversarial example was found
pub const LOSS_SENTINEL: f32 = 1e10;

/// Initial upper bound of every penalty-constant search
pub const UPPER_BOUND_SENTINEL: f32 = 1e10;

/// An upper bound below this value has been tightened at least once
const UPPER_BOUND_SET: f32 = 1e9;

/// Whether a predicted label counts as a successful attack
pub fn compare(predicted: usize, target: usize, ground_truth: usize, mode: AttackMode) -> bool {
    match mode {
        AttackMode::Targeted => predicted == target,
        AttackMode::Untargeted => predicted != ground_truth,
    }
}

/// Binary-search state of one sample's penalty constant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchBounds {
    pub lower: f32,
    pub upper: f32,
    pub scale_const: f32,
}

impl SearchBounds {
    pub fn new(initial_const: f32) -> Self {
        Self {
            lower: 0.0,
            upper: UPPER_BOUND_SENTINEL,
            scale_const: initial_const,
        }
    }

    pub fn upper_is_set(&self) -> bool {
        self.upper < UPPER_BOUND_SET
    }

    /// Move the constant after an outer step
    ///
    /// A success raises the lower bound and doubles the constant until an
    /// upper bound exists; a failure lowers the upper bound. Once both bounds
    /// exist the constant is their midpoint.
    pub fn adjust(&mut self, succeeded: bool) {
        if succeeded {
            self.lower = self.lower.max(self.scale_const);
            if self.upper_is_set() {
                self.scale_const = (self.lower + self.upper) / 2.0;
            } else {
                self.scale_const *= 2.0;
            }
        } else {
            self.upper = self.upper.min(self.scale_const);
            if self.upper_is_set() {
                self.scale_const = (self.lower + self.upper) / 2.0;
            }
        }
    }
}

/// Where a sample's best adversarial candidate was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundAt {
    pub outer_step: usize,
    pub inner_step: usize,
}

/// Clouds, normals and labels of one attack invocation
#[derive(Debug, Clone)]
pub struct AttackBatch {
    pub points: CloudBatch,
    pub normals: CloudBatch,
    pub ground_truth: Vec<usize>,
    /// Desired labels; required for targeted attacks
    pub targets: Option<Vec<usize>>,
}

impl AttackBatch {
    pub fn new(
        points: CloudBatch,
        normals: CloudBatch,
        ground_truth: Vec<usize>,
        targets: Option<Vec<usize>>,
    ) -> Result<Self> {
        points.ensure_same_shape(&normals)?;
        if points.num_points() == 0 {
            return Err(Error::InvalidData("clouds must contain at least one point".to_string()));
        }
        let b = points.num_samples();
        if ground_truth.len() != b {
            return Err(Error::ShapeMismatch {
                expected: vec![b],
                found: vec![ground_truth.len()],
            });
        }
        if let Some(targets) = &targets {
            if targets.len() != b {
                return Err(Error::ShapeMismatch {
                    expected: vec![b],
                    found: vec![targets.len()],
                });
            }
        }
        Ok(Self {
            points,
            normals,
            ground_truth,
            targets,
        })
    }

    /// Build from `[B, L, N, 3]` or `[B, L, 3, N]` arrays with `B * L` labels
    pub fn from_layout(
        points: Array4<f32>,
        normals: Array4<f32>,
        ground_truth: Vec<usize>,
        targets: Option<Vec<usize>>,
    ) -> Result<Self> {
        Self::new(
            CloudBatch::from_layout(points)?,
            CloudBatch::from_layout(normals)?,
            ground_truth,
            targets,
        )
    }

    pub fn num_samples(&self) -> usize {
        self.points.num_samples()
    }
}

/// Everything an attack returns for one batch
#[derive(Debug, Clone)]
pub struct AttackOutcome {
    /// Best adversarial cloud per sample; all ones where none was found
    pub adversarial: CloudBatch,
    /// Label each sample was attacked towards (ground truth when untargeted)
    pub targets: Vec<usize>,
    pub success: Vec<bool>,
    pub found_at: Vec<Option<FoundAt>>,
    /// Fidelity loss of the best candidate, [`LOSS_SENTINEL`] where none was found
    pub best_loss: Vec<f32>,
    /// Per-sample objective at every inner step of the last outer step, `[iterations][B]`
    pub loss_history: Vec<Vec<f32>>,
    /// Best loss per sample after each outer step, `[binary_search_steps][B]`
    pub best_loss_history: Vec<Vec<f32>>,
    /// Search bounds per sample after each outer step's adjustment
    pub bounds_history: Vec<Vec<SearchBounds>>,
    pub final_bounds: Vec<SearchBounds>,
}

impl AttackOutcome {
    pub fn num_success(&self) -> usize {
        self.success.iter().filter(|&&s| s).count()
    }

    /// Fraction of samples with an adversarial example
    pub fn success_rate(&self) -> f32 {
        if self.success.is_empty() {
            0.0
        } else {
            self.num_success() as f32 / self.success.len() as f32
        }
    }

    /// Re-classify the adversarial clouds and keep only the successes that still hold
    pub fn confirm<M: ModelAdapter + ?Sized>(
        &self,
        model: &M,
        ground_truth: &[usize],
        mode: AttackMode,
    ) -> Result<Confirmation> {
        if ground_truth.len() != self.success.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![self.success.len()],
                found: vec![ground_truth.len()],
            });
        }
        let predicted = model.predict(&self.adversarial)?;
        let confirmed = predicted
            .iter()
            .enumerate()
            .map(|(k, &p)| self.success[k] && compare(p, self.targets[k], ground_truth[k], mode))
            .collect();
        Ok(Confirmation {
            predicted,
            confirmed,
        })
    }
}

/// Classifier verdict on the returned adversarial clouds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Label predicted for each adversarial cloud
    pub predicted: Vec<usize>,
    /// Success that still holds under the prediction
    pub confirmed: Vec<bool>,
}

impl Confirmation {
    pub fn len(&self) -> usize {
        self.confirmed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty()
    }

    pub fn num_confirmed(&self) -> usize {
        self.confirmed.iter().filter(|&&c| c).count()
    }

    pub fn rate(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.num_confirmed() as f32 / self.len() as f32
        }
    }
}

/// Best candidates over the whole attack
struct BestTracker {
    loss: Vec<f32>,
    found_at: Vec<Option<FoundAt>>,
    candidate: CloudBatch,
}

impl BestTracker {
    fn new(num_samples: usize, num_points: usize) -> Self {
        Self {
            loss: vec![LOSS_SENTINEL; num_samples],
            found_at: vec![None; num_samples],
            candidate: CloudBatch::filled(num_samples, num_points, 1.0),
        }
    }
}

/// Best fidelity loss and its label within one outer step
struct IterationBest {
    loss: Vec<f32>,
    label: Vec<Option<usize>>,
}

impl IterationBest {
    fn new(num_samples: usize) -> Self {
        Self {
            loss: vec![LOSS_SENTINEL; num_samples],
            label: vec![None; num_samples],
        }
    }
}

/// Runs the attack against one classifier
pub struct Attacker<'a, M: ModelAdapter + ?Sized> {
    model: &'a M,
    config: AttackConfig,
}

impl<'a, M: ModelAdapter + ?Sized> Attacker<'a, M> {
    /// Validate the configuration before any optimization happens
    pub fn new(model: &'a M, config: AttackConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { model, config })
    }

    pub fn config(&self) -> &AttackConfig {
        &self.config
    }

    /// Labels the losses aim at: the targets, or the ground truth when untargeted
    fn resolve_targets(&self, batch: &AttackBatch) -> Result<Vec<usize>> {
        let targets = match (self.config.mode, &batch.targets) {
            (AttackMode::Targeted, Some(targets)) => targets.clone(),
            (AttackMode::Targeted, None) => {
                return Err(Error::InvalidData(
                    "targeted attack requires target labels".to_string(),
                ))
            }
            (AttackMode::Untargeted, targets) => {
                if targets.is_some() {
                    warn!("untargeted attack ignores the supplied target labels");
                }
                batch.ground_truth.clone()
            }
        };

        let num_classes = self.model.num_classes();
        if let Some(&bad) = targets
            .iter()
            .chain(batch.ground_truth.iter())
            .find(|&&label| label >= num_classes)
        {
            return Err(Error::InvalidData(format!(
                "label {} out of range for {} classes",
                bad, num_classes
            )));
        }
        Ok(targets)
    }

    pub fn attack(&self, batch: &AttackBatch) -> Result<AttackOutcome> {
        let config = &self.config;
        let targets = self.resolve_targets(batch)?;
        let ground_truth = &batch.ground_truth;
        let (b, n) = (batch.num_samples(), batch.points.num_points());

        let step = ForwardStep::new(self.model, config, &batch.points, &batch.normals)?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let noise = Normal::new(0.0f32, config.init_noise_std)
            .map_err(|e| Error::Config(format!("invalid initial noise: {}", e)))?;

        let mut bounds = vec![SearchBounds::new(config.initial_const); b];
        let mut best = BestTracker::new(b, n);
        let mut loss_history = Vec::new();
        let mut best_loss_history = Vec::with_capacity(config.binary_search_steps);
        let mut bounds_history = Vec::with_capacity(config.binary_search_steps);

        for outer in 0..config.binary_search_steps {
            let mut candidate = batch.points.clone();
            candidate.data_mut().mapv_inplace(|v| v + noise.sample(&mut rng));
            if let Some(mode) = config.projection {
                project_batch(&mut candidate, &batch.points, &batch.normals, mode)?;
            }

            let mut optimizer = Optimizer::new(config.optimizer, config.learning_rate, (b, 3, n));
            let mut iteration_best = IterationBest::new(b);
            let scale_const: Vec<f32> = bounds.iter().map(|s| s.scale_const).collect();
            let mut history = Vec::with_capacity(config.iterations);
            let mut jitter: Option<CloudBatch> = None;

            for inner in 0..config.iterations {
                if let Some(jitter_config) = &config.jitter {
                    if inner % jitter_config.recompute_interval == 0 {
                        let fields = (0..b)
                            .map(|k| {
                                tangent_jitter(
                                    &candidate.points(k),
                                    jitter_config.knn,
                                    jitter_config.sigma,
                                    jitter_config.clip,
                                    &mut rng,
                                )
                            })
                            .collect::<Result<Vec<_>>>()?;
                        jitter = Some(CloudBatch::from_vectors(&fields)?);
                    }
                }

                let eval: StepEvaluation;
                match &jitter {
                    Some(offset) => {
                        let scores = step.scores(&candidate)?;
                        let fidelity = step.fidelity(&candidate)?;
                        let predicted = self.record(
                            (outer, inner),
                            &candidate,
                            &scores,
                            &fidelity,
                            &targets,
                            ground_truth,
                            &mut best,
                            &mut iteration_best,
                        );
                        trace!("[{}/{}] predictions {:?}", outer, inner, predicted);

                        let mut point = candidate.clone();
                        *point.data_mut() += offset.data();
                        eval = step.evaluate(&point, &targets, &scale_const)?;
                    }
                    None => {
                        eval = step.evaluate(&candidate, &targets, &scale_const)?;
                        let fidelity: Vec<FidelityTerms> =
                            eval.terms.iter().map(|t| t.fidelity).collect();
                        let predicted = self.record(
                            (outer, inner),
                            &candidate,
                            &eval.scores,
                            &fidelity,
                            &targets,
                            ground_truth,
                            &mut best,
                            &mut iteration_best,
                        );
                        trace!("[{}/{}] predictions {:?}", outer, inner, predicted);
                    }
                }

                if config.log_every > 0 && inner % config.log_every == 0 {
                    log_step(outer, inner, config, &eval);
                }
                history.push(eval.terms.iter().map(|t| t.total).collect::<Vec<f32>>());

                optimizer.step(candidate.data_mut(), &eval.grad);

                if let Some(mode) = config.projection {
                    project_batch(&mut candidate, &batch.points, &batch.normals, mode)?;
                }
            }

            for k in 0..b {
                let succeeded = iteration_best.label[k].map_or(false, |label| {
                    compare(label, targets[k], ground_truth[k], config.mode)
                });
                bounds[k].adjust(succeeded);
                trace!(
                    "sample {}: succeeded={} lower={} upper={} const={}",
                    k, succeeded, bounds[k].lower, bounds[k].upper, bounds[k].scale_const
                );
            }

            let found = best.loss.iter().filter(|&&l| l < LOSS_SENTINEL).count();
            let mean_const = bounds.iter().map(|s| s.scale_const).sum::<f32>() / b.max(1) as f32;
            info!(
                "binary step {}/{}: {}/{} samples adversarial, mean const {:.4}",
                outer + 1,
                config.binary_search_steps,
                found,
                b,
                mean_const
            );

            loss_history = history;
            best_loss_history.push(best.loss.clone());
            bounds_history.push(bounds.clone());
        }

        Ok(AttackOutcome {
            adversarial: best.candidate,
            targets,
            success: best.loss.iter().map(|&l| l < LOSS_SENTINEL).collect(),
            found_at: best.found_at,
            best_loss: best.loss,
            loss_history,
            best_loss_history,
            bounds_history,
            final_bounds: bounds,
        })
    }

    /// Update both best trackers from the labels of the current candidate
    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        (outer, inner): (usize, usize),
        candidate: &CloudBatch,
        scores: &Array2<f32>,
        fidelity: &[FidelityTerms],
        targets: &[usize],
        ground_truth: &[usize],
        best: &mut BestTracker,
        iteration_best: &mut IterationBest,
    ) -> Vec<usize> {
        let predicted: Vec<usize> = scores.outer_iter().map(argmax).collect();

        for (k, &label) in predicted.iter().enumerate() {
            if !compare(label, targets[k], ground_truth[k], self.config.mode) {
                continue;
            }
            let distance = fidelity[k].constraint;
            if distance < iteration_best.loss[k] {
                iteration_best.loss[k] = distance;
                iteration_best.label[k] = Some(label);
            }
            if distance < best.loss[k] {
                best.loss[k] = distance;
                best.found_at[k] = Some(FoundAt {
                    outer_step: outer,
                    inner_step: inner,
                });
                best.candidate.copy_sample_from(k, candidate, k);
                trace!("sample {}: new best {:.6} at [{}/{}]", k, distance, outer, inner);
            }
        }

        predicted
    }
}

fn log_step(outer: usize, inner: usize, config: &AttackConfig, eval: &StepEvaluation) {
    debug!(
        "[{}/{}][{}/{}] loss: {:.4} cls: {:.4} dis: {:.4} hd: {:.4} curv: {:.4} uni: {:.4}",
        outer,
        config.binary_search_steps,
        inner,
        config.iterations,
        eval.loss,
        mean_term(&eval.terms, |t| t.classification),
        mean_term(&eval.terms, |t| t.fidelity.distance),
        mean_term(&eval.terms, |t| t.fidelity.hausdorff),
        mean_term(&eval.terms, |t| t.fidelity.curvature),
        mean_term(&eval.terms, |t| t.fidelity.uniformity),
    );
}

fn mean_term(terms: &[LossTerms], term: fn(&LossTerms) -> f32) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    terms.iter().map(term).sum::<f32>() / terms.len() as f32
}
