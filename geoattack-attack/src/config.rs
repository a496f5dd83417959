//! Attack configuration
//!
//! Two layers: [`AttackOptions`] is the loosely typed surface that arrives
//! from a command line or a JSON file, with loss and optimizer kinds given as
//! strings. [`AttackOptions::into_config`] turns it into an [`AttackConfig`]
//! of closed enums, and [`AttackConfig::validate`] rejects every unsupported
//! or contradictory combination before an attack starts.

use geoattack_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Whether the attack aims at a chosen label or away from the true one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackMode {
    /// Succeed when the classifier outputs the target label
    Targeted,
    /// Succeed when the classifier outputs anything but the ground truth
    Untargeted,
}

impl AttackMode {
    pub fn is_targeted(self) -> bool {
        matches!(self, AttackMode::Targeted)
    }
}

/// Classification objective
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ClassificationLoss {
    /// Hinge on the gap between the target score and the best other score
    Margin { confidence: f32 },
    /// Softmax cross-entropy, negated for untargeted attacks
    CrossEntropy,
    /// No classification term
    None,
}

impl ClassificationLoss {
    /// Parse `Margin`, `CE` or `None`
    pub fn parse(kind: &str, confidence: f32) -> Result<Self> {
        match kind {
            "Margin" => Ok(Self::Margin { confidence }),
            "CE" => Ok(Self::CrossEntropy),
            "None" => Ok(Self::None),
            other => Err(Error::Config(format!(
                "unsupported classification loss '{}' (expected Margin, CE or None)",
                other
            ))),
        }
    }
}

/// Point-wise distance objective between candidate and original cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceLoss {
    /// Mean squared displacement of corresponding points
    L2,
    /// Mean nearest-neighbor squared distance, optionally symmetrized
    Chamfer { single_sided: bool },
    /// No distance term
    None,
}

impl DistanceLoss {
    /// Parse `CD`, `L2` or `None`
    pub fn parse(kind: &str, single_sided: bool) -> Result<Self> {
        match kind {
            "CD" => Ok(Self::Chamfer { single_sided }),
            "L2" => Ok(Self::L2),
            "None" => Ok(Self::None),
            other => Err(Error::Config(format!(
                "unsupported distance loss '{}' (expected CD, L2 or None)",
                other
            ))),
        }
    }
}

/// First-order optimizer driving the candidate cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

impl FromStr for OptimizerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "adam" => Ok(Self::Adam),
            "sgd" => Ok(Self::Sgd),
            _ => Err(Error::Config(format!(
                "unsupported optimizer '{}' (expected adam or sgd)",
                s
            ))),
        }
    }
}

/// How offsets that point into the surface are corrected after each step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionMode {
    /// Replace inward offsets by their component in the tangent plane
    Direction,
    /// Zero inward offsets
    Clip,
}

impl FromStr for ProjectionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dir" => Ok(Self::Direction),
            "clip" => Ok(Self::Clip),
            _ => Err(Error::Config(format!(
                "unsupported projection '{}' (expected dir or clip)",
                s
            ))),
        }
    }
}

/// Curvature-consistency penalty
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvatureTerm {
    pub weight: f32,
    /// Neighbors used for the per-point curvature statistic
    pub knn: usize,
}

/// Point-uniformity penalty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniformityTerm {
    pub weight: f32,
    /// Fractions of the cloud gathered around each seed
    pub percentages: Vec<f32>,
    /// Radius of the shape the clouds are normalized to
    pub radius: f32,
}

impl UniformityTerm {
    pub fn with_weight(weight: f32) -> Self {
        Self {
            weight,
            percentages: vec![0.004, 0.006, 0.008, 0.010, 0.012],
            radius: 1.0,
        }
    }
}

/// Active geometric-fidelity terms and their weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FidelityConfig {
    pub distance: DistanceLoss,
    pub distance_weight: f32,
    /// Weight of the worst-case nearest-neighbor term; zero disables it
    pub hausdorff_weight: f32,
    pub curvature: Option<CurvatureTerm>,
    pub uniformity: Option<UniformityTerm>,
}

/// Tangent-plane jitter injected before each forward evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JitterConfig {
    /// Recompute the jitter field every this many inner iterations
    pub recompute_interval: usize,
    pub knn: usize,
    pub sigma: f32,
    pub clip: f32,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            recompute_interval: 50,
            knn: 16,
            sigma: 0.01,
            clip: 0.05,
        }
    }
}

/// Fully typed attack configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackConfig {
    pub mode: AttackMode,
    pub classification: ClassificationLoss,
    pub fidelity: FidelityConfig,
    pub optimizer: OptimizerKind,
    pub learning_rate: f32,
    /// Outer binary-search steps over the penalty constant
    pub binary_search_steps: usize,
    /// Inner gradient steps per binary-search step
    pub iterations: usize,
    pub initial_const: f32,
    /// Standard deviation of the noise the candidate is re-initialized with
    pub init_noise_std: f32,
    pub jitter: Option<JitterConfig>,
    pub projection: Option<ProjectionMode>,
    pub seed: u64,
    /// Emit a debug line every this many inner iterations; zero disables it
    pub log_every: usize,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            mode: AttackMode::Targeted,
            classification: ClassificationLoss::CrossEntropy,
            fidelity: FidelityConfig {
                distance: DistanceLoss::Chamfer { single_sided: false },
                distance_weight: 1.0,
                hausdorff_weight: 0.1,
                curvature: Some(CurvatureTerm { weight: 1.0, knn: 16 }),
                uniformity: None,
            },
            optimizer: OptimizerKind::Adam,
            learning_rate: 0.01,
            binary_search_steps: 10,
            iterations: 500,
            initial_const: 10.0,
            init_noise_std: 1e-3,
            jitter: None,
            projection: None,
            seed: 0,
            log_every: 50,
        }
    }
}

impl AttackConfig {
    /// Plain Carlini-Wagner L2 attack: margin loss and point-wise L2 distance only
    pub fn cw_l2() -> Self {
        Self {
            classification: ClassificationLoss::Margin { confidence: 0.0 },
            fidelity: FidelityConfig {
                distance: DistanceLoss::L2,
                distance_weight: 1.0,
                hausdorff_weight: 0.0,
                curvature: None,
                uniformity: None,
            },
            ..Self::default()
        }
    }

    /// Reject unsupported or contradictory settings
    pub fn validate(&self) -> Result<()> {
        let fidelity = &self.fidelity;

        if fidelity.distance == DistanceLoss::L2 && fidelity.hausdorff_weight != 0.0 {
            return Err(Error::Config(
                "Hausdorff loss cannot be combined with L2 distance".to_string(),
            ));
        }

        ensure_weight("distance_weight", fidelity.distance_weight)?;
        ensure_weight("hausdorff_weight", fidelity.hausdorff_weight)?;

        if let ClassificationLoss::Margin { confidence } = self.classification {
            ensure_weight("confidence", confidence)?;
        }

        if let Some(curvature) = &fidelity.curvature {
            ensure_weight("curvature weight", curvature.weight)?;
            if curvature.knn == 0 {
                return Err(Error::Config("curvature knn must be at least 1".to_string()));
            }
        }

        if let Some(uniformity) = &fidelity.uniformity {
            ensure_weight("uniformity weight", uniformity.weight)?;
            if uniformity.percentages.is_empty() {
                return Err(Error::Config("uniformity needs at least one percentage".to_string()));
            }
            if uniformity.percentages.iter().any(|p| !(*p > 0.0 && *p <= 1.0)) {
                return Err(Error::Config(
                    "uniformity percentages must lie in (0, 1]".to_string(),
                ));
            }
            if !(uniformity.radius > 0.0) {
                return Err(Error::Config("uniformity radius must be positive".to_string()));
            }
        }

        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(Error::Config("learning rate must be positive".to_string()));
        }
        if self.binary_search_steps == 0 {
            return Err(Error::Config("binary_search_steps must be positive".to_string()));
        }
        if self.iterations == 0 {
            return Err(Error::Config("iterations must be positive".to_string()));
        }
        ensure_weight("initial_const", self.initial_const)?;
        ensure_weight("init_noise_std", self.init_noise_std)?;

        if let Some(jitter) = &self.jitter {
            if jitter.recompute_interval == 0 {
                return Err(Error::Config("jitter recompute interval must be positive".to_string()));
            }
            if jitter.knn < 2 {
                return Err(Error::Config("jitter knn must be at least 2".to_string()));
            }
            ensure_weight("jitter sigma", jitter.sigma)?;
            ensure_weight("jitter clip", jitter.clip)?;
        }

        Ok(())
    }
}

fn ensure_weight(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} must be finite and non-negative, got {}",
            name, value
        )))
    }
}

/// Loosely typed attack options, as read from a command line or JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackOptions {
    pub targeted: bool,
    /// `Margin`, `CE` or `None`
    pub classification_loss: String,
    pub confidence: f32,
    /// `CD`, `L2` or `None`
    pub distance_loss: String,
    pub distance_weight: f32,
    pub chamfer_single_sided: bool,
    pub hausdorff_weight: f32,
    pub curvature_weight: f32,
    pub curvature_knn: usize,
    pub uniformity_weight: f32,
    /// `adam` or `sgd`
    pub optimizer: String,
    pub learning_rate: f32,
    pub binary_search_steps: usize,
    pub iterations: usize,
    pub initial_const: f32,
    pub init_noise_std: f32,
    pub jitter: bool,
    pub jitter_interval: usize,
    pub jitter_knn: usize,
    pub jitter_sigma: f32,
    pub jitter_clip: f32,
    pub project_gradient: bool,
    /// `dir` or `clip`
    pub projection: String,
    pub seed: u64,
    pub log_every: usize,
}

impl Default for AttackOptions {
    fn default() -> Self {
        let jitter = JitterConfig::default();
        Self {
            targeted: true,
            classification_loss: "CE".to_string(),
            confidence: 0.0,
            distance_loss: "CD".to_string(),
            distance_weight: 1.0,
            chamfer_single_sided: false,
            hausdorff_weight: 0.1,
            curvature_weight: 1.0,
            curvature_knn: 16,
            uniformity_weight: 0.0,
            optimizer: "adam".to_string(),
            learning_rate: 0.01,
            binary_search_steps: 10,
            iterations: 500,
            initial_const: 10.0,
            init_noise_std: 1e-3,
            jitter: false,
            jitter_interval: jitter.recompute_interval,
            jitter_knn: jitter.knn,
            jitter_sigma: jitter.sigma,
            jitter_clip: jitter.clip,
            project_gradient: false,
            projection: "dir".to_string(),
            seed: 0,
            log_every: 50,
        }
    }
}

impl AttackOptions {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Parse every string option and validate the result
    pub fn into_config(self) -> Result<AttackConfig> {
        let config = AttackConfig {
            mode: if self.targeted {
                AttackMode::Targeted
            } else {
                AttackMode::Untargeted
            },
            classification: ClassificationLoss::parse(&self.classification_loss, self.confidence)?,
            fidelity: FidelityConfig {
                distance: DistanceLoss::parse(&self.distance_loss, self.chamfer_single_sided)?,
                distance_weight: self.distance_weight,
                hausdorff_weight: self.hausdorff_weight,
                curvature: (self.curvature_weight != 0.0).then_some(CurvatureTerm {
                    weight: self.curvature_weight,
                    knn: self.curvature_knn,
                }),
                uniformity: (self.uniformity_weight != 0.0)
                    .then(|| UniformityTerm::with_weight(self.uniformity_weight)),
            },
            optimizer: self.optimizer.parse()?,
            learning_rate: self.learning_rate,
            binary_search_steps: self.binary_search_steps,
            iterations: self.iterations,
            initial_const: self.initial_const,
            init_noise_std: self.init_noise_std,
            jitter: self.jitter.then_some(JitterConfig {
                recompute_interval: self.jitter_interval,
                knn: self.jitter_knn,
                sigma: self.jitter_sigma,
                clip: self.jitter_clip,
            }),
            projection: if self.project_gradient {
                Some(self.projection.parse()?)
            } else {
                None
            },
            seed: self.seed,
            log_every: self.log_every,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs_are_valid() {
        assert!(AttackConfig::default().validate().is_ok());
        assert!(AttackConfig::cw_l2().validate().is_ok());
    }

    #[test]
    fn test_default_options_match_default_config() {
        let config = AttackOptions::default().into_config().unwrap();
        assert_eq!(config, AttackConfig::default());
    }

    #[test]
    fn test_unsupported_strings_are_config_errors() {
        let options = AttackOptions {
            classification_loss: "Hinge".to_string(),
            ..AttackOptions::default()
        };
        assert!(matches!(options.into_config(), Err(Error::Config(_))));

        let options = AttackOptions {
            distance_loss: "EMD".to_string(),
            ..AttackOptions::default()
        };
        assert!(matches!(options.into_config(), Err(Error::Config(_))));

        let options = AttackOptions {
            optimizer: "rmsprop".to_string(),
            ..AttackOptions::default()
        };
        assert!(matches!(options.into_config(), Err(Error::Config(_))));

        let options = AttackOptions {
            project_gradient: true,
            projection: "sideways".to_string(),
            ..AttackOptions::default()
        };
        assert!(matches!(options.into_config(), Err(Error::Config(_))));
    }

    #[test]
    fn test_hausdorff_with_l2_is_rejected() {
        let mut config = AttackConfig::cw_l2();
        config.fidelity.hausdorff_weight = 0.1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.fidelity.distance = DistanceLoss::Chamfer { single_sided: true };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_numeric_validation() {
        let mut config = AttackConfig::default();
        config.learning_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = AttackConfig::default();
        config.iterations = 0;
        assert!(config.validate().is_err());

        let mut config = AttackConfig::default();
        config.initial_const = -1.0;
        assert!(config.validate().is_err());

        let mut config = AttackConfig::default();
        config.jitter = Some(JitterConfig {
            recompute_interval: 0,
            ..JitterConfig::default()
        });
        assert!(config.validate().is_err());

        let mut config = AttackConfig::default();
        config.fidelity.curvature = Some(CurvatureTerm { weight: 1.0, knn: 0 });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_weights_disable_optional_terms() {
        let options = AttackOptions {
            curvature_weight: 0.0,
            uniformity_weight: 0.0,
            ..AttackOptions::default()
        };
        let config = options.into_config().unwrap();
        assert!(config.fidelity.curvature.is_none());
        assert!(config.fidelity.uniformity.is_none());
    }

    #[test]
    fn test_options_from_partial_json() {
        let options = AttackOptions::from_json_str(
            r#"{ "targeted": false, "classification_loss": "Margin", "confidence": 0.5,
                 "distance_loss": "L2", "hausdorff_weight": 0.0, "curvature_weight": 0.0,
                 "optimizer": "sgd", "jitter": true, "project_gradient": true,
                 "projection": "clip" }"#,
        )
        .unwrap();
        let config = options.into_config().unwrap();

        assert_eq!(config.mode, AttackMode::Untargeted);
        assert_eq!(config.classification, ClassificationLoss::Margin { confidence: 0.5 });
        assert_eq!(config.fidelity.distance, DistanceLoss::L2);
        assert_eq!(config.optimizer, OptimizerKind::Sgd);
        assert_eq!(config.jitter, Some(JitterConfig::default()));
        assert_eq!(config.projection, Some(ProjectionMode::Clip));
        assert_eq!(config.iterations, 500);
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        assert!(matches!(
            AttackOptions::from_json_str("{ not json"),
            Err(Error::Serialization(_))
        ));
    }
}
