//! # GeoAttack Attack Engine
//!
//! Geometry-aware adversarial attacks on point cloud classifiers.
//!
//! The engine searches, per sample, for a small perturbation of the input
//! cloud that flips a classifier's decision while keeping the cloud close to
//! the original surface. It combines:
//!
//! - a classification objective (margin or cross-entropy),
//! - weighted fidelity terms (L2 or Chamfer distance, Hausdorff, curvature
//!   consistency and point uniformity),
//! - gradient descent on the candidate cloud with an optional surface-aware
//!   projection after each step,
//! - an outer binary search over the per-sample penalty constant.
//!
//! ## Example
//!
//! ```no_run
//! use geoattack_attack::{AttackBatch, AttackConfig, Attacker, PointNetClassifier};
//! use geoattack_core::CloudBatch;
//!
//! # fn main() -> geoattack_core::Result<()> {
//! let model = PointNetClassifier::random(&[64, 128], &[64], 10, 0)?;
//! let points = CloudBatch::zeros(1, 1024);
//! let normals = CloudBatch::filled(1, 1024, 0.0);
//! let batch = AttackBatch::new(points, normals, vec![0], Some(vec![3]))?;
//!
//! let attacker = Attacker::new(&model, AttackConfig::default())?;
//! let outcome = attacker.attack(&batch)?;
//! println!("success rate: {:.2}", outcome.success_rate());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod model;
pub mod loss;
pub mod evaluator;
pub mod projection;
pub mod optimizer;
pub mod driver;

pub use config::*;
pub use model::*;
pub use evaluator::*;
pub use projection::*;
pub use optimizer::*;
pub use driver::*;
