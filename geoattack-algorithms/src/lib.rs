//! # GeoAttack Algorithms
//!
//! Geometry utilities used by the attack engine.
//!
//! This crate provides nearest neighbor search, covariance-based normal
//! estimation, curvature statistics, tangent-plane projection and jitter,
//! and the sampling primitives used by the uniformity loss. All functions
//! are pure and operate on point slices.

pub mod nearest_neighbor;
pub mod normals;
pub mod curvature;
pub mod tangent;
pub mod sampling;

// Re-export commonly used items
pub use nearest_neighbor::*;
pub use normals::*;
pub use curvature::*;
pub use tangent::*;
pub use sampling::*;
