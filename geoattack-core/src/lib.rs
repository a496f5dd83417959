//! Core data structures and traits for geoattack
//!
//! This crate provides the fundamental types shared by the attack engine:
//! point and vector aliases, the batched `[B, 3, N]` cloud container,
//! the nearest neighbor search trait, and the common error type.

pub mod point;
pub mod batch;
pub mod traits;
pub mod error;

pub use point::*;
pub use batch::*;
pub use traits::*;
pub use error::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Point3, Vector3, Matrix3};
