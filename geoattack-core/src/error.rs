//! Error types for geoattack

use thiserror::Error;

/// Main error type for geoattack operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for geoattack operations
pub type Result<T> = std::result::Result<T, Error>;
