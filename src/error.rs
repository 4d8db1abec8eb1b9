//! Error types for the flow library

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, FlowError>;

/// Boxed error raised by an injected approximator
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum FlowError {
    /// Dimensionality, mask-length or context-length mismatch
    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeError {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A transform is not invertible at the given input or parameters
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Invalid construction-time configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Failure raised inside an approximator, passed through unchanged
    #[error("Approximator error: {0}")]
    Approximator(#[source] BoxError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl FlowError {
    pub(crate) fn shape(what: &'static str, expected: usize, actual: usize) -> Self {
        FlowError::ShapeError {
            what,
            expected,
            actual,
        }
    }

    /// Check if this is a shape error
    pub fn is_shape_error(&self) -> bool {
        matches!(self, FlowError::ShapeError { .. })
    }

    /// Check if this is a numerical instability
    pub fn is_numerical_instability(&self) -> bool {
        matches!(self, FlowError::NumericalInstability(_))
    }
}

/// Fail with a shape error unless `actual == expected`.
pub(crate) fn check_dim(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(FlowError::shape(what, expected, actual))
    }
}
