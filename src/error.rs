//! Error types for the toolkit

use thiserror::Error;

/// Result type alias for toolkit operations
pub type Result<T> = std::result::Result<T, MltkError>;

/// Main error type
#[derive(Error, Debug)]
pub enum MltkError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Model not fitted")]
    NotFitted,

    #[error("Convergence not reached after {iterations} iterations")]
    ConvergenceNotReached { iterations: usize },

    #[error("Invalid configuration: {name} = {value}, {reason}")]
    InvalidConfiguration {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Empty dataset")]
    EmptyData,

    #[error("Invalid labels: {0}")]
    InvalidLabels(String),

    #[error("Index {index} out of bounds for dataset of size {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MltkError {
    /// Shorthand for an `InvalidConfiguration` error
    pub fn invalid_config(
        name: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        MltkError::InvalidConfiguration {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for MltkError {
    fn from(err: serde_json::Error) -> Self {
        MltkError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = MltkError::DimensionMismatch { expected: 3, actual: 2 };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 3, got 2");

        let err = MltkError::invalid_config("margin", -1.0, "must be non-negative");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: margin = -1, must be non-negative"
        );
    }

    #[test]
    fn test_from_json_error() {
        let parse: std::result::Result<f64, _> = serde_json::from_str("not json");
        let err: MltkError = parse.unwrap_err().into();
        assert!(matches!(err, MltkError::Serialization(_)));
    }
}
