use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single structural or range violation found while validating a deal
/// document. `path` is dotted, e.g. `modules.debt.term_months`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Error)]
pub enum UnderwritingError {
    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Validation failed with {} issue(s)", .0.len())]
    Validation(Vec<ValidationIssue>),

    #[error("Convergence failure: {function} did not converge after {iterations} iterations (delta: {last_delta})")]
    ConvergenceFailure {
        function: String,
        iterations: u32,
        last_delta: f64,
    },

    #[error("No root bracketed for {function} in [{lower}, {upper}]")]
    NoBracket {
        function: String,
        lower: f64,
        upper: f64,
    },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Non-finite value in {context} at index {index}")]
    NonFiniteValue { context: String, index: usize },

    #[error("Series length mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Index {index} out of bounds for {context} (length {length})")]
    IndexOutOfBounds {
        context: String,
        index: usize,
        length: usize,
    },

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    #[error("Date error: {0}")]
    DateError(String),

    #[error("{missing} must be computed before {module}")]
    Sequencing { module: String, missing: String },

    #[error("Module {module} failed: {message}")]
    Module { module: String, message: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl UnderwritingError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for solver failures that callers may downgrade to a warning.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            Self::ConvergenceFailure { .. } | Self::NoBracket { .. } | Self::DivisionByZero { .. }
        )
    }
}

impl From<serde_json::Error> for UnderwritingError {
    fn from(e: serde_json::Error) -> Self {
        UnderwritingError::SerializationError(e.to_string())
    }
}
