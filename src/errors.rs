//! Structured error types with stable codes
//!
//! Only malformed configuration is an error. Assignment and tracking against
//! unknown, inactive or ineligible targets are silent no-ops and never reach
//! this type.

use serde::{Deserialize, Serialize};

/// Structured error body for callers that forward errors over a wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,
}

/// Errors from experiment engine operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExperimentError {
    /// Malformed experiment configuration; the call had no effect
    #[error("Invalid experiment configuration for field '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("Experiment already exists: {0}")]
    AlreadyExists(String),

    #[error("Experiment not found: {0}")]
    NotFound(String),

    /// A background task was requested outside a tokio runtime
    #[error("Runtime unavailable: {0}")]
    RuntimeUnavailable(String),
}

impl ExperimentError {
    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Get error code for client identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::AlreadyExists(_) => "EXPERIMENT_ALREADY_EXISTS",
            Self::NotFound(_) => "EXPERIMENT_NOT_FOUND",
            Self::RuntimeUnavailable(_) => "RUNTIME_UNAVAILABLE",
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Convert to structured error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Type alias for Results using ExperimentError
pub type Result<T> = std::result::Result<T, ExperimentError>;
