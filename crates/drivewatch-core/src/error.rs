//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },

    /// Alert definition not registered with the evaluator
    #[error("Unknown alert: {alert_id}")]
    UnknownAlert { alert_id: String },
}

impl DomainError {
    /// Shorthand for an [`DomainError::InvalidFieldValue`] error.
    pub fn invalid(field: &str, value: &str, expected: &str) -> Self {
        Self::InvalidFieldValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
