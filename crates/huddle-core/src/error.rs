//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid field value
    #[error("Invalid {field}: {value:?} ({reason})")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl DomainError {
    pub(crate) fn invalid(field: &'static str, value: &str, reason: &'static str) -> Self {
        Self::InvalidFieldValue {
            field,
            value: value.to_string(),
            reason,
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
