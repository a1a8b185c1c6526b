//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// A frequency value that cannot be represented in fixed point.
    #[error("Invalid frequency {value} THz: {reason}")]
    InvalidFrequency { value: f64, reason: &'static str },

    /// A line name that is empty or contains whitespace.
    #[error("Invalid line name {name:?}: {reason}")]
    InvalidLineName { name: String, reason: &'static str },

    /// Parse error for incoming data
    #[error("Failed to parse {field}: {reason}")]
    ParseError { field: String, reason: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
