//! Domain error types
//!
//! Validation failures raised while constructing or mutating domain values.
//! These are rejected synchronously and never retried.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid checksum format (expected 32 lowercase hex digits)
    #[error("Invalid checksum: {0}")]
    InvalidChecksum(String),

    /// Path is not within the root folder it was resolved against
    #[error("Path not within root folder: {0}")]
    PathNotInRoot(String),

    /// Text that does not name a known enum variant
    #[error("Unknown {kind}: {value}")]
    UnknownVariant {
        /// The enum being parsed (e.g. "folder role")
        kind: &'static str,
        /// The rejected text
        value: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}
