//! Error types for the audit layer.

use thiserror::Error;

/// A result type using `AuditError`.
pub type Result<T> = std::result::Result<T, AuditError>;

/// Errors that can occur during audit operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The store was configured with a capacity of zero.
    #[error("audit capacity must be at least 1")]
    ZeroCapacity,
}
