//! Errors raised by the core message types.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors from parsing or converting core values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A request identifier could not be parsed.
    #[error("invalid request id: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// A protocol tag could not be parsed.
    #[error("unknown protocol tag: {0}")]
    UnknownProtocol(String),
}
