//! Audit trail for the aegis gateway.
//!
//! This crate provides the append-only, capacity-bounded record of completed
//! calls and the statistics derived from it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  append   ┌──────────────────┐
//! │   Gateway        │──────────▶│   AuditStore     │
//! │   (pipeline)     │           │   (trait)        │
//! └──────────────────┘           └────────┬─────────┘
//!                                         │
//!                                ┌────────▼─────────┐
//!                                │ MemoryAuditStore │
//!                                │ (ring buffer)    │
//!                                └────────┬─────────┘
//!                                         │ list / statistics
//!                                ┌────────▼─────────┐
//!                                │  Monitoring /    │
//!                                │  compliance      │
//!                                └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use aegis_audit::{AuditLog, AuditStore, MemoryAuditStore};
//! use aegis_core::RequestId;
//!
//! let store = MemoryAuditStore::new();
//! let log = AuditLog::builder(RequestId::generate(), "GET", "/health")
//!     .status_code(200)
//!     .latency_ms(1.5)
//!     .build();
//! store.append(log).unwrap();
//!
//! let stats = store.statistics().unwrap();
//! assert_eq!(stats.total_requests, 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod types;

pub use error::{AuditError, Result};
pub use memory::{MemoryAuditStore, DEFAULT_CAPACITY};
pub use types::{AuditLog, AuditLogBuilder, GatewayStats};

/// The audit storage trait.
///
/// Implementations must support concurrent appends and must never lose the
/// most recent entries when trimming to capacity.
pub trait AuditStore: Send + Sync {
    /// Append a completed-call record, evicting the oldest entries once the
    /// store exceeds its capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored. Callers treat audit
    /// logging as best-effort and must not fail the call on error.
    fn append(&self, log: AuditLog) -> Result<()>;

    /// Page through the log, newest last.
    ///
    /// Skips the `offset` most recent entries and returns up to `limit`
    /// entries immediately before them, in chronological order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn list(&self, limit: usize, offset: usize) -> Result<Vec<AuditLog>>;

    /// Return every retained entry, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn snapshot(&self) -> Result<Vec<AuditLog>>;

    /// Number of retained entries.
    fn len(&self) -> usize;

    /// Returns true if no entries are retained.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate statistics over the retained entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn statistics(&self) -> Result<GatewayStats> {
        Ok(GatewayStats::from_logs(&self.snapshot()?))
    }
}
