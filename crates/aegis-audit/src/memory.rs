//! In-memory ring-buffer audit store.

use std::collections::VecDeque;

use parking_lot::RwLock;

use crate::error::{AuditError, Result};
use crate::types::AuditLog;
use crate::AuditStore;

/// Number of entries retained by default.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Audit store that keeps the most recent `capacity` entries in memory.
///
/// Appends and trims happen under one write lock, so concurrent appends can
/// never evict an entry newer than one that survives.
#[derive(Debug)]
pub struct MemoryAuditStore {
    capacity: usize,
    logs: RwLock<VecDeque<AuditLog>>,
}

impl MemoryAuditStore {
    /// Create a store with the default capacity of 10,000 entries.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            logs: RwLock::new(VecDeque::new()),
        }
    }

    /// Create a store with a custom capacity.
    ///
    /// # Errors
    ///
    /// Returns `AuditError::ZeroCapacity` if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(AuditError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            logs: RwLock::new(VecDeque::new()),
        })
    }

    /// Maximum number of retained entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every retained entry.
    pub fn clear(&self) {
        self.logs.write().clear();
    }
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, log: AuditLog) -> Result<()> {
        let mut logs = self.logs.write();
        logs.push_back(log);
        while logs.len() > self.capacity {
            logs.pop_front();
        }
        Ok(())
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<AuditLog>> {
        let logs = self.logs.read();
        let end = logs.len().saturating_sub(offset);
        let start = end.saturating_sub(limit);
        Ok(logs.range(start..end).cloned().collect())
    }

    fn snapshot(&self) -> Result<Vec<AuditLog>> {
        Ok(self.logs.read().iter().cloned().collect())
    }

    fn len(&self) -> usize {
        self.logs.read().len()
    }
}
