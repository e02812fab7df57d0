//! Per-call pipeline stage machine.
//!
//! # State Machine
//!
//! ```text
//!   Received ─▶ Parsed ─▶ Admitted ─▶ PreHooked ─▶ SafetyChecked
//!      │          │          │            │              │
//!      │          │          │            │              ▼
//!      │          │          │            │           Routed ─▶ Forwarded ─▶ PostHooked
//!      │          │          │            │              │          │             │
//!      ▼          ▼          ▼            ▼              ▼          ▼             ▼
//!   ┌──────────────────────────────────────────────────────────────────────────────┐
//!   │                                  Audited                                      │
//!   └──────────────────────────────────────┬───────────────────────────────────────┘
//!                                          ▼
//!                                         Done
//! ```
//!
//! Stages only move forward. Any stage before `Audited` may short-circuit
//! straight to it.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Identifier and start time assigned.
    Received,
    /// Raw message decoded into a request.
    Parsed,
    /// Passed admission control.
    Admitted,
    /// Pre-hooks ran.
    PreHooked,
    /// Safety checkers ran.
    SafetyChecked,
    /// Route and instance resolved.
    Routed,
    /// Upstream answered.
    Forwarded,
    /// Post-hooks ran.
    PostHooked,
    /// Audit entry written.
    Audited,
    /// Response handed back.
    Done,
}

/// Check if a stage transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: Stage, to: Stage) -> bool {
    use Stage::{
        Admitted, Audited, Done, Forwarded, Parsed, PostHooked, PreHooked, Received, Routed,
        SafetyChecked,
    };

    matches!(
        (from, to),
        (Received, Parsed)
            | (Parsed, Admitted)
            | (Admitted, PreHooked)
            | (PreHooked, SafetyChecked)
            | (SafetyChecked, Routed)
            | (Routed, Forwarded)
            | (Forwarded, PostHooked)
            | (
                Received
                    | Parsed
                    | Admitted
                    | PreHooked
                    | SafetyChecked
                    | Routed
                    | Forwarded
                    | PostHooked,
                Audited
            )
            | (Audited, Done)
    )
}

/// Validates a stage transition and returns the target stage if valid.
///
/// # Errors
///
/// Returns `GatewayError::InvalidTransition` if the transition is not allowed.
pub fn validate_transition(from: Stage, to: Stage) -> Result<Stage> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(GatewayError::InvalidTransition { from, to })
    }
}
