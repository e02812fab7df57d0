//! Gateway configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// How the gateway is deployed in front of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayMode {
    /// Standalone proxy in front of an opaque application.
    #[default]
    Proxy,
    /// Embedded in the application's own request handling.
    Middleware,
    /// Co-located sidecar next to each application replica.
    Sidecar,
}

/// What a failing or timed-out safety checker means for the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyFailurePolicy {
    /// Record the failure and keep evaluating.
    #[default]
    FailOpen,
    /// Treat the failure as an unsafe verdict.
    FailClosed,
}

/// Configuration for the gateway pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Deployment mode. Informational; the pipeline is identical in every mode.
    #[serde(default)]
    pub mode: GatewayMode,

    /// Run safety checkers on every call.
    #[serde(default = "GatewayConfig::default_true")]
    pub enable_safety_check: bool,

    /// Per-checker timeout in milliseconds.
    #[serde(default = "GatewayConfig::default_safety_timeout")]
    pub safety_check_timeout_ms: u64,

    /// Outcome of a checker that fails or times out.
    #[serde(default)]
    pub safety_failure_policy: SafetyFailurePolicy,

    /// Apply per-client admission control.
    #[serde(default = "GatewayConfig::default_true")]
    pub enable_rate_limit: bool,

    /// Calls per second allowed for each client key.
    #[serde(default = "GatewayConfig::default_rate_limit")]
    pub rate_limit_per_second: u32,

    /// Append an audit entry for every call.
    #[serde(default = "GatewayConfig::default_true")]
    pub enable_audit_log: bool,

    /// Capacity of the default in-memory audit store.
    #[serde(default = "GatewayConfig::default_audit_capacity")]
    pub audit_capacity: usize,

    /// Copy request bodies into audit entries.
    #[serde(default)]
    pub log_request_body: bool,

    /// Copy response bodies into audit entries.
    #[serde(default)]
    pub log_response_body: bool,

    /// End-to-end call timeout in milliseconds.
    #[serde(default = "GatewayConfig::default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Upstream connect timeout in milliseconds.
    #[serde(default = "GatewayConfig::default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl GatewayConfig {
    const fn default_true() -> bool {
        true
    }

    const fn default_safety_timeout() -> u64 {
        5_000
    }

    const fn default_rate_limit() -> u32 {
        100
    }

    const fn default_audit_capacity() -> usize {
        aegis_audit::DEFAULT_CAPACITY
    }

    const fn default_request_timeout() -> u64 {
        30_000
    }

    const fn default_connect_timeout() -> u64 {
        5_000
    }

    /// Get the per-checker timeout as a `Duration`.
    #[must_use]
    pub const fn safety_check_timeout(&self) -> Duration {
        Duration::from_millis(self.safety_check_timeout_ms)
    }

    /// Get the end-to-end call timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get the upstream connect timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reject settings the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.audit_capacity == 0 {
            return Err(GatewayError::InvalidConfig(
                "audit_capacity must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(GatewayError::InvalidConfig(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.enable_safety_check && self.safety_check_timeout_ms == 0 {
            return Err(GatewayError::InvalidConfig(
                "safety_check_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: GatewayMode::default(),
            enable_safety_check: true,
            safety_check_timeout_ms: Self::default_safety_timeout(),
            safety_failure_policy: SafetyFailurePolicy::default(),
            enable_rate_limit: true,
            rate_limit_per_second: Self::default_rate_limit(),
            enable_audit_log: true,
            audit_capacity: Self::default_audit_capacity(),
            log_request_body: false,
            log_response_body: false,
            request_timeout_ms: Self::default_request_timeout(),
            connect_timeout_ms: Self::default_connect_timeout(),
        }
    }
}
