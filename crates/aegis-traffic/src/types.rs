//! Types for the traffic crate.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Instance selection strategy. One strategy is active per [`LoadBalancer`].
///
/// [`LoadBalancer`]: crate::LoadBalancer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    /// Cycle through healthy instances with a per-service cursor.
    #[default]
    RoundRobin,
    /// Uniform random choice.
    Random,
    /// Fewest active connections; ties go to the earliest registered.
    LeastConnections,
    /// Random choice proportional to instance weight.
    Weighted,
    /// Stable hash of the client address; random without one.
    IpHash,
}

/// One network-addressable backend replica of a logical service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Identifier, unique within the service's pool.
    pub id: String,
    /// Host name or IP.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Relative weight for weighted selection (at least 1).
    #[serde(default = "ServiceInstance::default_weight")]
    pub weight: u32,
    /// Whether the instance may be selected.
    #[serde(default = "ServiceInstance::default_healthy")]
    pub healthy: bool,
    /// Calls currently being forwarded to this instance.
    #[serde(default)]
    pub active_connections: u32,
    /// Free-form instance metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ServiceInstance {
    const fn default_weight() -> u32 {
        1
    }

    const fn default_healthy() -> bool {
        true
    }

    /// Create a healthy instance with weight 1.
    #[must_use]
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            weight: Self::default_weight(),
            healthy: true,
            active_connections: 0,
            metadata: HashMap::new(),
        }
    }

    /// Set the weight.
    #[must_use]
    pub const fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Set the active connection count.
    #[must_use]
    pub const fn with_active_connections(mut self, active: u32) -> Self {
        self.active_connections = active;
        self
    }

    /// Return `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Path template with literal, `{name}` and `*` segments.
    pub path_pattern: String,
    /// Logical service the route forwards to.
    pub service_name: String,
    /// Allowed methods.
    #[serde(default = "RouteConfig::default_methods")]
    pub methods: Vec<String>,
    /// Higher priorities are matched first.
    #[serde(default)]
    pub priority: i32,
    /// Names of route middleware to run before forwarding.
    #[serde(default)]
    pub middleware: Vec<String>,
    /// Optional per-route admission limit, in requests per second.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    /// Forward timeout in milliseconds.
    #[serde(default = "RouteConfig::default_timeout")]
    pub timeout_ms: u64,
    /// Retries after a failed forward attempt.
    #[serde(default = "RouteConfig::default_retry_count")]
    pub retry_count: u32,
}

impl RouteConfig {
    fn default_methods() -> Vec<String> {
        vec!["GET".to_string(), "POST".to_string()]
    }

    const fn default_timeout() -> u64 {
        30_000
    }

    const fn default_retry_count() -> u32 {
        3
    }

    /// Create a route with default methods (`GET`, `POST`), priority 0,
    /// a 30 second timeout and 3 retries.
    #[must_use]
    pub fn new(path_pattern: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            path_pattern: path_pattern.into(),
            service_name: service_name.into(),
            methods: Self::default_methods(),
            priority: 0,
            middleware: Vec::new(),
            rate_limit: None,
            timeout_ms: Self::default_timeout(),
            retry_count: Self::default_retry_count(),
        }
    }

    /// Replace the allowed methods.
    #[must_use]
    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the route middleware names.
    #[must_use]
    pub fn with_middleware<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.middleware = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-route admission limit.
    #[must_use]
    pub const fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.rate_limit = Some(per_second);
        self
    }

    /// Set the forward timeout.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the retry count.
    #[must_use]
    pub const fn with_retry_count(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    /// Get the forward timeout as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns true if `method` is one of the route's methods, compared
    /// exactly.
    #[must_use]
    pub fn allows(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

/// Result of matching a path against the route table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteMatch {
    /// Whether any route matched.
    pub matched: bool,
    /// The winning route.
    pub route: Option<RouteConfig>,
    /// Values captured by `{name}` segments.
    pub path_params: HashMap<String, String>,
    /// Selected instance; `None` when the service has no healthy instance.
    pub instance: Option<ServiceInstance>,
}

impl RouteMatch {
    /// A miss.
    #[must_use]
    pub fn no_match() -> Self {
        Self::default()
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitResult {
    /// Whether the call may proceed.
    pub allowed: bool,
    /// Tokens left in the bucket after this check.
    pub remaining: u32,
    /// End of the current window.
    pub reset_at: DateTime<Utc>,
}
