//! Audit record and statistics types.

use std::collections::BTreeMap;

use aegis_core::RequestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder recorded when a call carries no client address.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// An immutable record of one completed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    /// Identifier of the audited request.
    pub request_id: RequestId,
    /// When the call entered the gateway.
    pub timestamp: DateTime<Utc>,
    /// Client address, or `"unknown"`.
    pub client_ip: String,
    /// Authenticated user, if a hook resolved one.
    pub user_id: Option<String>,
    /// Request method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Final status code returned to the caller.
    pub status_code: u16,
    /// Wall-clock latency from entry to audit, in milliseconds.
    pub latency_ms: f64,
    /// Whether a safety checker blocked the call.
    pub safety_blocked: bool,
    /// Reason reported by the blocking checker.
    pub safety_reason: Option<String>,
    /// Request body, when request body logging is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
    /// Response body, when response body logging is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<Value>,
}

impl AuditLog {
    /// Start building a record for the given request.
    #[must_use]
    pub fn builder(
        request_id: RequestId,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> AuditLogBuilder {
        AuditLogBuilder {
            log: Self {
                request_id,
                timestamp: Utc::now(),
                client_ip: UNKNOWN_CLIENT.to_string(),
                user_id: None,
                method: method.into(),
                path: path.into(),
                status_code: 0,
                latency_ms: 0.0,
                safety_blocked: false,
                safety_reason: None,
                request_body: None,
                response_body: None,
            },
        }
    }
}

/// Builder for [`AuditLog`]. Records are immutable once built.
#[derive(Debug, Clone)]
#[must_use]
pub struct AuditLogBuilder {
    log: AuditLog,
}

impl AuditLogBuilder {
    /// Set the entry timestamp.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.log.timestamp = timestamp;
        self
    }

    /// Set the client address; `None` keeps `"unknown"`.
    pub fn client_ip(mut self, client_ip: Option<&str>) -> Self {
        if let Some(ip) = client_ip {
            self.log.client_ip = ip.to_string();
        }
        self
    }

    /// Set the user id.
    pub fn user_id(mut self, user_id: Option<String>) -> Self {
        self.log.user_id = user_id;
        self
    }

    /// Set the final status code.
    pub fn status_code(mut self, status_code: u16) -> Self {
        self.log.status_code = status_code;
        self
    }

    /// Set the latency in milliseconds.
    pub fn latency_ms(mut self, latency_ms: f64) -> Self {
        self.log.latency_ms = latency_ms;
        self
    }

    /// Mark the call as blocked by a safety checker.
    pub fn blocked(mut self, reason: Option<String>) -> Self {
        self.log.safety_blocked = true;
        self.log.safety_reason = reason;
        self
    }

    /// Attach the request body.
    pub fn request_body(mut self, body: Option<Value>) -> Self {
        self.log.request_body = body;
        self
    }

    /// Attach the response body.
    pub fn response_body(mut self, body: Option<Value>) -> Self {
        self.log.response_body = body;
        self
    }

    /// Finish the record.
    #[must_use]
    pub fn build(self) -> AuditLog {
        self.log
    }
}

/// Aggregate statistics derived from the audit log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayStats {
    /// Number of audited calls.
    pub total_requests: usize,
    /// Number of calls blocked by a safety checker.
    pub blocked_requests: usize,
    /// `blocked_requests / total_requests`, or 0 with no calls.
    pub block_rate: f64,
    /// Mean latency in milliseconds, or 0 with no calls.
    pub average_latency_ms: f64,
    /// Number of calls per status code.
    pub status_codes: BTreeMap<u16, usize>,
}

impl GatewayStats {
    /// Compute statistics over a set of records.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_logs(logs: &[AuditLog]) -> Self {
        let total_requests = logs.len();
        if total_requests == 0 {
            return Self::default();
        }

        let blocked_requests = logs.iter().filter(|log| log.safety_blocked).count();
        let latency_sum: f64 = logs.iter().map(|log| log.latency_ms).sum();

        let mut status_codes = BTreeMap::new();
        for log in logs {
            *status_codes.entry(log.status_code).or_insert(0) += 1;
        }

        Self {
            total_requests,
            blocked_requests,
            block_rate: blocked_requests as f64 / total_requests as f64,
            average_latency_ms: latency_sum / total_requests as f64,
            status_codes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(status: u16, latency: f64, blocked: bool) -> AuditLog {
        let builder = AuditLog::builder(RequestId::generate(), "POST", "/chat")
            .status_code(status)
            .latency_ms(latency);
        if blocked {
            builder.blocked(Some("prompt injection".into())).build()
        } else {
            builder.build()
        }
    }

    #[test]
    fn builder_defaults() {
        let entry = AuditLog::builder(RequestId::generate(), "GET", "/").build();
        assert_eq!(entry.client_ip, UNKNOWN_CLIENT);
        assert!(!entry.safety_blocked);
        assert!(entry.safety_reason.is_none());
        assert!(entry.request_body.is_none());
    }

    #[test]
    fn stats_empty() {
        let stats = GatewayStats::from_logs(&[]);
        assert_eq!(stats.total_requests, 0);
        assert!(stats.block_rate.abs() < f64::EPSILON);
        assert!(stats.average_latency_ms.abs() < f64::EPSILON);
        assert!(stats.status_codes.is_empty());
    }

    #[test]
    fn stats_aggregate() {
        let logs = vec![
            log(200, 10.0, false),
            log(200, 20.0, false),
            log(403, 30.0, true),
            log(404, 40.0, false),
        ];
        let stats = GatewayStats::from_logs(&logs);

        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.blocked_requests, 1);
        assert!((stats.block_rate - 0.25).abs() < f64::EPSILON);
        assert!((stats.average_latency_ms - 25.0).abs() < f64::EPSILON);
        assert_eq!(stats.status_codes.get(&200), Some(&2));
        assert_eq!(stats.status_codes.get(&403), Some(&1));
        assert_eq!(stats.status_codes.get(&404), Some(&1));
    }

    #[test]
    fn body_fields_skipped_when_absent() {
        let json = serde_json::to_value(log(200, 1.0, false)).unwrap();
        assert!(json.get("request_body").is_none());
        assert_eq!(json["client_ip"], "unknown");
    }
}
