//! Gateway error types.
//!
//! Every pipeline failure is a [`GatewayError`], which maps to the status
//! code and error body of the single [`Response`] the caller receives.

use std::time::Duration;

use aegis_audit::AuditError;
use aegis_core::{Protocol, RequestId, Response};
use aegis_traffic::TrafficError;
use thiserror::Error;

use crate::stage::Stage;

/// A result type using `GatewayError`.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Status code recorded for calls whose caller went away mid-flight.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Errors raised while converting between raw messages and canonical requests.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No codec is registered for the protocol.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(Protocol),

    /// The raw message does not have the shape the codec expects.
    #[error("malformed {protocol} message: {reason}")]
    MalformedMessage {
        /// Protocol whose codec rejected the message.
        protocol: Protocol,
        /// What was wrong with it.
        reason: String,
    },

    /// A direct call completed with an error.
    #[error("call failed: {0}")]
    CallFailed(String),

    /// Request middleware replaced the request identifier.
    #[error("request middleware changed request id {0}")]
    IdentityChanged(RequestId),

    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by a safety checker. None of these is a verdict; the
/// failure policy decides what they mean for the call.
#[derive(Debug, Error)]
pub enum SafetyError {
    /// The checker did not answer within the configured timeout.
    #[error("safety check timed out after {0:?}")]
    Timeout(Duration),

    /// The checker reported an internal failure.
    #[error("safety checker {checker} failed: {reason}")]
    Checker {
        /// Name of the failing checker.
        checker: String,
        /// Failure description.
        reason: String,
    },

    /// The checker panicked.
    #[error("safety checker {checker} panicked: {message}")]
    Panicked {
        /// Name of the panicking checker.
        checker: String,
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Errors raised while forwarding a request to an upstream instance.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The upstream did not answer in time.
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    /// The upstream could not be reached.
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// The upstream answered with something that is not a response.
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    /// The request cannot be expressed as an upstream HTTP call.
    #[error("request cannot be forwarded: {0}")]
    InvalidRequest(String),
}

impl ForwardError {
    /// Returns true if another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Errors that terminate a call or reject an administrative operation.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The raw message could not be parsed or formatted.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The caller exceeded its admission limit.
    #[error("too many requests, retry later")]
    RateLimited,

    /// A safety checker judged the call unsafe.
    #[error("{0}")]
    Blocked(String),

    /// No route matches the path and method.
    #[error("no route for {method} {path}")]
    RouteNotFound {
        /// Request method.
        method: String,
        /// Request path.
        path: String,
    },

    /// The route matched but its service has no healthy instance.
    #[error("no healthy instance for service {0}")]
    NoHealthyInstance(String),

    /// The caller sent something the upstream call cannot carry.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The upstream failed after all retries.
    #[error("bad gateway: {0}")]
    Upstream(String),

    /// The upstream or the whole pipeline ran out of time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The pipeline attempted a stage transition it does not allow.
    #[error("invalid stage transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current stage.
        from: Stage,
        /// Requested stage.
        to: Stage,
    },

    /// The gateway configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A route or instance administration call failed.
    #[error(transparent)]
    Traffic(#[from] TrafficError),

    /// The audit store failed.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// Internal failure, including panics caught at the call boundary.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Get the status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::RateLimited => 429,
            Self::Blocked(_) => 403,
            Self::RouteNotFound { .. } => 404,
            Self::NoHealthyInstance(_) => 503,
            Self::Upstream(_) => 502,
            Self::Timeout(_) => 504,
            Self::BadRequest(_) | Self::Traffic(_) | Self::InvalidConfig(_) => 400,
            Self::Protocol(_)
            | Self::InvalidTransition { .. }
            | Self::Audit(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Get the error code string for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol_error",
            Self::RateLimited => "rate_limited",
            Self::Blocked(_) => "safety_blocked",
            Self::RouteNotFound { .. } => "route_not_found",
            Self::NoHealthyInstance(_) => "service_unavailable",
            Self::BadRequest(_) => "bad_request",
            Self::Upstream(_) => "bad_gateway",
            Self::Timeout(_) => "timeout",
            Self::InvalidTransition { .. } | Self::Internal(_) => "internal_error",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Traffic(_) => "invalid_traffic_config",
            Self::Audit(_) => "audit_error",
        }
    }

    /// Convert into the error response for `request_id`.
    #[must_use]
    pub fn into_response(self, request_id: RequestId) -> Response {
        let status = self.status_code();
        let code = self.code();
        let mut response = Response::error(request_id, status, self.to_string());
        response
            .headers
            .insert("x-aegis-error".to_string(), code.to_string());
        response
    }
}
