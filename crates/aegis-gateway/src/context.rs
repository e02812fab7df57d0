//! Per-call scratch record threaded through the pipeline.

use std::collections::HashMap;

use aegis_core::{Metadata, Request, RequestId};
use aegis_traffic::RouteConfig;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::safety::SafetyVerdict;
use crate::stage::{self, Stage};

/// Metadata key set when a safety checker timed out.
pub const SAFETY_CHECK_TIMEOUT: &str = "safety_check_timeout";

/// Metadata key holding the last safety checker error.
pub const SAFETY_CHECK_ERROR: &str = "safety_check_error";

/// State of one call. Created after parsing and never shared across calls.
#[derive(Debug, Clone)]
pub struct GatewayContext {
    /// Wall-clock time the call entered the gateway.
    pub started_at: DateTime<Utc>,
    /// The canonical request. Hooks may rewrite everything but its id.
    pub request: Request,
    /// Caller address, if known.
    pub client_ip: Option<String>,
    /// Authenticated user, set by a pre-hook.
    pub user_id: Option<String>,
    /// Outcome of the safety checkers, once they ran.
    pub safety: Option<SafetyVerdict>,
    /// The matched route, once routing succeeded.
    pub route: Option<RouteConfig>,
    /// Values captured by the route's path template.
    pub path_params: HashMap<String, String>,
    /// Free-form per-call metadata.
    pub metadata: Metadata,
    stage: Stage,
}

impl GatewayContext {
    /// Create a context for a freshly parsed request, starting now.
    #[must_use]
    pub fn new(request: Request, client_ip: Option<String>) -> Self {
        Self::started(request, client_ip, Utc::now())
    }

    pub(crate) fn started(
        request: Request,
        client_ip: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            started_at,
            request,
            client_ip,
            user_id: None,
            safety: None,
            route: None,
            path_params: HashMap::new(),
            metadata: Metadata::new(),
            stage: Stage::Received,
        }
    }

    /// Identifier of the call.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request.id()
    }

    /// Current pipeline stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// The verdict that blocked the call, if any.
    #[must_use]
    pub fn blocking_verdict(&self) -> Option<&SafetyVerdict> {
        self.safety.as_ref().filter(|verdict| !verdict.is_safe)
    }

    /// Move to the next stage.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::InvalidTransition` if the move would skip or
    /// revisit a stage.
    pub fn advance(&mut self, to: Stage) -> Result<()> {
        self.stage = stage::validate_transition(self.stage, to)?;
        tracing::debug!(request_id = %self.request_id(), stage = ?to, "Pipeline stage");
        Ok(())
    }
}
