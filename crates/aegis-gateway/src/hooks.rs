//! Pre- and post-processing hooks.
//!
//! Pre-hooks run after admission and before safety checks; they may rewrite
//! the context but cannot abort the call. Named route middleware uses the
//! same trait and runs between routing and forwarding. Post-hooks observe
//! the final context and response.

use aegis_core::Response;
use async_trait::async_trait;

use crate::context::GatewayContext;

/// Hook run before safety checks, or as route middleware.
#[async_trait]
pub trait PreHook: Send + Sync {
    /// Name used for removal and in logs.
    fn name(&self) -> &str;

    /// Inspect or rewrite the call.
    async fn run(&self, ctx: &mut GatewayContext);
}

/// Hook run after the upstream answered.
#[async_trait]
pub trait PostHook: Send + Sync {
    /// Name used for removal and in logs.
    fn name(&self) -> &str;

    /// Observe the call and its response.
    async fn run(&self, ctx: &GatewayContext, response: &Response);
}

/// Resolves the caller's user id from a request header.
#[derive(Debug, Clone)]
pub struct HeaderUserId {
    header: String,
}

impl HeaderUserId {
    /// Read the user id from `header` (matched case-insensitively).
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl Default for HeaderUserId {
    fn default() -> Self {
        Self::new("x-user-id")
    }
}

#[async_trait]
impl PreHook for HeaderUserId {
    fn name(&self) -> &str {
        "header-user-id"
    }

    async fn run(&self, ctx: &mut GatewayContext) {
        let user = ctx
            .request
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&self.header))
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty());
        if user.is_some() {
            ctx.user_id = user;
        }
    }
}
