//! Gateway service implementation.
//!
//! This module provides the [`Gateway`], which composes the protocol adapter,
//! rate limiter, hooks, safety checkers, router, load balancer, forwarder and
//! audit store into one request pipeline.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aegis_audit::{AuditLog, AuditStore, GatewayStats, MemoryAuditStore};
use aegis_core::{Protocol, RequestId, Response};
use aegis_traffic::{
    LoadBalanceStrategy, LoadBalancer, RateLimiter, RouteConfig, Router, ServiceInstance,
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;

use crate::config::{GatewayConfig, SafetyFailurePolicy};
use crate::context::{GatewayContext, SAFETY_CHECK_ERROR, SAFETY_CHECK_TIMEOUT};
use crate::error::{
    ForwardError, GatewayError, Result, SafetyError, CLIENT_CLOSED_REQUEST,
};
use crate::forward::{Forwarder, NoopForwarder};
use crate::hooks::{PostHook, PreHook};
use crate::protocol::{ProtocolAdapter, RawMessage};
use crate::safety::{SafetyChecker, SafetyVerdict};
use crate::stage::Stage;

/// Admission key for calls without a client address.
pub const GLOBAL_RATE_LIMIT_KEY: &str = "global";

/// Method recorded for calls whose raw message could not be parsed.
pub const UNPARSED_METHOD: &str = "UNKNOWN";

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

/// The unified request gateway.
///
/// Every call to [`handle`](Self::handle) produces exactly one [`Response`]
/// carrying the id assigned on entry and, when audit logging is enabled,
/// exactly one audit entry, including calls that fail, panic, time out or
/// are cancelled.
pub struct Gateway<A: AuditStore = MemoryAuditStore, F: Forwarder = NoopForwarder> {
    config: GatewayConfig,
    adapter: ProtocolAdapter,
    router: Router,
    limiter: RateLimiter,
    audit: Arc<A>,
    forwarder: Arc<F>,
    checkers: RwLock<Vec<Arc<dyn SafetyChecker>>>,
    pre_hooks: RwLock<Vec<Arc<dyn PreHook>>>,
    post_hooks: RwLock<Vec<Arc<dyn PostHook>>>,
    route_middleware: RwLock<HashMap<String, Arc<dyn PreHook>>>,
}

impl Gateway<MemoryAuditStore, NoopForwarder> {
    /// Create a dry-run gateway with a round-robin balancer, an in-memory
    /// audit store sized from the config and a [`NoopForwarder`].
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::InvalidConfig` if the configuration is unusable.
    pub fn with_defaults(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let audit = MemoryAuditStore::with_capacity(config.audit_capacity)?;
        Ok(Self::new(
            config,
            Arc::new(LoadBalancer::new(LoadBalanceStrategy::RoundRobin)),
            Arc::new(audit),
            Arc::new(NoopForwarder),
        ))
    }
}

impl<A: AuditStore, F: Forwarder> Gateway<A, F> {
    /// Create a gateway from its collaborators.
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        balancer: Arc<LoadBalancer>,
        audit: Arc<A>,
        forwarder: Arc<F>,
    ) -> Self {
        tracing::info!(
            mode = ?config.mode,
            strategy = ?balancer.strategy(),
            safety = config.enable_safety_check,
            rate_limit = config.enable_rate_limit,
            audit = config.enable_audit_log,
            "Gateway initialised"
        );
        Self {
            config,
            adapter: ProtocolAdapter::new(),
            router: Router::new(balancer),
            limiter: RateLimiter::new(),
            audit,
            forwarder,
            checkers: RwLock::new(Vec::new()),
            pre_hooks: RwLock::new(Vec::new()),
            post_hooks: RwLock::new(Vec::new()),
            route_middleware: RwLock::new(HashMap::new()),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The protocol adapter, for registering codecs and request middleware.
    #[must_use]
    pub const fn adapter(&self) -> &ProtocolAdapter {
        &self.adapter
    }

    /// The route table.
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// The load balancer shared with the router.
    #[must_use]
    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        self.router.balancer()
    }

    /// The admission limiter.
    #[must_use]
    pub const fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Get a reference to the audit store.
    #[must_use]
    pub fn audit_store(&self) -> &A {
        &self.audit
    }

    // =========================================================================
    // Call path
    // =========================================================================

    /// Run one call through the pipeline.
    ///
    /// Never fails: every outcome, including parse failures and panics, is
    /// expressed as a [`Response`] for the id assigned here.
    pub async fn handle(
        &self,
        protocol: &Protocol,
        raw: RawMessage,
        client_ip: Option<&str>,
    ) -> Response {
        let request_id = RequestId::generate();
        let mut flight = InFlight::new(&*self.audit, &self.config, request_id, client_ip);
        tracing::debug!(request_id = %request_id, protocol = %protocol, "Request received");

        let timeout = self.config.request_timeout();
        let pipeline = tokio::time::timeout(timeout, self.pipeline(protocol, raw, &mut flight));
        let outcome = AssertUnwindSafe(pipeline).catch_unwind().await;

        let mut response = match outcome {
            Ok(Ok(Ok(response))) => response,
            Ok(Ok(Err(err))) => {
                log_failure(request_id, &err);
                err.into_response(request_id)
            }
            Ok(Err(_)) => {
                tracing::warn!(request_id = %request_id, ?timeout, "Request timed out");
                GatewayError::Timeout(timeout).into_response(request_id)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(request_id = %request_id, panic = %message, "Request handler panicked");
                GatewayError::Internal(message).into_response(request_id)
            }
        };
        response.request_id = request_id;

        flight.finish(&response);
        tracing::debug!(
            request_id = %request_id,
            status = response.status_code,
            "Request completed"
        );
        response
    }

    /// Parse a raw message, run it through the pipeline and format the
    /// response back into the protocol's raw shape.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Protocol` if the response cannot be formatted,
    /// including `ProtocolError::CallFailed` for failed direct calls.
    pub async fn handle_raw(
        &self,
        protocol: &Protocol,
        raw: RawMessage,
        client_ip: Option<&str>,
    ) -> Result<RawMessage> {
        let response = self.handle(protocol, raw, client_ip).await;
        Ok(self.adapter.format(protocol, &response)?)
    }

    async fn pipeline(
        &self,
        protocol: &Protocol,
        raw: RawMessage,
        flight: &mut InFlight<'_>,
    ) -> Result<Response> {
        let request = self
            .adapter
            .parse_with_id(protocol, raw, flight.request_id)?;
        let ctx = flight.ctx.insert(GatewayContext::started(
            request,
            flight.client_ip.clone(),
            flight.started_at,
        ));
        ctx.advance(Stage::Parsed)?;

        if self.config.enable_rate_limit {
            let key = ctx
                .client_ip
                .clone()
                .unwrap_or_else(|| GLOBAL_RATE_LIMIT_KEY.to_string());
            self.admit(ctx.request_id(), &key, self.config.rate_limit_per_second)?;
        }
        ctx.advance(Stage::Admitted)?;

        let pre_hooks: Vec<_> = self.pre_hooks.read().clone();
        for hook in &pre_hooks {
            hook.run(ctx).await;
        }
        ctx.advance(Stage::PreHooked)?;

        if self.config.enable_safety_check {
            let verdict = self.run_safety_checks(ctx).await;
            let blocked = (!verdict.is_safe).then(|| {
                verdict
                    .reason
                    .clone()
                    .unwrap_or_else(|| "request blocked by safety check".to_string())
            });
            ctx.safety = Some(verdict);
            if let Some(reason) = blocked {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    reason = %reason,
                    "Request blocked by safety check"
                );
                return Err(GatewayError::Blocked(reason));
            }
        }
        ctx.advance(Stage::SafetyChecked)?;

        let matched = self.router.match_route(
            &ctx.request.path,
            &ctx.request.method,
            ctx.client_ip.as_deref(),
        );
        let Some(route) = matched.route.filter(|_| matched.matched) else {
            return Err(GatewayError::RouteNotFound {
                method: ctx.request.method.clone(),
                path: ctx.request.path.clone(),
            });
        };
        let Some(instance) = matched.instance else {
            return Err(GatewayError::NoHealthyInstance(route.service_name));
        };
        ctx.path_params = matched.path_params;
        ctx.route = Some(route.clone());
        ctx.advance(Stage::Routed)?;

        if self.config.enable_rate_limit {
            if let Some(limit) = route.rate_limit {
                let client = ctx.client_ip.as_deref().unwrap_or(GLOBAL_RATE_LIMIT_KEY);
                let key = format!("route:{}:{client}", route.path_pattern);
                self.admit(ctx.request_id(), &key, limit)?;
            }
        }
        self.run_route_middleware(&route, ctx).await;

        let response = self.forward(ctx, &route, instance).await?;
        ctx.advance(Stage::Forwarded)?;

        let post_hooks: Vec<_> = self.post_hooks.read().clone();
        for hook in &post_hooks {
            hook.run(ctx, &response).await;
        }
        ctx.advance(Stage::PostHooked)?;

        Ok(response)
    }

    fn admit(&self, request_id: RequestId, key: &str, limit: u32) -> Result<()> {
        let admission = self.limiter.check(key, limit, RATE_LIMIT_WINDOW);
        if admission.allowed {
            return Ok(());
        }
        tracing::warn!(
            request_id = %request_id,
            key = %key,
            limit,
            reset_at = %admission.reset_at,
            "Rate limit exceeded"
        );
        Err(GatewayError::RateLimited)
    }

    async fn run_safety_checks(&self, ctx: &mut GatewayContext) -> SafetyVerdict {
        let checkers: Vec<_> = self.checkers.read().clone();
        let timeout = self.config.safety_check_timeout();

        for checker in &checkers {
            let evaluation = tokio::time::timeout(timeout, checker.check(&*ctx));
            let failure = match AssertUnwindSafe(evaluation).catch_unwind().await {
                Ok(Ok(Ok(verdict))) if verdict.is_safe => continue,
                Ok(Ok(Ok(verdict))) => return verdict.from_checker(checker.name()),
                Ok(Ok(Err(err))) => err,
                Ok(Err(_)) => SafetyError::Timeout(timeout),
                Err(panic) => SafetyError::Panicked {
                    checker: checker.name().to_string(),
                    message: panic_message(panic.as_ref()),
                },
            };

            if matches!(failure, SafetyError::Timeout(_)) {
                ctx.metadata
                    .insert(SAFETY_CHECK_TIMEOUT.to_string(), Value::Bool(true));
            } else {
                ctx.metadata.insert(
                    SAFETY_CHECK_ERROR.to_string(),
                    Value::String(failure.to_string()),
                );
            }
            tracing::warn!(
                request_id = %ctx.request_id(),
                checker = %checker.name(),
                error = %failure,
                policy = ?self.config.safety_failure_policy,
                "Safety checker failed"
            );

            if self.config.safety_failure_policy == SafetyFailurePolicy::FailClosed {
                return SafetyVerdict::unsafe_because(format!("safety check failed: {failure}"))
                    .from_checker(checker.name());
            }
        }

        SafetyVerdict::safe()
    }

    async fn run_route_middleware(&self, route: &RouteConfig, ctx: &mut GatewayContext) {
        if route.middleware.is_empty() {
            return;
        }
        let hooks: Vec<_> = {
            let registry = self.route_middleware.read();
            route
                .middleware
                .iter()
                .filter_map(|name| {
                    let hook = registry.get(name).cloned();
                    if hook.is_none() {
                        tracing::warn!(
                            middleware = %name,
                            pattern = %route.path_pattern,
                            "Unknown route middleware skipped"
                        );
                    }
                    hook
                })
                .collect()
        };
        for hook in &hooks {
            hook.run(ctx).await;
        }
    }

    async fn forward(
        &self,
        ctx: &GatewayContext,
        route: &RouteConfig,
        mut instance: ServiceInstance,
    ) -> Result<Response> {
        let balancer = self.router.balancer();
        let mut attempt = 0u32;

        loop {
            let _connection = balancer.acquire(&route.service_name, &instance.id);
            let call = self.forwarder.forward(&instance, &ctx.request, route);
            let error = match tokio::time::timeout(route.timeout(), call).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(ForwardError::Timeout(after))) => return Err(GatewayError::Timeout(after)),
                Ok(Err(ForwardError::InvalidRequest(reason))) => {
                    return Err(GatewayError::BadRequest(reason))
                }
                Err(_) => return Err(GatewayError::Timeout(route.timeout())),
                Ok(Err(err)) => err,
            };

            if !error.is_retryable() || attempt >= route.retry_count {
                return Err(GatewayError::Upstream(error.to_string()));
            }
            attempt += 1;
            tracing::warn!(
                request_id = %ctx.request_id(),
                instance = %instance.address(),
                attempt,
                retries = route.retry_count,
                error = %error,
                "Forward failed, retrying"
            );
            if let Some(next) = balancer.select(&route.service_name, ctx.client_ip.as_deref()) {
                instance = next;
            }
        }
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Add a route.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Traffic` if the route allows no methods.
    pub fn add_route(&self, route: RouteConfig) -> Result<()> {
        Ok(self.router.add_route(route)?)
    }

    /// Remove every route with the given pattern, returning how many were removed.
    pub fn remove_route(&self, path_pattern: &str) -> usize {
        self.router.remove_route(path_pattern)
    }

    /// Snapshot of the route table in match order.
    #[must_use]
    pub fn routes(&self) -> Vec<RouteConfig> {
        self.router.routes()
    }

    /// Append a safety checker; checkers run in registration order.
    pub fn add_safety_checker(&self, checker: Arc<dyn SafetyChecker>) {
        tracing::info!(checker = %checker.name(), "Added safety checker");
        self.checkers.write().push(checker);
    }

    /// Remove every safety checker with the given name.
    pub fn remove_safety_checker(&self, name: &str) -> bool {
        remove_named(&self.checkers, name, |c| c.name())
    }

    /// Append a pre-hook; pre-hooks run in registration order.
    pub fn add_pre_hook(&self, hook: Arc<dyn PreHook>) {
        tracing::info!(hook = %hook.name(), "Added pre-hook");
        self.pre_hooks.write().push(hook);
    }

    /// Remove every pre-hook with the given name.
    pub fn remove_pre_hook(&self, name: &str) -> bool {
        remove_named(&self.pre_hooks, name, |h| h.name())
    }

    /// Append a post-hook; post-hooks run in registration order.
    pub fn add_post_hook(&self, hook: Arc<dyn PostHook>) {
        tracing::info!(hook = %hook.name(), "Added post-hook");
        self.post_hooks.write().push(hook);
    }

    /// Remove every post-hook with the given name.
    pub fn remove_post_hook(&self, name: &str) -> bool {
        remove_named(&self.post_hooks, name, |h| h.name())
    }

    /// Register a hook that routes can name in their `middleware` list.
    /// Returns the hook previously registered under `name`.
    pub fn register_route_middleware(
        &self,
        name: impl Into<String>,
        hook: Arc<dyn PreHook>,
    ) -> Option<Arc<dyn PreHook>> {
        let name = name.into();
        tracing::info!(middleware = %name, "Registered route middleware");
        self.route_middleware.write().insert(name, hook)
    }

    /// Register a service instance.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Traffic` for a zero weight or a duplicate id.
    pub fn register_instance(&self, service: &str, instance: ServiceInstance) -> Result<()> {
        Ok(self.balancer().register(service, instance)?)
    }

    /// Unregister a service instance.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Traffic` if the service or instance is unknown.
    pub fn unregister_instance(&self, service: &str, instance_id: &str) -> Result<ServiceInstance> {
        Ok(self.balancer().unregister(service, instance_id)?)
    }

    /// Mark a service instance healthy.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Traffic` if the service or instance is unknown.
    pub fn mark_instance_healthy(&self, service: &str, instance_id: &str) -> Result<()> {
        Ok(self.balancer().mark_healthy(service, instance_id)?)
    }

    /// Mark a service instance unhealthy.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Traffic` if the service or instance is unknown.
    pub fn mark_instance_unhealthy(&self, service: &str, instance_id: &str) -> Result<()> {
        Ok(self.balancer().mark_unhealthy(service, instance_id)?)
    }

    /// Page through the audit log: skip the `offset` most recent entries and
    /// return up to `limit` entries before them, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Audit` if the store cannot be read.
    pub fn audit_logs(&self, limit: usize, offset: usize) -> Result<Vec<AuditLog>> {
        Ok(self.audit.list(limit, offset)?)
    }

    /// Statistics over the retained audit entries.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Audit` if the store cannot be read.
    pub fn statistics(&self) -> Result<GatewayStats> {
        Ok(self.audit.statistics()?)
    }
}

fn remove_named<T: ?Sized>(
    list: &RwLock<Vec<Arc<T>>>,
    name: &str,
    name_of: impl Fn(&T) -> &str,
) -> bool {
    let mut list = list.write();
    let before = list.len();
    list.retain(|item| name_of(&**item) != name);
    let removed = list.len() != before;
    if removed {
        tracing::info!(name = %name, "Removed gateway extension");
    }
    removed
}

fn log_failure(request_id: RequestId, err: &GatewayError) {
    match err {
        GatewayError::Protocol(_)
        | GatewayError::InvalidTransition { .. }
        | GatewayError::Internal(_) => {
            tracing::error!(request_id = %request_id, error = %err, "Request failed");
        }
        GatewayError::NoHealthyInstance(_)
        | GatewayError::Upstream(_)
        | GatewayError::Timeout(_) => {
            tracing::warn!(request_id = %request_id, error = %err, "Request failed");
        }
        _ => {
            tracing::debug!(request_id = %request_id, code = err.code(), "Request rejected");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Audit bookkeeping for one call.
///
/// Owns the call's context so the audit entry can be written whatever way the
/// pipeline ends. Dropping it unfinished means the `handle` future was
/// cancelled, which is recorded as status 499.
struct InFlight<'g> {
    store: &'g dyn AuditStore,
    config: &'g GatewayConfig,
    request_id: RequestId,
    client_ip: Option<String>,
    started_at: DateTime<Utc>,
    start: Instant,
    ctx: Option<GatewayContext>,
    finished: bool,
}

impl<'g> InFlight<'g> {
    fn new(
        store: &'g dyn AuditStore,
        config: &'g GatewayConfig,
        request_id: RequestId,
        client_ip: Option<&str>,
    ) -> Self {
        Self {
            store,
            config,
            request_id,
            client_ip: client_ip.map(str::to_string),
            started_at: Utc::now(),
            start: Instant::now(),
            ctx: None,
            finished: false,
        }
    }

    fn finish(&mut self, response: &Response) {
        self.finished = true;

        if self.config.enable_audit_log {
            let log = self.entry(response);
            if let Err(err) = self.store.append(log) {
                tracing::warn!(request_id = %self.request_id, error = %err, "Failed to append audit log");
            }
        }

        if let Some(ctx) = self.ctx.as_mut() {
            for stage in [Stage::Audited, Stage::Done] {
                if let Err(err) = ctx.advance(stage) {
                    tracing::warn!(request_id = %self.request_id, error = %err, "Stage bookkeeping failed");
                }
            }
        }
    }

    fn entry(&self, response: &Response) -> AuditLog {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        let builder = match &self.ctx {
            Some(ctx) => {
                let builder =
                    AuditLog::builder(self.request_id, &ctx.request.method, &ctx.request.path)
                        .user_id(ctx.user_id.clone())
                        .request_body(
                            self.config
                                .log_request_body
                                .then(|| ctx.request.body.clone()),
                        );
                match ctx.blocking_verdict() {
                    Some(verdict) => builder.blocked(verdict.reason.clone()),
                    None => builder,
                }
            }
            None => AuditLog::builder(self.request_id, UNPARSED_METHOD, ""),
        };

        builder
            .timestamp(self.started_at)
            .client_ip(self.client_ip.as_deref())
            .status_code(response.status_code)
            .latency_ms(latency_ms)
            .response_body(
                self.config
                    .log_response_body
                    .then(|| response.body.clone()),
            )
            .build()
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::warn!(request_id = %self.request_id, "Request cancelled before completion");
        let response = Response::error(
            self.request_id,
            CLIENT_CLOSED_REQUEST,
            "client closed request",
        );
        self.finish(&response);
    }
}
