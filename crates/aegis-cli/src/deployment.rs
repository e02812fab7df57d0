//! Deployment files.
//!
//! A deployment is a JSON document describing one gateway:
//!
//! ```json
//! {
//!   "gateway": { "rate_limit_per_second": 50 },
//!   "strategy": "least_connections",
//!   "routes": [{ "path_pattern": "/v1/chat", "service_name": "chat" }],
//!   "instances": [{ "service": "chat", "instance": { "id": "c1", "host": "10.0.0.5", "port": 8000 } }],
//!   "deny_terms": ["ignore previous instructions"]
//! }
//! ```
//!
//! Every section is optional.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use aegis_audit::MemoryAuditStore;
use aegis_gateway::{Forwarder, Gateway, GatewayConfig, HeaderUserId, KeywordChecker};
use aegis_traffic::{LoadBalanceStrategy, LoadBalancer, RouteConfig, ServiceInstance};
use anyhow::{bail, Context};
use serde::Deserialize;

/// Parsed deployment file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub strategy: LoadBalanceStrategy,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub instances: Vec<InstanceEntry>,
    #[serde(default)]
    pub deny_terms: Vec<String>,
}

/// An instance and the service it belongs to.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceEntry {
    pub service: String,
    pub instance: ServiceInstance,
}

impl Deployment {
    /// Read and parse a deployment file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read deployment {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid deployment {}", path.display()))
    }

    /// Parse a deployment document.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check the deployment for problems that would stop the gateway from
    /// being built. Routes naming services without instances are reported
    /// as warnings, since instances may be registered later.
    pub fn validate(&self) -> anyhow::Result<Vec<String>> {
        self.gateway.validate()?;

        for route in &self.routes {
            if route.methods.is_empty() {
                bail!("route {} allows no methods", route.path_pattern);
            }
        }
        for entry in &self.instances {
            if entry.instance.weight == 0 {
                bail!(
                    "instance {} of service {} has weight 0",
                    entry.instance.id,
                    entry.service
                );
            }
        }

        let services = self.services();
        let warnings = self
            .routes
            .iter()
            .filter(|route| !services.contains_key(route.service_name.as_str()))
            .map(|route| {
                format!(
                    "route {} targets service {} which has no instances",
                    route.path_pattern, route.service_name
                )
            })
            .collect();
        Ok(warnings)
    }

    /// Instance count per service.
    pub fn services(&self) -> BTreeMap<&str, usize> {
        let mut services = BTreeMap::new();
        for entry in &self.instances {
            *services.entry(entry.service.as_str()).or_insert(0) += 1;
        }
        services
    }

    /// Build a gateway from the deployment with the given forwarder.
    pub fn build<F: Forwarder>(&self, forwarder: F) -> anyhow::Result<Gateway<MemoryAuditStore, F>> {
        self.gateway.validate()?;
        let audit = MemoryAuditStore::with_capacity(self.gateway.audit_capacity)?;
        let gateway = Gateway::new(
            self.gateway.clone(),
            Arc::new(LoadBalancer::new(self.strategy)),
            Arc::new(audit),
            Arc::new(forwarder),
        );

        for entry in &self.instances {
            gateway
                .register_instance(&entry.service, entry.instance.clone())
                .with_context(|| {
                    format!("failed to register instance {}", entry.instance.id)
                })?;
        }
        for route in &self.routes {
            gateway
                .add_route(route.clone())
                .with_context(|| format!("failed to add route {}", route.path_pattern))?;
        }

        gateway.add_pre_hook(Arc::new(HeaderUserId::default()));
        if !self.deny_terms.is_empty() {
            gateway.add_safety_checker(Arc::new(KeywordChecker::new(&self.deny_terms)));
        }

        Ok(gateway)
    }
}
