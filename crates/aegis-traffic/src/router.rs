//! Priority-ordered route table with path-template matching.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::balancer::LoadBalancer;
use crate::error::{Result, TrafficError};
use crate::types::{RouteConfig, RouteMatch};

/// Route table bound to a load balancer.
///
/// Routes are kept sorted by descending priority; routes of equal priority
/// keep their insertion order.
#[derive(Debug)]
pub struct Router {
    routes: RwLock<Vec<RouteConfig>>,
    balancer: Arc<LoadBalancer>,
}

impl Router {
    /// Create an empty route table.
    #[must_use]
    pub fn new(balancer: Arc<LoadBalancer>) -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
            balancer,
        }
    }

    /// The load balancer used to pick instances for matched routes.
    #[must_use]
    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    /// Add a route.
    ///
    /// # Errors
    ///
    /// Returns `TrafficError::EmptyMethods` if the route allows no methods.
    pub fn add_route(&self, route: RouteConfig) -> Result<()> {
        if route.methods.is_empty() {
            return Err(TrafficError::EmptyMethods(route.path_pattern));
        }

        tracing::info!(
            pattern = %route.path_pattern,
            service = %route.service_name,
            priority = route.priority,
            "Added route"
        );

        let mut routes = self.routes.write();
        routes.push(route);
        // stable: equal priorities stay in insertion order
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    /// Remove every route with the given pattern, returning how many were removed.
    pub fn remove_route(&self, path_pattern: &str) -> usize {
        let mut routes = self.routes.write();
        let before = routes.len();
        routes.retain(|r| r.path_pattern != path_pattern);
        let removed = before - routes.len();
        if removed > 0 {
            tracing::info!(pattern = %path_pattern, removed, "Removed route");
        }
        removed
    }

    /// Snapshot of the route table in match order.
    #[must_use]
    pub fn routes(&self) -> Vec<RouteConfig> {
        self.routes.read().clone()
    }

    /// Find the first route matching `path` and `method`, then select an
    /// instance of its service.
    ///
    /// A matched route whose service has no healthy instance yields
    /// `matched: true` with `instance: None`.
    #[must_use]
    pub fn match_route(&self, path: &str, method: &str, client: Option<&str>) -> RouteMatch {
        let found = {
            let routes = self.routes.read();
            routes.iter().find_map(|route| {
                if !route.allows(method) {
                    return None;
                }
                match_path(&route.path_pattern, path).map(|params| (route.clone(), params))
            })
        };

        let Some((route, path_params)) = found else {
            tracing::debug!(path = %path, method = %method, "No route matched");
            return RouteMatch::no_match();
        };

        let instance = self.balancer.select(&route.service_name, client);
        if instance.is_none() {
            tracing::warn!(
                service = %route.service_name,
                pattern = %route.path_pattern,
                "Route matched but no healthy instance available"
            );
        }

        RouteMatch {
            matched: true,
            route: Some(route),
            path_params,
            instance,
        }
    }
}

/// Match a path against a template.
///
/// Leading and trailing slashes are ignored and both sides must have the
/// same number of segments. `{name}` captures a segment, `*` matches any
/// single segment, anything else must match literally.
///
/// ```
/// use aegis_traffic::match_path;
///
/// let params = match_path("/api/{version}/users/{id}", "/api/v1/users/123").unwrap();
/// assert_eq!(params["version"], "v1");
/// assert_eq!(params["id"], "123");
///
/// assert!(match_path("/api/*/health", "/api/anything/health").unwrap().is_empty());
/// assert!(match_path("/api/users", "/api/users/123").is_none());
/// ```
#[must_use]
pub fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_segments: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    if pattern_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (expected, actual) in pattern_segments.iter().zip(&path_segments) {
        if let Some(name) = expected
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
        {
            params.insert(name.to_string(), (*actual).to_string());
        } else if *expected != "*" && expected != actual {
            return None;
        }
    }
    Some(params)
}
