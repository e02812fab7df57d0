//! Routing, load balancing and admission control for the aegis gateway.
//!
//! This crate provides the three traffic-shaping components the gateway
//! pipeline is built from:
//!
//! - [`Router`]: priority-ordered path-template matching
//! - [`LoadBalancer`]: per-service instance pools with five selection strategies
//! - [`RateLimiter`]: per-key token-bucket admission control
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Gateway pipeline                         │
//! └─────────────────────────────────────────────────────────────────┘
//!            │ check(key)                      │ match_route(path, method, client)
//!            ▼                                 ▼
//!     ┌─────────────┐                 ┌─────────────────┐
//!     │ RateLimiter │                 │     Router      │
//!     │ (buckets)   │                 │ (RouteConfig[]) │
//!     └─────────────┘                 └────────┬────────┘
//!                                              │ select(service, client)
//!                                              ▼
//!                                     ┌─────────────────┐
//!                                     │  LoadBalancer   │
//!                                     │ (ServicePools)  │
//!                                     └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use aegis_traffic::{LoadBalanceStrategy, LoadBalancer, RouteConfig, Router, ServiceInstance};
//!
//! let balancer = Arc::new(LoadBalancer::new(LoadBalanceStrategy::RoundRobin));
//! balancer.register("users", ServiceInstance::new("u1", "10.0.0.1", 8080)).unwrap();
//!
//! let router = Router::new(Arc::clone(&balancer));
//! router.add_route(RouteConfig::new("/api/{version}/users/{id}", "users")).unwrap();
//!
//! let matched = router.match_route("/api/v1/users/42", "GET", None);
//! assert!(matched.matched);
//! assert_eq!(matched.path_params["id"], "42");
//! assert_eq!(matched.instance.unwrap().address(), "10.0.0.1:8080");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod balancer;
pub mod error;
pub mod rate_limit;
pub mod router;
pub mod types;

pub use balancer::{ConnectionGuard, LoadBalancer};
pub use error::{Result, TrafficError};
pub use rate_limit::RateLimiter;
pub use router::{match_path, Router};
pub use types::{LoadBalanceStrategy, RateLimitResult, RouteConfig, RouteMatch, ServiceInstance};
