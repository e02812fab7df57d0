//! Unified request gateway.
//!
//! This crate accepts calls in several wire shapes, normalizes them into one
//! canonical [`Request`](aegis_core::Request), and runs each through a fixed
//! pipeline:
//!
//! - admission control per client (and optionally per route)
//! - pre-hooks and pluggable safety checkers with per-checker timeouts
//! - routing and load-balanced instance selection
//! - forwarding with retries and timeouts
//! - post-hooks and an audit entry for every outcome
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Callers (REST / RPC / socket / direct)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ RawMessage
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Gateway                             │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌────────────────┐  │
//! │  │ Protocol │ │   Rate   │ │  Hooks + │ │ Router + Load  │  │
//! │  │ Adapter  │ │ Limiter  │ │ Checkers │ │   Balancer     │  │
//! │  └──────────┘ └──────────┘ └──────────┘ └────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                │                                  │
//!                ▼                                  ▼
//!        ┌──────────────┐                   ┌──────────────┐
//!        │  AuditStore  │                   │  Forwarder   │
//!        └──────────────┘                   └──────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use aegis_core::Protocol;
//! use aegis_gateway::{Gateway, GatewayConfig, KeywordChecker, RawMessage};
//! use aegis_traffic::{RouteConfig, ServiceInstance};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Gateway::with_defaults(GatewayConfig::default())?;
//! gateway.register_instance("chat", ServiceInstance::new("c1", "10.0.0.5", 8000))?;
//! gateway.add_route(RouteConfig::new("/v1/chat", "chat"))?;
//! gateway.add_safety_checker(Arc::new(KeywordChecker::new(["drop table"])));
//!
//! let raw = RawMessage::Structured(json!({"method": "POST", "path": "/v1/chat"}));
//! let response = gateway.handle(&Protocol::Rest, raw, Some("198.51.100.4")).await;
//! assert_eq!(response.status_code, 200);
//! assert_eq!(gateway.statistics()?.total_requests, 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod error;
pub mod forward;
pub mod hooks;
pub mod protocol;
pub mod safety;
pub mod service;
pub mod stage;

pub use config::{GatewayConfig, GatewayMode, SafetyFailurePolicy};
pub use context::GatewayContext;
pub use error::{ForwardError, GatewayError, ProtocolError, Result, SafetyError};
pub use forward::{Forwarder, HttpForwarder, NoopForwarder};
pub use hooks::{HeaderUserId, PostHook, PreHook};
pub use protocol::{Codec, ProtocolAdapter, RawMessage, RequestMiddleware};
pub use safety::{KeywordChecker, SafetyChecker, SafetyVerdict};
pub use service::Gateway;
pub use stage::Stage;
