//! Core types and utilities for the aegis gateway.
//!
//! This crate provides the foundational types shared by every aegis crate:
//!
//! - **Identifiers**: the strongly-typed [`RequestId`] assigned to every call
//! - **Messages**: the canonical [`Request`] and [`Response`] that every wire
//!   protocol is normalized into, tagged with a [`Protocol`]
//! - **Error types**: common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use aegis_core::{Protocol, Request, RequestId, Response};
//!
//! let request = Request::new(RequestId::generate(), Protocol::Rest, "GET", "/api/v1/users");
//! let response = Response::ok(request.id(), serde_json::json!({"users": []}));
//!
//! assert_eq!(response.request_id, request.id());
//! assert_eq!(response.status_code, 200);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod message;

pub use error::{CoreError, Result};
pub use ids::{IdError, RequestId};
pub use message::{Headers, Metadata, Protocol, Request, Response};
