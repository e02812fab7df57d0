//! Canonical request and response messages.
//!
//! Every wire shape accepted by the gateway (REST, RPC, socket frames and
//! in-process calls) is normalized into a [`Request`], and every outcome is
//! expressed as exactly one [`Response`] carrying the same [`RequestId`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::ids::RequestId;

/// Header map carried by requests and responses.
pub type Headers = HashMap<String, String>;

/// Free-form metadata attached to a request.
pub type Metadata = HashMap<String, Value>;

/// Wire protocol a message arrived on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Protocol {
    /// REST-style call: method, path, headers and a JSON body.
    Rest,
    /// RPC-style call: the service name is carried as the path.
    Rpc,
    /// Streaming socket text frame.
    Socket,
    /// Direct in-process function call.
    Direct,
    /// A protocol registered by an embedding application.
    Custom(String),
}

impl Protocol {
    /// Return the protocol tag as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Rest => "rest",
            Self::Rpc => "rpc",
            Self::Socket => "socket",
            Self::Direct => "direct",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Err(CoreError::UnknownProtocol(s.to_string())),
            "rest" | "http" => Ok(Self::Rest),
            "rpc" | "grpc" => Ok(Self::Rpc),
            "socket" | "websocket" => Ok(Self::Socket),
            "direct" | "sdk" => Ok(Self::Direct),
            other => Ok(Self::Custom(other.to_string())),
        }
    }
}

impl TryFrom<String> for Protocol {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Protocol> for String {
    fn from(protocol: Protocol) -> Self {
        protocol.as_str().to_string()
    }
}

/// Canonical request shape produced by every protocol codec.
///
/// The identifier is fixed at construction time; there is deliberately no
/// setter, so middleware and hooks can rewrite everything except `id`.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    id: RequestId,
    /// Protocol the request arrived on.
    pub protocol: Protocol,
    /// Method (HTTP verb, RPC method or function name).
    pub method: String,
    /// Path (URL path, RPC service or module name).
    pub path: String,
    /// Request headers.
    pub headers: Headers,
    /// Opaque payload.
    pub body: Value,
    /// Free-form metadata.
    pub metadata: Metadata,
}

impl Request {
    /// Create a request with empty headers, body and metadata.
    #[must_use]
    pub fn new(
        id: RequestId,
        protocol: Protocol,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id,
            protocol,
            method: method.into(),
            path: path.into(),
            headers: Headers::new(),
            body: Value::Null,
            metadata: Metadata::new(),
        }
    }

    /// Return the request identifier.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Replace the headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Replace the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Canonical response shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Identifier of the originating request.
    pub request_id: RequestId,
    /// Numeric status code (HTTP semantics).
    pub status_code: u16,
    /// Response headers.
    #[serde(default)]
    pub headers: Headers,
    /// Response payload.
    #[serde(default)]
    pub body: Value,
    /// Error description for failed calls.
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    /// Create an empty response with the given status.
    #[must_use]
    pub fn new(request_id: RequestId, status_code: u16) -> Self {
        Self {
            request_id,
            status_code,
            headers: Headers::new(),
            body: Value::Null,
            error: None,
        }
    }

    /// Create a `200 OK` response carrying `body`.
    #[must_use]
    pub fn ok(request_id: RequestId, body: Value) -> Self {
        Self {
            body,
            ..Self::new(request_id, 200)
        }
    }

    /// Create an error response. The message is mirrored into the body as
    /// `{"error": message}`.
    #[must_use]
    pub fn error(request_id: RequestId, status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            body: serde_json::json!({ "error": message }),
            error: Some(message),
            ..Self::new(request_id, status_code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parse_aliases() {
        assert_eq!("REST".parse::<Protocol>().unwrap(), Protocol::Rest);
        assert_eq!("grpc".parse::<Protocol>().unwrap(), Protocol::Rpc);
        assert_eq!("websocket".parse::<Protocol>().unwrap(), Protocol::Socket);
        assert_eq!("sdk".parse::<Protocol>().unwrap(), Protocol::Direct);
        assert_eq!(
            "mqtt".parse::<Protocol>().unwrap(),
            Protocol::Custom("mqtt".to_string())
        );
        assert!(matches!(
            "  ".parse::<Protocol>(),
            Err(CoreError::UnknownProtocol(_))
        ));
    }

    #[test]
    fn protocol_serde_json() {
        let json = serde_json::to_string(&Protocol::Socket).unwrap();
        assert_eq!(json, "\"socket\"");
        let parsed: Protocol = serde_json::from_str("\"direct\"").unwrap();
        assert_eq!(parsed, Protocol::Direct);
    }

    #[test]
    fn request_keeps_identifier() {
        let id = RequestId::generate();
        let request = Request::new(id, Protocol::Rest, "POST", "/chat")
            .with_body(serde_json::json!({"message": "hello"}));
        assert_eq!(request.id(), id);
        assert_eq!(request.body["message"], "hello");
    }

    #[test]
    fn error_response_mirrors_message() {
        let id = RequestId::generate();
        let response = Response::error(id, 404, "route not found");
        assert_eq!(response.status_code, 404);
        assert_eq!(response.error.as_deref(), Some("route not found"));
        assert_eq!(response.body["error"], "route not found");
        assert_eq!(Response::ok(id, Value::Null).status_code, 200);
    }
}
