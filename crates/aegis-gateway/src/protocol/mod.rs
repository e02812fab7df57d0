//! Protocol normalization.
//!
//! A [`ProtocolAdapter`] maps each [`Protocol`] tag to a [`Codec`] that
//! decodes the protocol's raw message shape into a canonical [`Request`] and
//! encodes a [`Response`] back into that shape.
//!
//! ```text
//!   RawMessage ──decode──▶ Request ──middleware chain──▶ Request
//!   Response   ──encode──▶ RawMessage
//! ```

mod direct;
mod rest;
mod rpc;
mod socket;

use std::collections::HashMap;
use std::sync::Arc;

use aegis_core::{Headers, Metadata, Protocol, Request, RequestId, Response};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

pub use direct::DirectCodec;
pub use rest::RestCodec;
pub use rpc::RpcCodec;
pub use socket::SocketCodec;

/// Metadata key holding the identifier a client supplied in its message.
pub const CLIENT_REQUEST_ID: &str = "client_request_id";

/// A protocol-specific message before decoding or after encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawMessage {
    /// A text frame, as carried by streaming sockets.
    Text(String),
    /// A structured document (REST, RPC and direct calls).
    Structured(Value),
}

impl RawMessage {
    /// The structured document, if this is one.
    #[must_use]
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// The text frame, if this is one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Structured(_) => None,
        }
    }
}

impl From<Value> for RawMessage {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

impl From<String> for RawMessage {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for RawMessage {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Converts between one protocol's raw shape and the canonical messages.
pub trait Codec: Send + Sync {
    /// The protocol tag this codec is registered under.
    fn protocol(&self) -> Protocol;

    /// Decode a raw message into a request carrying `id`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::MalformedMessage` if the raw message does not
    /// have this protocol's shape.
    fn decode(&self, id: RequestId, raw: RawMessage) -> Result<Request, ProtocolError>;

    /// Encode a response into this protocol's raw shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the response cannot be expressed in this protocol.
    fn encode(&self, response: &Response) -> Result<RawMessage, ProtocolError>;
}

/// Rewrites every decoded request before it enters the pipeline.
pub trait RequestMiddleware: Send + Sync {
    /// Rewrite the request in place. The request id must not change.
    fn apply(&self, request: &mut Request);
}

impl<F> RequestMiddleware for F
where
    F: Fn(&mut Request) + Send + Sync,
{
    fn apply(&self, request: &mut Request) {
        self(request);
    }
}

/// Codec registry plus the ordered request middleware chain.
pub struct ProtocolAdapter {
    codecs: RwLock<HashMap<Protocol, Arc<dyn Codec>>>,
    middleware: RwLock<Vec<Arc<dyn RequestMiddleware>>>,
}

impl ProtocolAdapter {
    /// Create an adapter with the four built-in codecs registered.
    #[must_use]
    pub fn new() -> Self {
        let adapter = Self::empty();
        adapter.register_codec(Arc::new(RestCodec));
        adapter.register_codec(Arc::new(RpcCodec));
        adapter.register_codec(Arc::new(SocketCodec));
        adapter.register_codec(Arc::new(DirectCodec));
        adapter
    }

    /// Create an adapter with no codecs.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            codecs: RwLock::new(HashMap::new()),
            middleware: RwLock::new(Vec::new()),
        }
    }

    /// Register a codec under its protocol tag, returning the codec it replaced.
    pub fn register_codec(&self, codec: Arc<dyn Codec>) -> Option<Arc<dyn Codec>> {
        let protocol = codec.protocol();
        tracing::debug!(protocol = %protocol, "Registered protocol codec");
        self.codecs.write().insert(protocol, codec)
    }

    /// Append request middleware to the chain.
    pub fn register_middleware(&self, middleware: impl RequestMiddleware + 'static) {
        self.middleware.write().push(Arc::new(middleware));
    }

    fn codec(&self, protocol: &Protocol) -> Result<Arc<dyn Codec>, ProtocolError> {
        self.codecs
            .read()
            .get(protocol)
            .cloned()
            .ok_or_else(|| ProtocolError::UnsupportedProtocol(protocol.clone()))
    }

    /// Decode a raw message under a fresh request id.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::UnsupportedProtocol` if no codec is
    /// registered, or the codec's decode error.
    pub fn parse(&self, protocol: &Protocol, raw: RawMessage) -> Result<Request, ProtocolError> {
        self.parse_with_id(protocol, raw, RequestId::generate())
    }

    /// Decode a raw message under an id the caller already assigned, then
    /// run the middleware chain in registration order.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::UnsupportedProtocol` if no codec is
    /// registered, the codec's decode error, or
    /// `ProtocolError::IdentityChanged` if middleware replaced the request.
    pub fn parse_with_id(
        &self,
        protocol: &Protocol,
        raw: RawMessage,
        id: RequestId,
    ) -> Result<Request, ProtocolError> {
        let mut request = self.codec(protocol)?.decode(id, raw)?;

        let chain: Vec<_> = self.middleware.read().clone();
        for middleware in chain {
            middleware.apply(&mut request);
            if request.id() != id {
                return Err(ProtocolError::IdentityChanged(id));
            }
        }
        Ok(request)
    }

    /// Encode a response into the protocol's raw shape.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::UnsupportedProtocol` if no codec is
    /// registered, or the codec's encode error.
    pub fn format(
        &self,
        protocol: &Protocol,
        response: &Response,
    ) -> Result<RawMessage, ProtocolError> {
        self.codec(protocol)?.encode(response)
    }

    /// Registered protocol tags, sorted by name.
    #[must_use]
    pub fn supported_protocols(&self) -> Vec<Protocol> {
        let mut protocols: Vec<Protocol> = self.codecs.read().keys().cloned().collect();
        protocols.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        protocols
    }
}

impl Default for ProtocolAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProtocolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolAdapter")
            .field("protocols", &self.supported_protocols())
            .field("middleware", &self.middleware.read().len())
            .finish()
    }
}

fn expect_object(protocol: Protocol, raw: RawMessage) -> Result<Map<String, Value>, ProtocolError> {
    match raw {
        RawMessage::Structured(Value::Object(map)) => Ok(map),
        RawMessage::Structured(other) => Err(ProtocolError::MalformedMessage {
            protocol,
            reason: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
        RawMessage::Text(_) => Err(ProtocolError::MalformedMessage {
            protocol,
            reason: "expected a structured message, got a text frame".to_string(),
        }),
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Flatten a JSON object into string headers. Non-string values keep their
/// JSON text.
fn headers_from(value: Option<&Value>) -> Headers {
    let Some(Value::Object(map)) = value else {
        return Headers::new();
    };
    map.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

fn metadata_from(value: Option<Value>) -> Metadata {
    match value {
        Some(Value::Object(map)) => map.into_iter().collect(),
        _ => Metadata::new(),
    }
}

fn remember_client_id(metadata: &mut Metadata, client_id: Option<String>) {
    if let Some(client_id) = client_id.filter(|id| !id.is_empty()) {
        metadata.insert(CLIENT_REQUEST_ID.to_string(), Value::String(client_id));
    }
}
