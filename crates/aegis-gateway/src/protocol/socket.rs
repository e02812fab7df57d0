//! Streaming socket frame codec.
//!
//! Frames are JSON text envelopes `{id, type, payload, metadata}`. A frame
//! that is not a JSON object is still accepted: the whole frame becomes the
//! body of a `message` request.

use aegis_core::{Metadata, Protocol, Request, RequestId, Response};
use serde_json::{json, Value};

use super::{metadata_from, remember_client_id, string_field, Codec, RawMessage};
use crate::error::ProtocolError;

/// Method of every socket request.
pub const SOCKET_METHOD: &str = "MESSAGE";

/// Codec for [`Protocol::Socket`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketCodec;

impl Codec for SocketCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Socket
    }

    fn decode(&self, id: RequestId, raw: RawMessage) -> Result<Request, ProtocolError> {
        let RawMessage::Text(frame) = raw else {
            return Err(ProtocolError::MalformedMessage {
                protocol: Protocol::Socket,
                reason: "expected a text frame".to_string(),
            });
        };

        let Ok(Value::Object(mut envelope)) = serde_json::from_str::<Value>(&frame) else {
            return Ok(Request::new(id, Protocol::Socket, SOCKET_METHOD, "message")
                .with_body(Value::String(frame)));
        };

        let path = string_field(&envelope, "type").unwrap_or_else(|| "message".to_string());
        let client_id = string_field(&envelope, "id");
        let mut metadata: Metadata = metadata_from(envelope.get("metadata").cloned());
        remember_client_id(&mut metadata, client_id);
        let body = match envelope.remove("payload") {
            Some(payload) => payload,
            None => Value::Object(envelope),
        };

        Ok(Request::new(id, Protocol::Socket, SOCKET_METHOD, path)
            .with_body(body)
            .with_metadata(metadata))
    }

    fn encode(&self, response: &Response) -> Result<RawMessage, ProtocolError> {
        let envelope = json!({
            "id": response.request_id,
            "type": "response",
            "payload": response.body,
            "error": response.error,
        });
        Ok(RawMessage::Text(serde_json::to_string(&envelope)?))
    }
}
