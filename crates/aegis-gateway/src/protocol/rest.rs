//! REST-style codec.
//!
//! Raw shape: `{method, path, headers, body, metadata, request_id}`.
//! Encoded shape: `{status_code, headers, body}` with the body serialized to
//! a JSON string.

use aegis_core::{Protocol, Request, RequestId, Response};
use serde_json::{json, Value};

use super::{
    expect_object, headers_from, metadata_from, remember_client_id, string_field, Codec,
    RawMessage,
};
use crate::error::ProtocolError;

/// Codec for [`Protocol::Rest`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RestCodec;

impl Codec for RestCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Rest
    }

    fn decode(&self, id: RequestId, raw: RawMessage) -> Result<Request, ProtocolError> {
        let mut map = expect_object(Protocol::Rest, raw)?;

        let method = string_field(&map, "method").unwrap_or_else(|| "GET".to_string());
        let path = string_field(&map, "path").unwrap_or_else(|| "/".to_string());
        let headers = headers_from(map.get("headers"));
        let client_id = string_field(&map, "request_id");
        let body = map.remove("body").unwrap_or(Value::Null);
        let mut metadata = metadata_from(map.remove("metadata"));
        remember_client_id(&mut metadata, client_id);

        Ok(Request::new(id, Protocol::Rest, method, path)
            .with_headers(headers)
            .with_body(body)
            .with_metadata(metadata))
    }

    fn encode(&self, response: &Response) -> Result<RawMessage, ProtocolError> {
        let mut headers = serde_json::Map::new();
        headers.insert(
            "Content-Type".to_string(),
            Value::String("application/json".to_string()),
        );
        for (name, value) in &response.headers {
            headers.insert(name.clone(), Value::String(value.clone()));
        }

        let body = if response.body.is_null() {
            String::new()
        } else {
            serde_json::to_string(&response.body)?
        };

        Ok(RawMessage::Structured(json!({
            "status_code": response.status_code,
            "headers": headers,
            "body": body,
        })))
    }
}
