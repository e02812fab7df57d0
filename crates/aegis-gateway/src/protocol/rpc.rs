//! RPC-style codec.
//!
//! The service name travels as the request path and the call metadata as
//! headers. The whole raw message is kept as the body so upstreams see the
//! original call unchanged.

use aegis_core::{Protocol, Request, RequestId, Response};
use serde_json::{json, Value};

use super::{expect_object, headers_from, remember_client_id, string_field, Codec, RawMessage};
use crate::error::ProtocolError;

/// Codec for [`Protocol::Rpc`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcCodec;

impl Codec for RpcCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Rpc
    }

    fn decode(&self, id: RequestId, raw: RawMessage) -> Result<Request, ProtocolError> {
        let map = expect_object(Protocol::Rpc, raw)?;

        let method = string_field(&map, "method").unwrap_or_default();
        let service = string_field(&map, "service").unwrap_or_default();
        let headers = headers_from(map.get("metadata"));
        let mut request = Request::new(id, Protocol::Rpc, method, service).with_headers(headers);
        remember_client_id(&mut request.metadata, string_field(&map, "request_id"));

        Ok(request.with_body(Value::Object(map)))
    }

    fn encode(&self, response: &Response) -> Result<RawMessage, ProtocolError> {
        Ok(RawMessage::Structured(json!({
            "status": response.status_code,
            "message": response.body,
            "error": response.error,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_keeps_whole_message_as_body() {
        let raw = json!({
            "service": "inference.Chat",
            "method": "Complete",
            "metadata": {"deadline": "5s"},
            "payload": {"prompt": "hi"}
        });

        let request = RpcCodec
            .decode(RequestId::generate(), RawMessage::Structured(raw.clone()))
            .unwrap();
        assert_eq!(request.method, "Complete");
        assert_eq!(request.path, "inference.Chat");
        assert_eq!(request.headers["deadline"], "5s");
        assert_eq!(request.body, raw);
        assert!(request.metadata.is_empty());
    }

    #[test]
    fn decode_rejects_non_objects() {
        let err = RpcCodec
            .decode(RequestId::generate(), RawMessage::Structured(json!([1, 2])))
            .unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn encode_status_message_error() {
        let id = RequestId::generate();
        let raw = RpcCodec
            .encode(&Response::error(id, 503, "no healthy instance"))
            .unwrap();
        let value = raw.as_value().unwrap();
        assert_eq!(value["status"], 503);
        assert_eq!(value["message"]["error"], "no healthy instance");
        assert_eq!(value["error"], "no healthy instance");
    }
}
