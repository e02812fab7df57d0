//! Direct in-process call codec.
//!
//! Raw shape: `{call_id, function, module, args, kwargs}`. Encoding returns
//! the response body itself, or fails with the response's error.

use aegis_core::{Protocol, Request, RequestId, Response};
use serde_json::Value;

use super::{expect_object, metadata_from, remember_client_id, string_field, Codec, RawMessage};
use crate::error::ProtocolError;

/// Codec for [`Protocol::Direct`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectCodec;

impl Codec for DirectCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Direct
    }

    fn decode(&self, id: RequestId, raw: RawMessage) -> Result<Request, ProtocolError> {
        let mut map = expect_object(Protocol::Direct, raw)?;

        let function = string_field(&map, "function").unwrap_or_default();
        let module = string_field(&map, "module").unwrap_or_default();
        let call_id = string_field(&map, "call_id");
        let args = map
            .remove("args")
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let mut metadata = metadata_from(map.remove("kwargs"));
        remember_client_id(&mut metadata, call_id);

        Ok(Request::new(id, Protocol::Direct, function, module)
            .with_body(args)
            .with_metadata(metadata))
    }

    fn encode(&self, response: &Response) -> Result<RawMessage, ProtocolError> {
        if let Some(error) = &response.error {
            return Err(ProtocolError::CallFailed(error.clone()));
        }
        Ok(RawMessage::Structured(response.body.clone()))
    }
}
