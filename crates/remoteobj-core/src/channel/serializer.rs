//! Encoding of requests and responses.
//!
//! The listener asks the serializer to *try* to encode each reply: a result
//! holding an in-process value (see [`Value::Opaque`](crate::Value::Opaque))
//! fails here, and the listener's [`SerializationPolicy`](crate::SerializationPolicy)
//! decides what happens next.

use super::protocol::{Request, Response};
use crate::error::{ProxyError, Result};

/// Converts protocol messages to and from bytes.
pub trait Serializer: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn try_serialize_request(&self, request: &Request) -> Result<Vec<u8>>;

    fn deserialize_request(&self, bytes: &[u8]) -> Result<Request>;

    fn try_serialize_response(&self, response: &Response) -> Result<Vec<u8>>;

    fn deserialize_response(&self, bytes: &[u8]) -> Result<Response>;
}

/// JSON encoding, the format the loopback bridge speaks.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

fn encode_error(what: &str, err: serde_json::Error) -> ProxyError {
    ProxyError::Serialization {
        message: format!("cannot encode {}: {}", what, err),
    }
}

fn decode_error(what: &str, err: serde_json::Error) -> ProxyError {
    ProxyError::Json {
        message: format!("Failed to parse {}: {}", what, err),
        source: Some(err),
    }
}

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn try_serialize_request(&self, request: &Request) -> Result<Vec<u8>> {
        serde_json::to_vec(request).map_err(|e| encode_error("request", e))
    }

    fn deserialize_request(&self, bytes: &[u8]) -> Result<Request> {
        serde_json::from_slice(bytes).map_err(|e| decode_error("request", e))
    }

    fn try_serialize_response(&self, response: &Response) -> Result<Vec<u8>> {
        serde_json::to_vec(response).map_err(|e| encode_error("response", e))
    }

    fn deserialize_response(&self, bytes: &[u8]) -> Result<Response> {
        serde_json::from_slice(bytes).map_err(|e| decode_error("response", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::protocol::Reply;
    use crate::value::{Opaque, Value};
    use crate::view::Op;

    #[test]
    fn test_opaque_result_fails_to_serialize() {
        let response = Response::new(
            1,
            Reply::Value {
                value: Value::Opaque(Opaque::new("Lock", ())),
            },
        );
        let err = JsonSerializer.try_serialize_response(&response).unwrap_err();
        match err {
            ProxyError::Serialization { message } => {
                assert!(message.contains("'Lock' object cannot cross a process boundary"))
            }
            other => panic!("expected serialization error, got {:?}", other),
        }
    }

    #[test]
    fn test_opaque_argument_fails_to_serialize() {
        let request = Request::resolve(vec![Op::Contains {
            item: Value::Opaque(Opaque::new("socket", ())),
        }]);
        assert!(matches!(
            JsonSerializer.try_serialize_request(&request),
            Err(ProxyError::Serialization { .. })
        ));
    }

    #[test]
    fn test_garbage_is_a_json_error() {
        let err = JsonSerializer.deserialize_request(b"not valid json").unwrap_err();
        assert!(matches!(err, ProxyError::Json { .. }));
    }

    #[test]
    fn test_request_roundtrip() {
        let request = Request::resolve(vec![Op::GetAttr {
            name: "items".into(),
        }]);
        let bytes = JsonSerializer.try_serialize_request(&request).unwrap();
        assert_eq!(JsonSerializer.deserialize_request(&bytes).unwrap(), request);
    }
}
