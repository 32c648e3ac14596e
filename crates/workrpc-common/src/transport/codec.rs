use crate::protocol::error::Result;
use crate::protocol::{Request, Response};

/// JSON codec for encoding/decoding workrpc envelopes
///
/// Transports move envelopes as UTF-8 strings, so the codec works on `String`
/// and `&str` rather than byte buffers. The process backend frames these
/// strings (see [`frame`](super::frame)); the thread and browser-worker
/// backends hand them over as-is.
///
/// # Example
///
/// ```
/// use workrpc_common::transport::JsonCodec;
/// use workrpc_common::protocol::{Request, Response};
/// use serde_json::json;
///
/// let request = Request::new(1, "echo", json!({"msg": "hi"}));
/// let encoded = JsonCodec::encode_request(&request).unwrap();
/// assert_eq!(JsonCodec::decode_request(&encoded).unwrap(), request);
///
/// let response = Response::success(1, json!({"echoed": "Echo: hi"}));
/// let encoded = JsonCodec::encode_response(&response).unwrap();
/// assert_eq!(JsonCodec::decode_response(&encoded).unwrap(), response);
/// ```
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a request envelope
    pub fn encode_request(request: &Request) -> Result<String> {
        Ok(serde_json::to_string(request)?)
    }

    /// Decode a request envelope
    ///
    /// # Errors
    ///
    /// Returns `JsonSerialization` if the input is not JSON or lacks `id` or
    /// `methodName`.
    pub fn decode_request(data: &str) -> Result<Request> {
        Ok(serde_json::from_str(data)?)
    }

    /// Encode a response envelope
    pub fn encode_response(response: &Response) -> Result<String> {
        Ok(serde_json::to_string(response)?)
    }

    /// Decode a response envelope
    ///
    /// # Errors
    ///
    /// Returns `JsonSerialization` if the input is not JSON, lacks `id`, or
    /// carries both or neither of `data` and `error`.
    pub fn decode_response(data: &str) -> Result<Response> {
        Ok(serde_json::from_str(data)?)
    }
}
