//! workrpc Response Types
//!
//! This module defines the response envelope a worker sends back for every
//! request it managed to decode.

use serde::{Deserialize, Deserializer, Serialize};

use super::RequestId;

/// RPC method result (JSON value)
pub type RpcResult = serde_json::Value;

/// Outcome carried by a [`Response`]: exactly one of `data` or `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The method's return value
    Data(RpcResult),
    /// The method's failure, reduced to its message
    Error(String),
}

/// An RPC response returned from a worker to its parent.
///
/// # Wire Format
///
/// ```text
/// {"id": 7, "data": {...}}      success
/// {"id": 7, "error": "boom"}    failure
/// ```
///
/// Exactly one of `data` and `error` is present. Envelopes carrying both or
/// neither fail to decode. `"data": null` is a valid success payload and is
/// distinct from a missing `data` key.
///
/// # Example
///
/// ```
/// use workrpc_common::protocol::{Outcome, Response};
/// use serde_json::json;
///
/// let ok = Response::success(3, json!({"proof": "0xabc"}));
/// assert!(ok.is_success());
///
/// let failed = Response::error(3, "constraint not satisfied");
/// assert_eq!(failed.outcome, Outcome::Error("constraint not satisfied".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireResponse", into = "WireResponse")]
pub struct Response {
    /// Request identifier this response corresponds to
    pub id: RequestId,
    /// Success value or error message
    pub outcome: Outcome,
}

impl Response {
    /// Creates a successful response.
    ///
    /// # Arguments
    ///
    /// * `id` - The request identifier (must match the request's ID)
    /// * `data` - The result value (any JSON-serializable data)
    pub fn success(id: RequestId, data: RpcResult) -> Self {
        Response {
            id,
            outcome: Outcome::Data(data),
        }
    }

    /// Creates an error response.
    ///
    /// # Arguments
    ///
    /// * `id` - The request identifier (must match the request's ID)
    /// * `error` - The error message (describing what went wrong)
    pub fn error(id: RequestId, error: impl Into<String>) -> Self {
        Response {
            id,
            outcome: Outcome::Error(error.into()),
        }
    }

    /// Whether this response carries a result rather than an error.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Data(_))
    }
}

/// Field-level mirror of the wire format, validated into a [`Response`].
#[derive(Serialize, Deserialize)]
struct WireResponse {
    id: RequestId,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    data: Option<RpcResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Maps a present key to `Some`, so `"data": null` survives as `Some(Null)`.
fn present<'de, D>(deserializer: D) -> Result<Option<RpcResult>, D::Error>
where
    D: Deserializer<'de>,
{
    RpcResult::deserialize(deserializer).map(Some)
}

impl TryFrom<WireResponse> for Response {
    type Error = String;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        let outcome = match (wire.data, wire.error) {
            (Some(data), None) => Outcome::Data(data),
            (None, Some(error)) => Outcome::Error(error),
            (Some(_), Some(_)) => {
                return Err(format!(
                    "response {} carries both data and error",
                    wire.id
                ))
            }
            (None, None) => {
                return Err(format!(
                    "response {} carries neither data nor error",
                    wire.id
                ))
            }
        };

        Ok(Response {
            id: wire.id,
            outcome,
        })
    }
}

impl From<Response> for WireResponse {
    fn from(response: Response) -> Self {
        let (data, error) = match response.outcome {
            Outcome::Data(data) => (Some(data), None),
            Outcome::Error(error) => (None, Some(error)),
        };

        WireResponse {
            id: response.id,
            data,
            error,
        }
    }
}
