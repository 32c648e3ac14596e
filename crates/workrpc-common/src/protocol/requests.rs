//! workrpc Request Types
//!
//! This module defines the request envelope sent from a parent to its worker.

use serde::{Deserialize, Serialize};

pub type RequestId = u64;
pub type MethodName = String;
pub type RpcArgs = serde_json::Value;

/// An RPC request sent from a parent proxy to a worker.
///
/// Serialized as `{"id": <u64>, "methodName": "<string>", "data": <json>}`.
/// A missing `data` key decodes as `null`.
///
/// Ids are assigned by the issuing proxy, so a `Request` is always built with
/// an explicit id rather than drawing one from a global counter.
///
/// # Example
///
/// ```
/// use workrpc_common::protocol::Request;
/// use serde_json::json;
///
/// let request = Request::new(1, "prove", json!({"circuit": "transfer"}));
/// assert_eq!(request.method_name, "prove");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: RequestId,
    pub method_name: MethodName,
    #[serde(default)]
    pub data: RpcArgs,
}

impl Request {
    pub fn new(id: RequestId, method_name: impl Into<String>, data: RpcArgs) -> Self {
        Request {
            id,
            method_name: method_name.into(),
            data,
        }
    }
}
