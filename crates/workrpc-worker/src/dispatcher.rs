use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, warn};
use workrpc_common::protocol::{Request, Response};
use workrpc_common::transport::JsonCodec;

use crate::registry::MethodRegistry;

/// Turns request envelopes into response envelopes using a [`MethodRegistry`].
///
/// Every request that decodes gets exactly one response, whatever the
/// method does: return a value, return an error, take bad arguments, or
/// panic. Requests that don't decode get nothing, since there is no id to
/// answer.
///
/// Cloning is cheap; clones share the registry.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: Arc<MethodRegistry>,
}

impl Dispatcher {
    pub fn new(registry: MethodRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Handles one serialized request and returns the serialized response.
    ///
    /// Returns `None` for input that isn't a request envelope.
    pub async fn dispatch(&self, raw: &str) -> Option<String> {
        let request = match JsonCodec::decode_request(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("Dropping malformed request: {}", e);
                return None;
            }
        };

        let response = self.handle(request).await;

        match JsonCodec::encode_response(&response) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                warn!(id = response.id, "Failed to encode response: {}", e);
                None
            }
        }
    }

    /// Invokes the method a decoded request names.
    pub async fn handle(&self, request: Request) -> Response {
        let Request {
            id,
            method_name,
            data,
        } = request;

        let Some(method) = self.registry.get(&method_name) else {
            debug!(id, method = %method_name, "Unknown method");
            return Response::error(id, format!("unknown method: {}", method_name));
        };

        debug!(id, method = %method_name, "Dispatching request");

        // Calling `method` inside the async block puts a panic in its
        // synchronous prologue under the same catch.
        let outcome = AssertUnwindSafe(async move { method(data).await })
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(id, method = %method_name, "Method panicked: {}", message);
                Err(format!("method {} panicked: {}", method_name, message))
            }
        };

        match result {
            Ok(data) => Response::success(id, data),
            Err(message) => {
                debug!(id, method = %method_name, "Method failed: {}", message);
                Response::error(id, message)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
