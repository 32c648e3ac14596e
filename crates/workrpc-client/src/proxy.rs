use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use workrpc_common::protocol::error::{Result, WorkrpcError};
use workrpc_common::protocol::{Outcome, Request, RequestId, RpcArgs, RpcResult};
use workrpc_common::transport::{JsonCodec, Transport};

/// Caller-side RPC client bound to one worker transport.
///
/// Every call gets an id from this proxy's own counter (starting at 1),
/// is recorded as pending, and is handed to the transport. The returned
/// future settles when the worker's response with that id arrives, when the
/// transport reports a channel failure, or when the proxy is terminated.
///
/// Responses may arrive in any order; correlation is by id only.
///
/// # Example
///
/// ```no_run
/// use serde_json::json;
/// use workrpc_client::ParentProxy;
/// use workrpc_common::transport::{ProcessConfig, ProcessTransport};
///
/// # #[tokio::main]
/// # async fn main() -> workrpc_common::Result<()> {
/// let transport = ProcessTransport::spawn(ProcessConfig::new("workrpc").arg("worker"))?;
/// let proxy = ParentProxy::new(transport);
///
/// let reply: serde_json::Value = proxy.call("echo", &json!({"msg": "hi"})).await?;
/// assert_eq!(reply, json!({"echoed": "Echo: hi"}));
///
/// proxy.terminate();
/// # Ok(())
/// # }
/// ```
///
/// # Timeouts
///
/// There is no per-call timeout or cancellation. Race the returned future
/// against a timer if you need one:
///
/// ```no_run
/// # use std::time::Duration;
/// # use workrpc_client::ParentProxy;
/// # use workrpc_common::transport::ThreadTransport;
/// # async fn example(proxy: &ParentProxy<ThreadTransport>) {
/// let call = proxy.call::<_, serde_json::Value>("prove", &serde_json::json!({}));
/// match tokio::time::timeout(Duration::from_secs(30), call).await {
///     Ok(result) => println!("{:?}", result),
///     Err(_) => eprintln!("prove timed out"),
/// }
/// # }
/// ```
pub struct ParentProxy<T: Transport> {
    transport: T,
    state: Arc<Mutex<ProxyState>>,
}

/// Everything the proxy's handlers and `call` share.
///
/// Locked only for short, synchronous sections: never across an `.await`,
/// never while a reply is being delivered.
struct ProxyState {
    next_id: RequestId,
    pending: HashMap<RequestId, PendingRequest>,
    terminated: bool,
}

struct PendingRequest {
    method: String,
    reply: oneshot::Sender<Result<RpcResult>>,
}

impl<T: Transport> ParentProxy<T> {
    /// Binds a proxy to `transport`, which need not be ready yet.
    ///
    /// Registers the proxy's message and error handlers on the transport.
    pub fn new(transport: T) -> Self {
        let state = Arc::new(Mutex::new(ProxyState {
            next_id: 1,
            pending: HashMap::new(),
            terminated: false,
        }));

        let on_message = state.clone();
        transport.on_message(Arc::new(move |raw: String| {
            handle_message(&on_message, &raw);
        }));

        let on_error = state.clone();
        transport.on_error(Arc::new(move |reason: String| {
            handle_transport_error(&on_error, &reason);
        }));

        Self { transport, state }
    }

    /// Calls `method` with a serializable payload and decodes the result.
    ///
    /// The request is issued before this function returns; the returned
    /// future only waits for the outcome and does not borrow the proxy.
    ///
    /// # Errors
    ///
    /// - `Remote` with the worker's message if the method failed
    /// - `Transport` if the channel failed while the call was outstanding
    /// - `Terminated` if the proxy was (or gets) terminated
    /// - `JsonSerialization` if the payload or the result doesn't fit its type
    pub fn call<Req, Res>(&self, method: &str, payload: &Req) -> impl Future<Output = Result<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let issued = serde_json::to_value(payload)
            .map_err(WorkrpcError::from)
            .and_then(|data| self.issue(method, data));

        async move {
            let result = settle(issued?).await?;
            Ok(serde_json::from_value(result)?)
        }
    }

    /// Calls `method` with a raw JSON payload.
    ///
    /// Same semantics as [`call`](Self::call) without the typed conversions.
    pub fn call_value(&self, method: &str, data: RpcArgs) -> impl Future<Output = Result<RpcResult>> {
        let issued = self.issue(method, data);
        async move { settle(issued?).await }
    }

    /// Allocates an id, records the pending entry and hands the envelope to
    /// the transport.
    fn issue(&self, method: &str, data: RpcArgs) -> Result<oneshot::Receiver<Result<RpcResult>>> {
        let (reply, outcome) = oneshot::channel();

        let (id, encoded) = {
            let mut state = lock(&self.state);
            if state.terminated {
                return Err(WorkrpcError::Terminated);
            }

            let id = state.next_id;
            state.next_id += 1;

            let encoded = JsonCodec::encode_request(&Request::new(id, method, data))?;
            state.pending.insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    reply,
                },
            );
            (id, encoded)
        };

        debug!(id, method, "Issuing request");

        if let Err(e) = self.transport.send(encoded) {
            lock(&self.state).pending.remove(&id);
            return Err(e);
        }

        Ok(outcome)
    }

    /// Rejects every outstanding call with `Terminated`, tears the transport
    /// down and refuses further calls.
    ///
    /// Idempotent.
    pub fn terminate(&self) {
        let cancelled: Vec<PendingRequest> = {
            let mut state = lock(&self.state);
            if state.terminated {
                return;
            }
            state.terminated = true;
            state.pending.drain().map(|(_, pending)| pending).collect()
        };

        let count = cancelled.len();
        for pending in cancelled {
            let _ = pending.reply.send(Err(WorkrpcError::Terminated));
        }

        self.transport.terminate();

        info!(cancelled = count, "Terminated worker proxy");
    }

    /// Number of calls waiting for a response.
    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn is_terminated(&self) -> bool {
        lock(&self.state).terminated
    }

    /// The transport this proxy is bound to.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> Drop for ParentProxy<T> {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn settle(outcome: oneshot::Receiver<Result<RpcResult>>) -> Result<RpcResult> {
    // A dropped sender means the pending entry was discarded without a verdict.
    outcome.await.unwrap_or(Err(WorkrpcError::Terminated))
}

fn handle_message(state: &Mutex<ProxyState>, raw: &str) {
    let response = match JsonCodec::decode_response(raw) {
        Ok(response) => response,
        Err(e) => {
            debug!("Dropping undecodable response: {}", e);
            return;
        }
    };

    let Some(pending) = lock(state).pending.remove(&response.id) else {
        debug!(id = response.id, "Dropping response for unknown request");
        return;
    };

    let result = match response.outcome {
        Outcome::Data(data) => Ok(data),
        Outcome::Error(message) => Err(WorkrpcError::Remote(message)),
    };

    debug!(
        id = response.id,
        method = %pending.method,
        success = result.is_ok(),
        "Settling request"
    );

    // The caller may have stopped waiting; that's fine.
    let _ = pending.reply.send(result);
}

fn handle_transport_error(state: &Mutex<ProxyState>, reason: &str) {
    let failed: Vec<PendingRequest> = lock(state)
        .pending
        .drain()
        .map(|(_, pending)| pending)
        .collect();

    warn!(in_flight = failed.len(), "Worker transport failed: {}", reason);

    for pending in failed {
        let _ = pending
            .reply
            .send(Err(WorkrpcError::Transport(reason.to_string())));
    }
}

fn lock(state: &Mutex<ProxyState>) -> MutexGuard<'_, ProxyState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
