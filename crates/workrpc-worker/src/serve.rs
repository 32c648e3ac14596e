//! Worker entry points for the native backends.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info, warn};
use workrpc_common::protocol::error::{Result, WorkrpcError};
use workrpc_common::protocol::Response;
use workrpc_common::transport::{
    JsonCodec, StdioTransport, ThreadConfig, ThreadTransport, Transport,
};

use crate::dispatcher::Dispatcher;
use crate::registry::MethodRegistry;

/// Answers requests arriving on `transport` until its channel closes.
///
/// Each request is dispatched on its own task, so a slow method doesn't hold
/// up the ones behind it. When the transport reports a channel failure
/// (normally the parent going away) the loop returns and the transport is
/// terminated, dropping any requests still in flight.
///
/// Must be called from within a tokio runtime.
pub async fn serve<T>(transport: Arc<T>, dispatcher: Dispatcher)
where
    T: Transport + Send + Sync + 'static,
{
    let closed = Arc::new(Notify::new());

    // Registered first so a failure replayed during message registration
    // still ends the loop.
    let on_error = closed.clone();
    transport.on_error(Arc::new(move |reason: String| {
        info!("Worker channel closed: {}", reason);
        on_error.notify_one();
    }));

    let runtime = tokio::runtime::Handle::current();
    let responder = Arc::downgrade(&transport);
    transport.on_message(Arc::new(move |raw: String| {
        let dispatcher = dispatcher.clone();
        let responder = responder.clone();

        runtime.spawn(async move {
            let Some(response) = dispatcher.dispatch(&raw).await else {
                return;
            };
            let Some(transport) = responder.upgrade() else {
                debug!("Dropping response, worker transport is gone");
                return;
            };
            match transport.send(response) {
                Ok(()) => {}
                Err(e @ WorkrpcError::FrameTooLarge { .. }) => reply_too_large(&*transport, &raw, e),
                Err(e) => warn!("Failed to send response: {}", e),
            }
        });
    }));

    info!("Worker serving requests");
    closed.notified().await;

    transport.terminate();
}

/// Replaces a response the channel refused as oversized with an error
/// response, so the caller still hears back.
fn reply_too_large<T: Transport + ?Sized>(transport: &T, raw: &str, cause: WorkrpcError) {
    let Ok(request) = JsonCodec::decode_request(raw) else {
        return;
    };
    warn!(id = request.id, method = %request.method_name, "Response too large: {}", cause);

    let response = Response::error(
        request.id,
        format!("response from {} is too large: {}", request.method_name, cause),
    );
    match JsonCodec::encode_response(&response) {
        Ok(encoded) => {
            if let Err(e) = transport.send(encoded) {
                warn!("Failed to send response: {}", e);
            }
        }
        Err(e) => warn!("Failed to encode response: {}", e),
    }
}

/// Process target: serves `dispatcher` over this process's stdin/stdout.
///
/// Binding signals readiness to the parent. Returns once the parent closes
/// the pipe.
pub async fn serve_stdio(dispatcher: Dispatcher) -> Result<()> {
    let transport = Arc::new(StdioTransport::bind());
    info!(
        pid = std::process::id(),
        methods = ?dispatcher.registry().method_names(),
        "Bound worker to stdio"
    );

    serve(transport, dispatcher).await;
    Ok(())
}

/// Thread target: starts a worker thread serving `registry` and returns the
/// parent side of its channel.
///
/// # Errors
///
/// Returns `Spawn` if the thread can't be created.
pub fn spawn_thread_worker(config: ThreadConfig, registry: MethodRegistry) -> Result<ThreadTransport> {
    let dispatcher = Dispatcher::new(registry);
    ThreadTransport::spawn(config, move |port| serve(Arc::new(port), dispatcher))
}
