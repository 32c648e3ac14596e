//! Browser-worker entry point.

use std::rc::Rc;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use wasm_bindgen_futures::spawn_local;
use workrpc_common::protocol::error::Result;
use workrpc_common::transport::{Transport, WorkerScopeTransport};

use crate::dispatcher::Dispatcher;
use crate::registry::MethodRegistry;

/// Serves `registry` on the current dedicated worker's `self`.
///
/// Call once from the worker script's start function. Requests are queued
/// from the `message` callback and dispatched on the browser's event loop;
/// the worker keeps serving until the parent terminates it.
///
/// # Errors
///
/// Returns `Spawn` when not running inside a dedicated worker.
pub fn serve_web_worker(registry: MethodRegistry) -> Result<()> {
    let transport = Rc::new(WorkerScopeTransport::bind()?);
    let dispatcher = Dispatcher::new(registry);

    let (inbox, mut requests) = mpsc::unbounded_channel::<String>();
    transport.on_message(Arc::new(move |raw: String| {
        let _ = inbox.send(raw);
    }));

    info!(methods = ?dispatcher.registry().method_names(), "Bound worker to web worker scope");

    spawn_local(async move {
        while let Some(raw) = requests.recv().await {
            let dispatcher = dispatcher.clone();
            let transport = transport.clone();
            spawn_local(async move {
                let Some(response) = dispatcher.dispatch(&raw).await else {
                    return;
                };
                if let Err(e) = transport.send(response) {
                    warn!("Failed to post response: {}", e);
                }
            });
        }
    });

    Ok(())
}
