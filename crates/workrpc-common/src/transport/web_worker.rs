//! Browser backend: a worker running as a dedicated Web Worker.
//!
//! Envelopes cross the boundary as plain strings through `postMessage`.
//! The browser queues messages posted to a worker that hasn't started its
//! script yet, so sends are accepted immediately.

use std::cell::RefCell;
use std::sync::Arc;

use tracing::{debug, info};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{DedicatedWorkerGlobalScope, ErrorEvent, MessageEvent, Worker, WorkerOptions, WorkerType};

use super::{ErrorHandler, Handlers, MessageHandler, Transport};
use crate::protocol::error::{Result, WorkrpcError};

/// Closures that need to stay alive for the worker callbacks.
struct ParentClosures {
    _onmessage: Closure<dyn FnMut(MessageEvent)>,
    _onerror: Closure<dyn FnMut(ErrorEvent)>,
}

/// Parent side of the browser backend, wrapping a [`Worker`].
pub struct WebWorkerTransport {
    worker: Worker,
    handlers: Arc<Handlers>,
    closures: RefCell<Option<ParentClosures>>,
}

impl WebWorkerTransport {
    /// Starts a module worker from `script_url`.
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if the browser refuses to create the worker.
    pub fn new(script_url: &str) -> Result<Self> {
        let options = WorkerOptions::new();
        options.set_type(WorkerType::Module);

        let worker = Worker::new_with_options(script_url, &options)
            .map_err(|e| WorkrpcError::Spawn(format!("failed to create worker {}: {:?}", script_url, e)))?;

        info!(script_url, "Spawned web worker");
        Ok(Self::from_worker(worker))
    }

    /// Wraps a worker the caller already created.
    pub fn from_worker(worker: Worker) -> Self {
        let handlers = Arc::new(Handlers::new());

        let on_message = handlers.clone();
        let onmessage = Closure::wrap(Box::new(move |e: MessageEvent| match e.data().as_string() {
            Some(message) => on_message.emit_message(message),
            None => debug!("Dropping non-string message from web worker"),
        }) as Box<dyn FnMut(MessageEvent)>);
        worker.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

        let on_error = handlers.clone();
        let onerror = Closure::wrap(Box::new(move |e: ErrorEvent| {
            on_error.emit_error(format!("web worker error: {}", e.message()));
        }) as Box<dyn FnMut(ErrorEvent)>);
        worker.set_onerror(Some(onerror.as_ref().unchecked_ref()));

        Self {
            worker,
            handlers,
            closures: RefCell::new(Some(ParentClosures {
                _onmessage: onmessage,
                _onerror: onerror,
            })),
        }
    }
}

impl Transport for WebWorkerTransport {
    fn send(&self, message: String) -> Result<()> {
        if self.closures.borrow().is_none() {
            return Err(WorkrpcError::Terminated);
        }
        self.worker
            .post_message(&JsValue::from_str(&message))
            .map_err(|e| WorkrpcError::Transport(format!("postMessage failed: {:?}", e)))
    }

    fn on_message(&self, handler: MessageHandler) {
        self.handlers.set_message(handler);
    }

    fn on_error(&self, handler: ErrorHandler) {
        self.handlers.set_error(handler);
    }

    fn terminate(&self) {
        let Some(closures) = self.closures.borrow_mut().take() else {
            return;
        };

        self.handlers.clear();
        self.worker.set_onmessage(None);
        self.worker.set_onerror(None);
        drop(closures);
        self.worker.terminate();

        info!("Terminated web worker");
    }
}

impl Drop for WebWorkerTransport {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Worker side of the browser backend, bound to the worker's own `self`.
pub struct WorkerScopeTransport {
    scope: DedicatedWorkerGlobalScope,
    handlers: Arc<Handlers>,
    onmessage: RefCell<Option<Closure<dyn FnMut(MessageEvent)>>>,
}

impl WorkerScopeTransport {
    /// # Errors
    ///
    /// Returns `Spawn` when not running inside a dedicated worker.
    pub fn bind() -> Result<Self> {
        let scope = js_sys::global()
            .dyn_into::<DedicatedWorkerGlobalScope>()
            .map_err(|_| WorkrpcError::Spawn("not running inside a dedicated worker".to_string()))?;

        let handlers = Arc::new(Handlers::new());

        let on_message = handlers.clone();
        let onmessage = Closure::wrap(Box::new(move |e: MessageEvent| match e.data().as_string() {
            Some(message) => on_message.emit_message(message),
            None => debug!("Dropping non-string message from parent"),
        }) as Box<dyn FnMut(MessageEvent)>);
        scope.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

        Ok(Self {
            scope,
            handlers,
            onmessage: RefCell::new(Some(onmessage)),
        })
    }
}

impl Transport for WorkerScopeTransport {
    fn send(&self, message: String) -> Result<()> {
        self.scope
            .post_message(&JsValue::from_str(&message))
            .map_err(|e| WorkrpcError::Transport(format!("postMessage failed: {:?}", e)))
    }

    fn on_message(&self, handler: MessageHandler) {
        self.handlers.set_message(handler);
    }

    fn on_error(&self, handler: ErrorHandler) {
        self.handlers.set_error(handler);
    }

    fn terminate(&self) {
        let Some(onmessage) = self.onmessage.borrow_mut().take() else {
            return;
        };

        self.handlers.clear();
        self.scope.set_onmessage(None);
        drop(onmessage);
        self.scope.close();
    }
}
