//! Thread backend: a worker running on its own OS thread.
//!
//! The worker thread owns a single-threaded tokio runtime and talks to the
//! parent over a pair of unbounded channels. Channels queue from the moment
//! they exist, so sends are accepted immediately after [`ThreadTransport::spawn`]
//! returns.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{lock, ErrorHandler, Handlers, MessageHandler, Transport};
use crate::protocol::error::{Result, WorkrpcError};

/// Configuration for a worker thread.
#[derive(Debug, Clone)]
pub struct ThreadConfig {
    /// Thread name, shown in panics and debuggers
    pub name: String,
    /// Stack size in bytes (platform default when unset)
    pub stack_size: Option<usize>,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            name: "workrpc-worker".to_string(),
            stack_size: None,
        }
    }
}

impl ThreadConfig {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }
}

/// Parent side of the thread backend.
///
/// Must be created from within a tokio runtime; the receive pump runs as a
/// task on it.
///
/// # Example
///
/// ```no_run
/// use workrpc_common::transport::{ThreadConfig, ThreadTransport, Transport};
///
/// # #[tokio::main]
/// # async fn main() -> workrpc_common::Result<()> {
/// let transport = ThreadTransport::spawn(ThreadConfig::default(), |port| async move {
///     // attach a dispatcher to `port` here
///     drop(port);
/// })?;
/// transport.terminate();
/// # Ok(())
/// # }
/// ```
pub struct ThreadTransport {
    inner: Arc<ThreadInner>,
}

struct ThreadInner {
    handlers: Handlers,
    to_worker: Mutex<Option<mpsc::UnboundedSender<String>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    name: String,
    terminated: AtomicBool,
}

impl ThreadTransport {
    /// Starts a worker thread and runs `entry` on it with the worker's end
    /// of the channel.
    ///
    /// The thread ends once the future returned by `entry` completes.
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if the OS refuses to create the thread, or if there is
    /// no tokio runtime to run the receive pump on.
    pub fn spawn<F, Fut>(config: ThreadConfig, entry: F) -> Result<Self>
    where
        F: FnOnce(ThreadPort) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| {
            WorkrpcError::Spawn(format!("thread transport needs a tokio runtime: {}", e))
        })?;

        let (to_worker, worker_inbox) = mpsc::unbounded_channel();
        let (to_parent, parent_inbox) = mpsc::unbounded_channel();

        let mut builder = std::thread::Builder::new().name(config.name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let thread = builder
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to build worker runtime: {}", e);
                        return;
                    }
                };

                runtime.block_on(async move {
                    let port = ThreadPort::bind(worker_inbox, to_parent);
                    entry(port).await;
                });
            })
            .map_err(|e| WorkrpcError::Spawn(format!("thread {}: {}", config.name, e)))?;

        let inner = Arc::new(ThreadInner {
            handlers: Handlers::new(),
            to_worker: Mutex::new(Some(to_worker)),
            reader: Mutex::new(None),
            thread: Mutex::new(Some(thread)),
            name: config.name,
            terminated: AtomicBool::new(false),
        });

        let reader = runtime.spawn(parent_read_pump(Arc::downgrade(&inner), parent_inbox));
        *lock(&inner.reader) = Some(reader);

        info!(thread = %inner.name, "Spawned worker thread");

        Ok(Self { inner })
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        lock(&self.inner.thread)
            .as_ref()
            .map(std::thread::JoinHandle::is_finished)
            .unwrap_or(true)
    }
}

async fn parent_read_pump(inner: Weak<ThreadInner>, mut inbox: mpsc::UnboundedReceiver<String>) {
    while let Some(message) = inbox.recv().await {
        match inner.upgrade() {
            Some(inner) => inner.handlers.emit_message(message),
            None => return,
        }
    }

    if let Some(inner) = inner.upgrade() {
        if !inner.terminated.load(Ordering::SeqCst) {
            warn!(thread = %inner.name, "Worker thread exited");
            inner.handlers.emit_error("worker thread exited".to_string());
        }
    }
}

impl Transport for ThreadTransport {
    fn send(&self, message: String) -> Result<()> {
        match lock(&self.inner.to_worker).as_ref() {
            Some(to_worker) => to_worker
                .send(message)
                .map_err(|_| WorkrpcError::Transport("worker thread exited".to_string())),
            None => Err(WorkrpcError::Terminated),
        }
    }

    fn on_message(&self, handler: MessageHandler) {
        self.inner.handlers.set_message(handler);
    }

    fn on_error(&self, handler: ErrorHandler) {
        self.inner.handlers.set_error(handler);
    }

    fn terminate(&self) {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.handlers.clear();
        // Closing the worker's inbox ends its serve loop; the thread's
        // runtime then shuts down and drops any in-flight method futures.
        lock(&self.inner.to_worker).take();
        if let Some(reader) = lock(&self.inner.reader).take() {
            reader.abort();
        }

        info!(thread = %self.inner.name, "Terminated worker thread");
    }
}

impl Drop for ThreadTransport {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Worker side of the thread backend.
///
/// When the parent terminates or drops its transport, the error handler
/// fires with `"parent closed the channel"`.
pub struct ThreadPort {
    inner: Arc<PortInner>,
}

struct PortInner {
    handlers: Handlers,
    to_parent: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadPort {
    /// Must run inside the worker thread's runtime.
    fn bind(
        inbox: mpsc::UnboundedReceiver<String>,
        to_parent: mpsc::UnboundedSender<String>,
    ) -> Self {
        let inner = Arc::new(PortInner {
            handlers: Handlers::new(),
            to_parent: Mutex::new(Some(to_parent)),
            pump: Mutex::new(None),
        });

        let pump = tokio::spawn(worker_read_pump(Arc::downgrade(&inner), inbox));
        *lock(&inner.pump) = Some(pump);

        Self { inner }
    }
}

async fn worker_read_pump(inner: Weak<PortInner>, mut inbox: mpsc::UnboundedReceiver<String>) {
    while let Some(message) = inbox.recv().await {
        match inner.upgrade() {
            Some(inner) => inner.handlers.emit_message(message),
            None => return,
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.handlers.emit_error("parent closed the channel".to_string());
    }
}

impl Transport for ThreadPort {
    fn send(&self, message: String) -> Result<()> {
        match lock(&self.inner.to_parent).as_ref() {
            Some(to_parent) => to_parent
                .send(message)
                .map_err(|_| WorkrpcError::Transport("parent closed the channel".to_string())),
            None => Err(WorkrpcError::Terminated),
        }
    }

    fn on_message(&self, handler: MessageHandler) {
        self.inner.handlers.set_message(handler);
    }

    fn on_error(&self, handler: ErrorHandler) {
        self.inner.handlers.set_error(handler);
    }

    fn terminate(&self) {
        if lock(&self.inner.to_parent).take().is_none() {
            return;
        }
        self.inner.handlers.clear();
        if let Some(pump) = lock(&self.inner.pump).take() {
            pump.abort();
        }
    }
}
