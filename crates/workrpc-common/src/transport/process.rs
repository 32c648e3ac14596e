//! Process backend: a worker running as a separate OS process.
//!
//! The parent spawns the worker with piped stdin/stdout and exchanges
//! length-prefixed envelopes over the pipes (see [`frame`](super::frame)).
//! The worker's stderr is inherited, so its logs land in the parent's
//! terminal.
//!
//! # Readiness
//!
//! A spawned process isn't listening yet. [`ProcessTransport`] starts in
//! `NotReady`, where every send is appended to a FIFO backlog. When the
//! worker's [`StdioTransport`] binds, it writes one empty frame; the parent
//! then flushes the backlog to the pipe in original order and switches to
//! `Ready`, after which sends go straight to the pipe.
//!
//! # Frame limit
//!
//! Both ends refuse to send a frame larger than the limit the other end
//! reads with, so an oversized message fails only its own send. A spawned
//! worker learns the parent's limit from the [`MAX_FRAME_SIZE_ENV`]
//! environment variable.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::frame::{self, MAX_FRAME_SIZE};
use super::{lock, ErrorHandler, Handlers, MessageHandler, Transport};
use crate::protocol::error::{Result, WorkrpcError};

/// Environment variable carrying the frame limit into a spawned worker.
pub const MAX_FRAME_SIZE_ENV: &str = "WORKRPC_MAX_FRAME_SIZE";

/// Configuration for launching a worker process.
///
/// # Example
///
/// ```
/// use workrpc_common::transport::ProcessConfig;
///
/// let config = ProcessConfig::new("/usr/local/bin/prover")
///     .arg("worker")
///     .env("RUST_LOG", "debug");
/// assert_eq!(config.args, vec!["worker".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments passed to the executable
    pub args: Vec<String>,
    /// Extra environment variables for the worker
    pub envs: Vec<(String, String)>,
    /// Working directory (inherits the parent's when unset)
    pub current_dir: Option<PathBuf>,
    /// Largest frame sent or accepted, in either direction
    pub max_frame_size: usize,
}

impl ProcessConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

/// Parent-side channel state.
enum ChannelState {
    /// Worker hasn't signalled readiness; sends queue here in order.
    NotReady { backlog: VecDeque<String> },
    /// Backlog flushed; sends go straight to the writer.
    Ready,
    /// Channel failed or was terminated; sends are refused.
    Closed { reason: String },
}

/// Parent side of the process backend.
///
/// Must be created from within a tokio runtime; the pipe pumps run as tasks
/// on it.
pub struct ProcessTransport {
    inner: Arc<ProcessInner>,
}

struct ProcessInner {
    handlers: Handlers,
    state: Mutex<ChannelState>,
    outbound: mpsc::UnboundedSender<String>,
    max_frame_size: usize,
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    terminated: AtomicBool,
}

impl ProcessTransport {
    /// Spawns the worker process described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if the executable cannot be started or if there is no
    /// tokio runtime to run the pipe pumps on.
    pub fn spawn(config: ProcessConfig) -> Result<Self> {
        let runtime = current_runtime()?;

        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .envs(config.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(MAX_FRAME_SIZE_ENV, config.max_frame_size.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &config.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            WorkrpcError::Spawn(format!("{}: {}", config.program.display(), e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkrpcError::Spawn("worker stdin was not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkrpcError::Spawn("worker stdout was not piped".to_string()))?;

        info!(
            pid = child.id(),
            program = %config.program.display(),
            "Spawned worker process"
        );

        Ok(Self::start(&runtime, stdout, stdin, config.max_frame_size, Some(child)))
    }

    /// Attaches to the pipes of a worker that is already running.
    ///
    /// The transport still waits for the worker's readiness frame before it
    /// writes anything to `writer`.
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if there is no tokio runtime to run the pipe pumps on.
    pub fn from_streams<R, W>(reader: R, writer: W, max_frame_size: usize) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let runtime = current_runtime()?;
        Ok(Self::start(&runtime, reader, writer, max_frame_size, None))
    }

    fn start<R, W>(
        runtime: &Handle,
        reader: R,
        writer: W,
        max_frame_size: usize,
        child: Option<Child>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let pid = child.as_ref().and_then(Child::id);

        let inner = Arc::new(ProcessInner {
            handlers: Handlers::new(),
            state: Mutex::new(ChannelState::NotReady {
                backlog: VecDeque::new(),
            }),
            outbound,
            max_frame_size,
            child: Mutex::new(child),
            pid,
            tasks: Mutex::new(Vec::new()),
            terminated: AtomicBool::new(false),
        });

        let writer_task = runtime.spawn(write_pump(Arc::downgrade(&inner), writer, outbound_rx));
        let reader_task = runtime.spawn(read_pump(Arc::downgrade(&inner), reader, max_frame_size));
        lock(&inner.tasks).extend([writer_task, reader_task]);

        Self { inner }
    }

    /// OS process id of the worker, if this transport spawned it.
    pub fn id(&self) -> Option<u32> {
        self.inner.pid
    }

    /// Whether the worker has signalled readiness.
    pub fn is_ready(&self) -> bool {
        matches!(*lock(&self.inner.state), ChannelState::Ready)
    }
}

impl ProcessInner {
    /// `NotReady -> Ready`: flushes the backlog, in order, exactly once.
    fn mark_ready(&self) {
        let mut state = lock(&self.state);
        let backlog = match &mut *state {
            ChannelState::NotReady { backlog } => std::mem::take(backlog),
            _ => return,
        };

        let flushed = backlog.len();
        for message in backlog {
            // A stopped writer reports its own failure.
            let _ = self.outbound.send(message);
        }
        *state = ChannelState::Ready;

        info!(pid = self.pid, flushed, "Worker process ready");
    }

    fn fail(&self, reason: String) {
        {
            let mut state = lock(&self.state);
            if matches!(*state, ChannelState::Closed { .. }) {
                return;
            }
            *state = ChannelState::Closed {
                reason: reason.clone(),
            };
        }

        if self.terminated.load(Ordering::SeqCst) {
            return;
        }

        warn!(pid = self.pid, "Worker process channel failed: {}", reason);
        self.handlers.emit_error(reason);
    }
}

async fn read_pump<R>(inner: Weak<ProcessInner>, mut reader: R, max_frame_size: usize)
where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        match frame::read_frame(&mut reader, max_frame_size).await {
            Ok(Some(frame)) => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                if frame.is_empty() {
                    inner.mark_ready();
                    continue;
                }
                match String::from_utf8(frame) {
                    Ok(message) => inner.handlers.emit_message(message),
                    Err(e) => debug!("Dropping non-UTF-8 frame from worker: {}", e),
                }
            }
            Ok(None) => break "worker process closed its channel".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    if let Some(inner) = inner.upgrade() {
        inner.fail(reason);
    }
}

async fn write_pump<W>(
    inner: Weak<ProcessInner>,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<String>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        if let Err(e) = frame::write_frame(&mut writer, message.as_bytes()).await {
            if let Some(inner) = inner.upgrade() {
                inner.fail(e.to_string());
            }
            return;
        }
    }
}

impl Transport for ProcessTransport {
    fn send(&self, message: String) -> Result<()> {
        if self.inner.terminated.load(Ordering::SeqCst) {
            return Err(WorkrpcError::Terminated);
        }
        check_frame_size(&message, self.inner.max_frame_size)?;

        let mut state = lock(&self.inner.state);
        match &mut *state {
            ChannelState::NotReady { backlog } => {
                backlog.push_back(message);
                Ok(())
            }
            ChannelState::Ready => self.inner.outbound.send(message).map_err(|_| {
                WorkrpcError::Transport("worker process writer has stopped".to_string())
            }),
            ChannelState::Closed { reason } => Err(WorkrpcError::Transport(reason.clone())),
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

        // Listeners go first so nothing fires while the process is torn down.
        self.inner.handlers.clear();
        *lock(&self.inner.state) = ChannelState::Closed {
            reason: "worker process was terminated".to_string(),
        };

        for task in lock(&self.inner.tasks).drain(..) {
            task.abort();
        }

        if let Some(mut child) = lock(&self.inner.child).take() {
            if let Err(e) = child.start_kill() {
                debug!(pid = self.inner.pid, "Failed to kill worker process: {}", e);
            }
            // Reap in the background; without a runtime, kill_on_drop covers it.
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = child.wait().await;
                });
            }
        }

        info!(pid = self.inner.pid, "Terminated worker process");
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn current_runtime() -> Result<Handle> {
    Handle::try_current()
        .map_err(|e| WorkrpcError::Spawn(format!("process transport needs a tokio runtime: {}", e)))
}

/// Refuses a message the peer would reject as oversized.
fn check_frame_size(message: &str, max_frame_size: usize) -> Result<()> {
    if message.len() > max_frame_size {
        return Err(WorkrpcError::FrameTooLarge {
            size: message.len(),
            max: max_frame_size,
        });
    }
    Ok(())
}

/// Worker side of the process backend, bound to the inherited pipes.
///
/// Binding writes the readiness frame immediately. When the parent closes
/// its end of the pipe, the error handler fires with the reason.
pub struct StdioTransport {
    inner: Arc<StdioInner>,
}

struct StdioInner {
    handlers: Handlers,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    max_frame_size: usize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Binds to this process's stdin/stdout.
    ///
    /// The frame limit comes from [`MAX_FRAME_SIZE_ENV`] when the parent set
    /// it, and defaults to [`MAX_FRAME_SIZE`]. Nothing else may write to
    /// stdout afterwards; log to stderr.
    pub fn bind() -> Self {
        let max_frame_size = std::env::var(MAX_FRAME_SIZE_ENV)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(MAX_FRAME_SIZE);
        Self::bind_streams(tokio::io::stdin(), tokio::io::stdout(), max_frame_size)
    }

    /// Binds to an arbitrary reader/writer pair.
    pub fn bind_streams<R, W>(reader: R, writer: W, max_frame_size: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(StdioInner {
            handlers: Handlers::new(),
            outbound: Mutex::new(Some(outbound)),
            max_frame_size,
            tasks: Mutex::new(Vec::new()),
        });

        let writer_task = tokio::spawn(stdio_write_pump(Arc::downgrade(&inner), writer, outbound_rx));
        let reader_task = tokio::spawn(stdio_read_pump(Arc::downgrade(&inner), reader, max_frame_size));
        lock(&inner.tasks).extend([writer_task, reader_task]);

        Self { inner }
    }
}

async fn stdio_read_pump<R>(inner: Weak<StdioInner>, mut reader: R, max_frame_size: usize)
where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        match frame::read_frame(&mut reader, max_frame_size).await {
            Ok(Some(frame)) => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                if frame.is_empty() {
                    continue;
                }
                match String::from_utf8(frame) {
                    Ok(message) => inner.handlers.emit_message(message),
                    Err(e) => debug!("Dropping non-UTF-8 frame from parent: {}", e),
                }
            }
            Ok(None) => break "parent closed the channel".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    if let Some(inner) = inner.upgrade() {
        inner.handlers.emit_error(reason);
    }
}

async fn stdio_write_pump<W>(
    inner: Weak<StdioInner>,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<String>,
) where
    W: AsyncWrite + Unpin,
{
    let result = async {
        frame::write_ready(&mut writer).await?;
        while let Some(message) = outbound.recv().await {
            frame::write_frame(&mut writer, message.as_bytes()).await?;
        }
        Ok::<_, WorkrpcError>(())
    }
    .await;

    if let Err(e) = result {
        if let Some(inner) = inner.upgrade() {
            inner.handlers.emit_error(e.to_string());
        }
    }
}

impl Transport for StdioTransport {
    fn send(&self, message: String) -> Result<()> {
        check_frame_size(&message, self.inner.max_frame_size)?;
        match lock(&self.inner.outbound).as_ref() {
            Some(outbound) => outbound
                .send(message)
                .map_err(|_| WorkrpcError::Transport("parent channel writer has stopped".to_string())),
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
        if lock(&self.inner.outbound).take().is_none() {
            return;
        }
        self.inner.handlers.clear();
        // The writer drains what is already queued, then exits on the closed channel.
        for task in lock(&self.inner.tasks).drain(1..) {
            task.abort();
        }
    }
}
