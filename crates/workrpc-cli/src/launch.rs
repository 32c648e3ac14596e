//! Starting a compute worker on a chosen backend.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use workrpc_common::protocol::error::Result;
use workrpc_common::transport::{ProcessConfig, ProcessTransport, ThreadConfig, Transport};
use workrpc_worker::spawn_thread_worker;

use crate::compute::{self, ComputeClient};

/// Environment variable naming the worker executable for the process backend.
pub const WORKER_BIN_ENV: &str = "WORKRPC_WORKER_BIN";

/// Transport handle shared by both native backends.
pub type SharedTransport = Arc<dyn Transport + Send + Sync>;

/// Backend a worker is started on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// A child process speaking over its stdin/stdout
    #[default]
    Process,
    /// A dedicated thread in this process
    Thread,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "process" => Ok(TransportKind::Process),
            "thread" => Ok(TransportKind::Thread),
            other => Err(format!(
                "unknown transport '{}': expected 'process' or 'thread'",
                other
            )),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Process => f.write_str("process"),
            TransportKind::Thread => f.write_str("thread"),
        }
    }
}

/// How to start a compute worker.
#[derive(Debug, Clone, Default)]
pub struct LaunchConfig {
    pub transport: TransportKind,
    /// Worker executable; falls back to `WORKRPC_WORKER_BIN`, then to the
    /// current executable
    pub worker_bin: Option<PathBuf>,
    /// `RUST_LOG` for a worker process; inherited when unset
    pub worker_log: Option<String>,
}

impl LaunchConfig {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            ..Self::default()
        }
    }

    pub fn worker_bin(mut self, worker_bin: impl Into<PathBuf>) -> Self {
        self.worker_bin = Some(worker_bin.into());
        self
    }

    pub fn worker_log(mut self, filter: impl Into<String>) -> Self {
        self.worker_log = Some(filter.into());
        self
    }

    /// Resolves the executable a process worker runs.
    pub fn worker_program(&self) -> Result<PathBuf> {
        if let Some(program) = &self.worker_bin {
            return Ok(program.clone());
        }
        if let Some(program) = std::env::var_os(WORKER_BIN_ENV) {
            return Ok(PathBuf::from(program));
        }
        Ok(std::env::current_exe()?)
    }
}

/// Starts a compute worker and returns a client bound to it.
///
/// The process backend runs `<worker program> worker`. Must be called from
/// within a tokio runtime.
///
/// # Errors
///
/// Returns `Spawn` or `Io` if the worker can't be started.
pub fn launch(config: &LaunchConfig) -> Result<ComputeClient<SharedTransport>> {
    let transport: SharedTransport = match config.transport {
        TransportKind::Process => {
            let mut process = ProcessConfig::new(config.worker_program()?).arg("worker");
            if let Some(filter) = &config.worker_log {
                process = process.env("RUST_LOG", filter.clone());
            }
            Arc::new(ProcessTransport::spawn(process)?)
        }
        TransportKind::Thread => Arc::new(spawn_thread_worker(
            ThreadConfig::default().name("compute-worker"),
            compute::registry(),
        )?),
    };

    Ok(ComputeClient::new(transport))
}
