//! The `compute` worker interface.
//!
//! A handful of small methods covering the interesting cases: a plain
//! round trip (`echo`), an application error (`shout`), an async delay
//! that finishes out of order (`sleep`), CPU-bound work (`fib`) and a probe
//! for which process is answering (`pid`).
//!
//! [`registry`] is the worker's implementation; [`ComputeClient`] is the
//! caller's typed view of it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use workrpc_client::ParentProxy;
use workrpc_common::protocol::error::Result;
use workrpc_common::transport::Transport;
use workrpc_worker::MethodRegistry;

/// Largest `n` whose Fibonacci number fits in a `u64`.
pub const MAX_FIB_N: u32 = 93;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageArgs {
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoReply {
    pub echoed: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoutReply {
    pub shouted: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepArgs {
    pub ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepReply {
    pub slept_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FibArgs {
    pub n: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibReply {
    pub n: u32,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidReply {
    pub pid: u32,
}

/// Failures the compute methods report to their callers.
#[derive(Error, Debug, PartialEq)]
pub enum ComputeError {
    #[error("boom")]
    EmptyMessage,

    #[error("fib({0}) does not fit in u64 (n must be at most 93)")]
    FibOverflow(u32),
}

pub fn echo(args: MessageArgs) -> EchoReply {
    EchoReply {
        echoed: format!("Echo: {}", args.msg),
    }
}

pub fn shout(args: MessageArgs) -> std::result::Result<ShoutReply, ComputeError> {
    if args.msg.is_empty() {
        return Err(ComputeError::EmptyMessage);
    }
    Ok(ShoutReply {
        shouted: args.msg.to_uppercase(),
    })
}

/// Iterative Fibonacci, `fib(0) = 0`, `fib(1) = 1`.
pub fn fib(n: u32) -> std::result::Result<u64, ComputeError> {
    if n > MAX_FIB_N {
        return Err(ComputeError::FibOverflow(n));
    }

    if n == 0 {
        return Ok(0);
    }

    let (mut a, mut b) = (0u64, 1u64);
    for _ in 1..n {
        let next = a + b;
        a = b;
        b = next;
    }
    Ok(b)
}

/// Builds the worker-side method table.
pub fn registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    registry
        .register("echo", |args: MessageArgs| async move {
            Ok::<_, ComputeError>(echo(args))
        })
        .register("shout", |args: MessageArgs| async move { shout(args) })
        .register("sleep", |args: SleepArgs| async move {
            tokio::time::sleep(Duration::from_millis(args.ms)).await;
            Ok::<_, ComputeError>(SleepReply { slept_ms: args.ms })
        })
        .register("fib", |args: FibArgs| async move {
            fib(args.n).map(|value| FibReply { n: args.n, value })
        })
        .register("pid", |_: ()| async move {
            Ok::<_, ComputeError>(PidReply {
                pid: std::process::id(),
            })
        });
    registry
}

/// Typed client for a worker serving [`registry`].
pub struct ComputeClient<T: Transport> {
    proxy: ParentProxy<T>,
}

impl<T: Transport> ComputeClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            proxy: ParentProxy::new(transport),
        }
    }

    pub async fn echo(&self, msg: &str) -> Result<EchoReply> {
        self.proxy.call("echo", &MessageArgs { msg: msg.to_string() }).await
    }

    pub async fn shout(&self, msg: &str) -> Result<ShoutReply> {
        self.proxy.call("shout", &MessageArgs { msg: msg.to_string() }).await
    }

    pub async fn sleep(&self, ms: u64) -> Result<SleepReply> {
        self.proxy.call("sleep", &SleepArgs { ms }).await
    }

    pub async fn fib(&self, n: u32) -> Result<FibReply> {
        self.proxy.call("fib", &FibArgs { n }).await
    }

    pub async fn pid(&self) -> Result<PidReply> {
        self.proxy.call("pid", &()).await
    }

    /// The underlying proxy, for untyped calls.
    pub fn proxy(&self) -> &ParentProxy<T> {
        &self.proxy
    }

    pub fn terminate(&self) {
        self.proxy.terminate();
    }
}
