//! workrpc Transport Layer
//!
//! A [`Transport`] is the narrow capability both sides of a worker channel
//! share: send a string envelope, receive string envelopes, hear about
//! channel failure, and tear the channel down. Clients and dispatchers only
//! ever talk to this trait, never to a concrete backend.
//!
//! # Backends
//!
//! | backend        | parent side                  | worker side                     |
//! |----------------|------------------------------|---------------------------------|
//! | OS process     | [`ProcessTransport`]         | [`StdioTransport`]              |
//! | OS thread      | [`ThreadTransport`]          | [`ThreadPort`]                  |
//! | browser worker | `WebWorkerTransport` (wasm)  | `WorkerScopeTransport` (wasm)   |
//!
//! The process backend is the only one with asynchronous startup: sends
//! issued before the child signals readiness are buffered and flushed in
//! order once it does. The other backends accept sends immediately.
//!
//! # Delivery
//!
//! Every backend delivers messages from one side to the other in FIFO order.
//! Messages that arrive before a message handler is registered are held and
//! replayed, in order, to the first handler registered. A channel error that
//! fires before an error handler exists is likewise replayed on registration.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::protocol::error::Result;

pub mod codec;

#[cfg(not(target_arch = "wasm32"))]
pub mod frame;
#[cfg(not(target_arch = "wasm32"))]
pub mod process;
#[cfg(not(target_arch = "wasm32"))]
pub mod thread;
#[cfg(target_arch = "wasm32")]
pub mod web_worker;

pub use codec::JsonCodec;
#[cfg(not(target_arch = "wasm32"))]
pub use process::{ProcessConfig, ProcessTransport, StdioTransport, MAX_FRAME_SIZE_ENV};
#[cfg(not(target_arch = "wasm32"))]
pub use thread::{ThreadConfig, ThreadPort, ThreadTransport};
#[cfg(target_arch = "wasm32")]
pub use web_worker::{WebWorkerTransport, WorkerScopeTransport};

#[cfg(test)]
mod tests;

/// Callback receiving one serialized envelope.
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Callback receiving a human-readable reason for a channel failure.
pub type ErrorHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Minimal send/receive/terminate capability over a worker channel.
///
/// Handler registration follows "last registration wins": registering a new
/// message or error handler replaces the previous one.
pub trait Transport {
    /// Hands one serialized envelope to the channel.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the channel is already closed, or `Terminated`
    /// if [`terminate`](Transport::terminate) was called.
    fn send(&self, message: String) -> Result<()>;

    /// Registers the handler for incoming envelopes.
    fn on_message(&self, handler: MessageHandler);

    /// Registers the handler for channel-level failures.
    fn on_error(&self, handler: ErrorHandler);

    /// Removes all handlers and releases the underlying worker resource.
    ///
    /// Idempotent.
    fn terminate(&self);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, message: String) -> Result<()> {
        (**self).send(message)
    }

    fn on_message(&self, handler: MessageHandler) {
        (**self).on_message(handler)
    }

    fn on_error(&self, handler: ErrorHandler) {
        (**self).on_error(handler)
    }

    fn terminate(&self) {
        (**self).terminate()
    }
}

/// Handler slots shared by every backend.
///
/// Backends feed incoming messages and failures through [`emit_message`] and
/// [`emit_error`] from a single pump; `Handlers` takes care of replaying
/// anything that arrived before registration and of dropping everything
/// after [`clear`].
///
/// [`emit_message`]: Handlers::emit_message
/// [`emit_error`]: Handlers::emit_error
/// [`clear`]: Handlers::clear
#[derive(Default)]
pub struct Handlers {
    slots: Mutex<Slots>,
}

#[derive(Default)]
struct Slots {
    message: Option<MessageHandler>,
    error: Option<ErrorHandler>,
    /// Messages waiting for a handler, or for an in-progress replay to reach them
    backlog: VecDeque<String>,
    replaying: bool,
    pending_error: Option<String>,
    cleared: bool,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        lock(&self.slots)
    }

    /// Installs the message handler and replays any backlog to it.
    pub fn set_message(&self, handler: MessageHandler) {
        {
            let mut slots = self.slots();
            if slots.cleared {
                return;
            }
            slots.message = Some(handler);
            if slots.backlog.is_empty() || slots.replaying {
                return;
            }
            slots.replaying = true;
        }

        // The handler is looked up per message: one registered mid-replay
        // takes over the rest of the backlog.
        loop {
            let (handler, next) = {
                let mut slots = self.slots();
                let handler = match &slots.message {
                    Some(handler) if !slots.cleared => handler.clone(),
                    _ => {
                        slots.replaying = false;
                        break;
                    }
                };
                match slots.backlog.pop_front() {
                    Some(message) => (handler, message),
                    None => {
                        slots.replaying = false;
                        break;
                    }
                }
            };
            handler(next);
        }
    }

    /// Installs the error handler, replaying a failure that fired before it.
    pub fn set_error(&self, handler: ErrorHandler) {
        let pending = {
            let mut slots = self.slots();
            if slots.cleared {
                return;
            }
            slots.error = Some(handler.clone());
            slots.pending_error.take()
        };

        if let Some(reason) = pending {
            handler(reason);
        }
    }

    /// Delivers one incoming message.
    pub fn emit_message(&self, message: String) {
        let handler = {
            let mut slots = self.slots();
            if slots.cleared {
                return;
            }
            match &slots.message {
                Some(handler) if !slots.replaying => handler.clone(),
                _ => {
                    slots.backlog.push_back(message);
                    return;
                }
            }
        };

        handler(message);
    }

    /// Reports a channel failure.
    pub fn emit_error(&self, reason: String) {
        let handler = {
            let mut slots = self.slots();
            if slots.cleared {
                return;
            }
            match &slots.error {
                Some(handler) => handler.clone(),
                None => {
                    slots.pending_error.get_or_insert(reason);
                    return;
                }
            }
        };

        handler(reason);
    }

    /// Drops all handlers and anything queued for them. Later emits are ignored.
    pub fn clear(&self) {
        let mut slots = self.slots();
        slots.cleared = true;
        slots.message = None;
        slots.error = None;
        slots.backlog.clear();
        slots.pending_error = None;
    }

    pub fn is_cleared(&self) -> bool {
        self.slots().cleared
    }
}

/// Locks `mutex`, recovering the guard if a panicking thread poisoned it.
///
/// Every critical section in this crate leaves its state consistent before
/// anything that can panic runs, so the data behind a poisoned lock is sound.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
