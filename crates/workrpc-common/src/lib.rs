//! workrpc Common Types and Transports
//!
//! This crate provides the envelope definitions and the transport layer shared
//! by both sides of a workrpc channel: the parent that issues calls and the
//! worker that executes them.
//!
//! # Overview
//!
//! workrpc moves expensive computation (proof construction, circuit
//! compilation, anything CPU-heavy) off the caller's event loop and into an
//! isolated worker: a child process, a dedicated thread, or a browser Web
//! Worker. Callers see plain async method calls; this crate carries the bytes.
//!
//! - **Protocol Layer**: [`Request`]/[`Response`] envelopes and [`WorkrpcError`]
//! - **Transport Layer**: the [`Transport`](transport::Transport) trait and its
//!   process, thread and web-worker backends
//!
//! # Wire Format
//!
//! ```text
//! request   {"id": 1, "methodName": "echo", "data": {"msg": "hi"}}
//! success   {"id": 1, "data": {"echoed": "Echo: hi"}}
//! failure   {"id": 1, "error": "boom"}
//! ```
//!
//! The process backend frames each envelope as
//! `[4-byte length prefix as u32 big-endian] + [JSON data]`.

pub mod protocol;
pub mod transport;

pub use protocol::*;
