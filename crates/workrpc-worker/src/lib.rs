//! workrpc Worker
//!
//! The callee side of a workrpc channel: a [`MethodRegistry`] holding the
//! worker's implementation, a [`Dispatcher`] that turns request envelopes
//! into response envelopes, and one entry point per transport backend.
//!
//! ```no_run
//! use serde::Deserialize;
//! use workrpc_worker::{serve_stdio, Dispatcher, MethodRegistry};
//!
//! #[derive(Deserialize)]
//! struct Square {
//!     n: u64,
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> workrpc_common::Result<()> {
//! let mut registry = MethodRegistry::new();
//! registry.register("square", |args: Square| async move {
//!     Ok::<_, String>(args.n * args.n)
//! });
//!
//! serve_stdio(Dispatcher::new(registry)).await
//! # }
//! ```

pub mod dispatcher;
pub mod registry;

#[cfg(not(target_arch = "wasm32"))]
pub mod serve;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use dispatcher::Dispatcher;
pub use registry::{MethodFuture, MethodRegistry};
#[cfg(not(target_arch = "wasm32"))]
pub use serve::{serve, serve_stdio, spawn_thread_worker};
#[cfg(target_arch = "wasm32")]
pub use web::serve_web_worker;
