//! workrpc Client
//!
//! The caller side of a workrpc channel. A [`ParentProxy`] wraps any
//! [`Transport`](workrpc_common::transport::Transport), turns method calls
//! into request envelopes and settles each call when the matching response
//! comes back.
//!
//! Typed clients for a particular worker interface are thin forwarding
//! structs over a proxy; see the `workrpc` CLI's `ComputeClient` for one.

pub mod proxy;

pub use proxy::ParentProxy;
