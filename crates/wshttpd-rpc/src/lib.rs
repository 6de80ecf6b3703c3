//! # wshttpd-rpc
//!
//! Bidirectional JSON RPC over a WebSocket. Each text frame carries one
//! `[kind, payload]` envelope where `kind` is `call`, `event`, `return` or
//! `error`. Both ends can call each other; a call blocks its caller while
//! still serving whatever the other side sends in the meantime.

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod peer;
pub mod registry;

pub use envelope::{Envelope, EnvelopeError, EnvelopeKind, Invocation};
pub use errors::RpcError;
pub use peer::{RpcPeer, broadcast_event};
pub use registry::{Args, MethodHandler, MethodRegistry};
