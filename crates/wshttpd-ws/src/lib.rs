//! # wshttpd-ws
//!
//! WebSocket engine: frame codec, per-connection state machine and the
//! HTTP Upgrade handshake, written against an abstract byte [`Transport`].
//!
//! - [`frame`]: pure encode/decode with masking and fragment reassembly
//! - [`connection`]: [`WebSocket`], control-frame handling, keepalive, close callback
//! - [`handshake`]: server accept and client initiate
//! - [`http`]: header-block parsing and status replies
//! - [`registry`]: live connection set for broadcast

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod frame;
pub mod handshake;
pub mod http;
pub mod registry;
pub mod transport;

pub use connection::{ConnectionInfo, ConnectionState, MessageHandler, WebSocket, WsConfig};
pub use errors::{BoxError, HandshakeError, ProtocolError, Result, WsError};
pub use frame::{MaskPolicy, Message, Opcode};
pub use handshake::{ClientOptions, accept_upgrade, connect, connect_tcp};
pub use registry::{ConnectionHandle, ConnectionRegistry, Outbound};
pub use transport::{IoTransport, Transport};
