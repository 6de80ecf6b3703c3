//! # wshttpd-server
//!
//! HTTP server that upgrades WebSocket requests and answers everything
//! else with static pages.
//!
//! - **Upgrades**: handed to a JSON RPC [`MethodRegistry`](wshttpd_rpc::MethodRegistry)
//!   or to a per-connection [`MessageHandler`](wshttpd_ws::MessageHandler)
//! - **Plain requests**: answered by a [`PageHandler`], by default
//!   [`StaticPages`] with `#WEBSOCKET#` substitution
//! - **Authentication**: optional HTTP Basic, checked before either path
//! - **Shutdown**: [`ShutdownCoordinator`] stops accepting and drains
//!   open connections

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod pages;
pub mod server;
pub mod shutdown;
pub mod template;

pub use auth::{Authenticator, StaticUsers};
pub use config::ServerConfig;
pub use errors::ServerError;
pub use pages::{PageHandler, PageRequest, PageType, StaticPages};
pub use server::{Service, SocketService, WsServer};
pub use shutdown::ShutdownCoordinator;
