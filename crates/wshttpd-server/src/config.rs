//! Server configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wshttpd_settings::ServerSettings;
use wshttpd_ws::WsConfig;

/// Runtime configuration for [`WsServer`](crate::server::WsServer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Simultaneous connections; further ones get 503.
    pub max_connections: usize,
    /// Largest WebSocket frame or message accepted, in bytes.
    pub max_message_size: usize,
    /// Keepalive ping interval in seconds. `0` disables pings.
    pub ping_interval_secs: u64,
    /// Per-connection queue capacity for broadcast messages.
    pub outbox_capacity: usize,
    /// Directories searched for static pages.
    pub http_dirs: Vec<PathBuf>,
    /// Basic-auth realm. `None` turns authentication off.
    pub auth_message: Option<String>,
    /// Accepted credentials when authentication is on.
    pub auth_users: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            ping_interval_secs: 0,
            outbox_capacity: 256,
            http_dirs: Vec::new(),
            auth_message: None,
            auth_users: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Limits and timers handed to every accepted connection.
    pub fn ws_config(&self) -> WsConfig {
        WsConfig {
            max_message_size: self.max_message_size,
            ping_interval: (self.ping_interval_secs > 0)
                .then(|| Duration::from_secs(self.ping_interval_secs)),
            outbox_capacity: self.outbox_capacity,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_connections: settings.max_connections,
            max_message_size: settings.max_message_size,
            ping_interval_secs: settings.ping_interval_secs,
            http_dirs: settings.http_dirs.clone(),
            auth_message: settings.auth_message.clone(),
            auth_users: settings.auth_users.clone(),
            ..Self::default()
        }
    }
}
