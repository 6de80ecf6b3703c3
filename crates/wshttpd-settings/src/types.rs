//! Server settings.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Network, limits, static pages, authentication and logging.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listening port.
    pub port: u16,
    /// Largest WebSocket frame or message accepted, in bytes.
    pub max_message_size: usize,
    /// Simultaneous connections before new ones get 503.
    pub max_connections: usize,
    /// Directories searched for static pages, in order.
    pub http_dirs: Vec<PathBuf>,
    /// Basic-auth realm. Authentication is off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_message: Option<String>,
    /// Accepted Basic-auth credentials, user to password.
    pub auth_users: BTreeMap<String, String>,
    /// Seconds between keepalive pings; 0 disables them.
    pub ping_interval_secs: u64,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_message_size: 16 * 1024 * 1024,
            max_connections: 1024,
            http_dirs: Vec::new(),
            auth_message: None,
            auth_users: BTreeMap::new(),
            ping_interval_secs: 30,
            log_level: "info".to_string(),
        }
    }
}

impl ServerSettings {
    /// `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "maxMessageSize must be positive".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "maxConnections must be positive".into(),
            ));
        }
        if self.auth_message.is_some() && self.auth_users.is_empty() {
            return Err(SettingsError::InvalidValue(
                "authMessage is set but authUsers is empty".into(),
            ));
        }
        Ok(())
    }
}
