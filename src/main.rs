//! # wshttpd
//!
//! WebSocket + JSON RPC server binary. Loads layered settings, serves the
//! demo methods over WebSocket and static pages over plain HTTP until
//! Ctrl-C.

#![deny(unsafe_code)]

mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wshttpd_server::{ServerConfig, WsServer};
use wshttpd_settings::{ServerSettings, load_settings_from_path, settings_path};
use wshttpd_ws::ConnectionRegistry;

/// WebSocket + JSON RPC server.
#[derive(Parser, Debug)]
#[command(name = "wshttpd", about = "WebSocket + JSON RPC server")]
struct Cli {
    /// Settings file (default `~/.wshttpd/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Directory to serve pages from; repeat for several. Replaces
    /// `httpDirs` from settings.
    #[arg(long = "dir")]
    dirs: Vec<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(&self, settings: &mut ServerSettings) {
        if let Some(host) = &self.host {
            settings.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if !self.dirs.is_empty() {
            settings.http_dirs.clone_from(&self.dirs);
        }
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init is a no-op if a subscriber is already set
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    init_logging(&settings.log_level, cli.log_json);

    let connections = Arc::new(ConnectionRegistry::new());
    let methods = demo::methods(Arc::clone(&connections));
    let method_count = methods.len();

    let server = Arc::new(
        WsServer::rpc(ServerConfig::from(&settings), methods).with_registry(connections),
    );
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!(
        auth = settings.auth_message.is_some(),
        page_dirs = settings.http_dirs.len(),
        "wshttpd listening on http://{addr} ({method_count} RPC methods registered)"
    );

    server.shutdown().shutdown_on_ctrl_c();
    handle.await.context("Server task failed")?;

    info!("Shutdown complete");
    Ok(())
}
