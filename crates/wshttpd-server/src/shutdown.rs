//! Connection draining on shutdown.
//!
//! One [`CancellationToken`] is shared by the accept loop and every
//! connection task. Cancelling it has these effects:
//!
//! - the accept loop stops and drops its listener, so new clients are refused
//!   by the OS;
//! - a connection still reading its request head is dropped without a reply;
//! - an open WebSocket stops serving, sends a close frame and shuts its
//!   transport;
//! - a page request whose head was already read is answered normally.
//!
//! [`ShutdownCoordinator::graceful_shutdown`] then waits on the server's
//! [`TaskTracker`] for a bounded time. Tasks still running after that are
//! left detached and end with the runtime.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// How long open connections get to close after shutdown starts.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the server-wide stop signal.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Not yet shutting down.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Handle for a connection task to watch.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal every holder of [`Self::token`]. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether [`Self::shutdown`] has run.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Start shutdown on Ctrl-C. The watcher exits quietly if shutdown is
    /// started some other way first.
    pub fn shutdown_on_ctrl_c(&self) {
        let token = self.token.clone();
        drop(tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        warn!(error = %err, "ctrl-c handler unavailable");
                        return;
                    }
                    info!("ctrl-c received, draining connections");
                    token.cancel();
                }
                () = token.cancelled() => {}
            }
        }));
    }

    /// Signal shutdown, close `connections` to new tasks and wait for the
    /// open ones to finish.
    ///
    /// Returns after every connection task has ended or after `timeout`
    /// ([`DEFAULT_SHUTDOWN_TIMEOUT`] when `None`), whichever comes first.
    /// Connections still open at that point are not aborted.
    pub async fn graceful_shutdown(&self, connections: &TaskTracker, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let _ = connections.close();
        info!(
            open = connections.len(),
            timeout_secs = timeout.as_secs(),
            "draining connections"
        );

        if tokio::time::timeout(timeout, connections.wait()).await.is_err() {
            warn!(
                open = connections.len(),
                "drain timed out, leaving remaining connections detached"
            );
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_running() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn every_token_sees_shutdown() {
        let coord = ShutdownCoordinator::default();
        let accept = coord.token();
        let connection = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(accept.is_cancelled());
        assert!(connection.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_connections_that_close() {
        let coord = ShutdownCoordinator::new();
        let connections = TaskTracker::new();
        let token = coord.token();
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        drop(connections.spawn(async move {
            token.cancelled().await;
            let _ = closed_tx.send(());
        }));

        coord.graceful_shutdown(&connections, None).await;
        assert!(coord.is_shutting_down());
        assert!(connections.is_empty());
        assert!(closed_rx.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_on_stuck_connections() {
        let coord = ShutdownCoordinator::new();
        let connections = TaskTracker::new();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        drop(connections.spawn(async move {
            tokio::time::sleep(Duration::from_secs(300)).await;
            let _ = done_tx.send(());
        }));

        coord
            .graceful_shutdown(&connections, Some(Duration::from_millis(100)))
            .await;
        assert!(coord.is_shutting_down());
        assert_eq!(connections.len(), 1);

        // Not aborted: the stuck task still runs to completion.
        assert!(done_rx.await.is_ok());
    }
}
