//! Registry of live server connections, used for fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A message queued for delivery by the owning connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Sent as a text frame.
    Text(Arc<str>),
    /// Sent as a binary frame.
    Binary(Bytes),
}

/// Shareable handle to a live connection.
///
/// Messages sent through the handle are queued on a bounded channel and
/// written by the connection's own task the next time it waits for input.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Connection ID.
    pub id: String,
    tx: mpsc::Sender<Outbound>,
    /// When the connection was registered.
    pub connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl ConnectionHandle {
    /// Create a handle feeding `tx`.
    pub fn new(id: String, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            tx,
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a message.
    ///
    /// Returns `false` if the queue is full or the connection is gone; the
    /// message is then counted as dropped.
    pub fn send(&self, message: Outbound) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Set of open connections keyed by ID.
///
/// Inserts and removes happen only on open/close transitions. Iteration
/// always works on a snapshot, so a close triggered mid-broadcast never
/// contends with the loop.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection.
    pub fn add(&self, handle: Arc<ConnectionHandle>) {
        let _ = self.connections.write().insert(handle.id.clone(), handle);
    }

    /// Remove a connection by ID.
    pub fn remove(&self, id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.write().remove(id)
    }

    /// Look up a connection by ID.
    pub fn get(&self, id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().get(id).cloned()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Copy of the current handles.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.read().values().cloned().collect()
    }

    /// Queue `message` on every connection. Returns how many accepted it.
    pub fn broadcast(&self, message: &Outbound) -> usize {
        let handles = self.snapshot();
        let recipients = handles.len();
        let mut delivered = 0;
        for handle in handles {
            if handle.send(message.clone()) {
                delivered += 1;
            } else {
                warn!(conn_id = %handle.id, dropped = handle.drop_count(), "failed to queue broadcast");
            }
        }
        debug!(recipients, delivered, "broadcast");
        delivered
    }

    /// Queue a text message on every connection.
    pub fn broadcast_text(&self, text: &str) -> usize {
        self.broadcast(&Outbound::Text(Arc::from(text)))
    }
}
