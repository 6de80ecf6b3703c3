//! Server error types.

use std::io;

/// Failures of the accept loop itself. Per-connection failures are logged
/// and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// Listener I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ServerError>;
