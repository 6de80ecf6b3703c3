//! RPC error codes and error type.

use wshttpd_ws::{BoxError, WsError};

use crate::envelope::EnvelopeError;

// ── Error code constants ────────────────────────────────────────────

/// Incoming frame is not a valid envelope.
pub const INVALID_ENVELOPE: &str = "INVALID_ENVELOPE";
/// Method not found in the registry.
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
/// Method name may not be invoked remotely.
pub const INVALID_METHOD_NAME: &str = "INVALID_METHOD_NAME";
/// Invalid or missing arguments.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Handler reported a failure.
pub const APPLICATION_ERROR: &str = "APPLICATION_ERROR";
/// Peer answered a call with an `error` envelope.
pub const REMOTE_ERROR: &str = "REMOTE_ERROR";
/// Connection closed while a call was waiting.
pub const DISCONNECTED: &str = "DISCONNECTED";
/// A call is already waiting for its reply.
pub const CALL_IN_PROGRESS: &str = "CALL_IN_PROGRESS";
/// An event handler failed.
pub const EVENT_FAILED: &str = "EVENT_FAILED";
/// WebSocket-level failure.
pub const TRANSPORT_ERROR: &str = "TRANSPORT_ERROR";

/// RPC error type, returned by handlers and by the peer.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Incoming frame could not be decoded.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[from] EnvelopeError),

    /// No handler is registered under this name.
    #[error("method '{method}' not found")]
    MethodNotFound {
        /// Requested name.
        method: String,
    },

    /// Names starting with `_` are never sent.
    #[error("invalid RPC method name '{method}'")]
    InvalidMethodName {
        /// Offending name.
        method: String,
    },

    /// Required argument missing or wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// Handler failure, optionally with its structured cause.
    #[error("{message}")]
    Application {
        /// Human-readable message; this is what the peer sees.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<BoxError>,
    },

    /// The peer answered with an `error` envelope.
    #[error("remote error: {message}")]
    Remote {
        /// Message carried by the envelope.
        message: String,
    },

    /// The connection ended before the reply arrived.
    #[error("connection closed while waiting for reply to '{method}'")]
    Disconnected {
        /// Method of the abandoned call.
        method: String,
    },

    /// Only one call per peer may wait for a reply.
    #[error("cannot call '{method}' while '{pending}' is awaiting its reply")]
    CallInProgress {
        /// Method that was refused.
        method: String,
        /// Method whose reply is outstanding.
        pending: String,
    },

    /// An event handler failed. Events have no reply channel, so this
    /// surfaces to whoever drives the peer.
    #[error("event handler '{method}' failed: {source}")]
    EventFailed {
        /// Event method.
        method: String,
        /// Handler error.
        #[source]
        source: Box<RpcError>,
    },

    /// WebSocket failure.
    #[error(transparent)]
    Transport(#[from] WsError),
}

impl RpcError {
    /// Handler failure with a plain message.
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
            source: None,
        }
    }

    /// Handler failure wrapping an underlying error.
    pub fn from_source(source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self::Application {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidEnvelope(_) => INVALID_ENVELOPE,
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND,
            Self::InvalidMethodName { .. } => INVALID_METHOD_NAME,
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::Application { .. } => APPLICATION_ERROR,
            Self::Remote { .. } => REMOTE_ERROR,
            Self::Disconnected { .. } => DISCONNECTED,
            Self::CallInProgress { .. } => CALL_IN_PROGRESS,
            Self::EventFailed { .. } => EVENT_FAILED,
            Self::Transport(_) => TRANSPORT_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn method_not_found_message() {
        let err = RpcError::MethodNotFound {
            method: "missing".into(),
        };
        assert_eq!(err.code(), METHOD_NOT_FOUND);
        assert_eq!(err.to_string(), "method 'missing' not found");
    }

    #[test]
    fn application_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = RpcError::from_source(io);
        assert_eq!(err.code(), APPLICATION_ERROR);
        assert_eq!(err.to_string(), "no such file");
        assert!(err.source().is_some());

        let plain = RpcError::application("bad input");
        assert!(plain.source().is_none());
    }

    #[test]
    fn event_failed_chains() {
        let err = RpcError::EventFailed {
            method: "tick".into(),
            source: Box::new(RpcError::application("boom")),
        };
        assert_eq!(err.code(), EVENT_FAILED);
        assert_eq!(err.to_string(), "event handler 'tick' failed: boom");
        assert_eq!(err.source().map(ToString::to_string).as_deref(), Some("boom"));
    }

    #[test]
    fn transport_is_transparent() {
        let err: RpcError = WsError::Closed.into();
        assert_eq!(err.code(), TRANSPORT_ERROR);
        assert_eq!(err.to_string(), "connection closed");
    }

    #[test]
    fn envelope_error_converts() {
        let err: RpcError = EnvelopeError::NotAPair.into();
        assert_eq!(err.code(), INVALID_ENVELOPE);
    }
}
