//! WebSocket error types.

use thiserror::Error;

/// A violation of the framing rules. Always fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// One of RSV1..RSV3 was set; no extensions are negotiated.
    #[error("reserved bits set in frame header")]
    ReservedBits,
    /// The mask flag did not match what the connection requires.
    #[error("frame mask flag is {masked}, which the connection does not accept")]
    MaskMismatch {
        /// Whether the offending frame was masked.
        masked: bool,
    },
    /// Opcode 3-7 or 11-15.
    #[error("unsupported opcode {0:#x}")]
    UnsupportedOpcode(u8),
    /// A continuation frame arrived with no fragmented message in progress.
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,
    /// A new text/binary frame arrived before the previous message finished.
    #[error("new data frame while a fragmented message is in progress")]
    InterleavedMessage,
    /// Close, ping and pong must not be fragmented.
    #[error("fragmented control frame")]
    FragmentedControl,
    /// Control frame payloads are limited to 125 bytes.
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlTooLong(u64),
    /// Frame or reassembled message exceeds the configured size limit.
    #[error("message of {size} bytes exceeds limit of {limit}")]
    MessageTooBig {
        /// Size announced or accumulated so far.
        size: u64,
        /// Configured limit.
        limit: usize,
    },
}

/// Failure to establish a WebSocket over HTTP.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Upgrade requests must use GET.
    #[error("upgrade request uses method {0}, expected GET")]
    BadMethod(String),
    /// `Connection: Upgrade` / `Upgrade: websocket` missing.
    #[error("request is not a websocket upgrade")]
    NotUpgrade,
    /// A required header was absent.
    #[error("missing header {0}")]
    MissingHeader(&'static str),
    /// The request line could not be parsed.
    #[error("malformed request line: {0:?}")]
    MalformedRequest(String),
    /// The status line could not be parsed.
    #[error("malformed status line: {0:?}")]
    MalformedStatus(String),
    /// A header line had no colon.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    /// The server answered with something other than 101.
    #[error("server replied with status {0}, expected 101")]
    UnexpectedStatus(u16),
    /// The header block grew past the limit without a terminating blank line.
    #[error("header block exceeds {0} bytes")]
    HeadTooLarge(usize),
    /// The peer closed the stream before the header block was complete.
    #[error("EOF while reading header block")]
    UnexpectedEof,
    /// Transport failure during the exchange.
    #[error("I/O error during handshake: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error for WebSocket operations.
#[derive(Debug, Error)]
pub enum WsError {
    /// Framing violation; the connection has been closed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Handshake failed; no connection was established.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    /// Transport failure; the connection has been closed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
    /// A message handler failed; the connection has been closed.
    #[error("message handler failed: {0}")]
    Handler(#[source] BoxError),
}

/// Boxed error returned by application callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for WebSocket operations.
pub type Result<T> = std::result::Result<T, WsError>;
