//! WebSocket connection state machine.
//!
//! A [`WebSocket`] owns its transport, a receive buffer and the fragment
//! reassembler. It is driven by one task: [`WebSocket::next_message`] reads
//! chunks, decodes frames, answers control frames and returns complete data
//! messages. While waiting for input it also flushes messages queued by
//! other tasks through the [`ConnectionRegistry`] and fires keepalive pings.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::errors::{BoxError, ProtocolError, Result, WsError};
use crate::frame::{self, Frame, MaskPolicy, Message, Opcode, Reassembler};
use crate::registry::{ConnectionHandle, ConnectionRegistry, Outbound};
use crate::transport::Transport;

/// Per-connection limits and timers.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Largest frame or reassembled message accepted, in bytes.
    pub max_message_size: usize,
    /// Interval between keepalive pings. `None` disables them.
    pub ping_interval: Option<Duration>,
    /// Capacity of the queue behind a registered [`ConnectionHandle`].
    pub outbox_capacity: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024,
            ping_interval: None,
            outbox_capacity: 256,
        }
    }
}

/// Lifecycle state. A connection starts `Open` once the handshake is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Frames flow both ways.
    Open,
    /// A close frame was sent; the transport is being shut down.
    Closing,
    /// Terminal. The close callback has fired.
    Closed,
}

/// What the server learned about the peer during the upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Request path of the upgrade.
    pub path: String,
    /// Authenticated user, if Basic auth was enforced.
    pub user: Option<String>,
    /// Remote address.
    pub peer_addr: Option<SocketAddr>,
    /// Whether the transport is TLS-wrapped.
    pub encrypted: bool,
}

enum Wake {
    Data(std::io::Result<Option<Bytes>>),
    Outbound(Option<Outbound>),
    Keepalive,
}

/// An established WebSocket.
pub struct WebSocket {
    id: String,
    info: ConnectionInfo,
    transport: Box<dyn Transport>,
    policy: MaskPolicy,
    config: WsConfig,
    buffer: BytesMut,
    reassembler: Reassembler,
    state: ConnectionState,
    close_sent: bool,
    pong_pending: bool,
    keepalive: Option<Interval>,
    outbox: Option<mpsc::Receiver<Outbound>>,
    registry: Option<Arc<ConnectionRegistry>>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
    finished: bool,
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("state", &self.state)
            .field("pong_pending", &self.pong_pending)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl WebSocket {
    /// Wrap a transport whose handshake has completed.
    ///
    /// `buffered` holds bytes that arrived after the HTTP head; they are
    /// decoded before anything new is read.
    pub fn new(
        transport: Box<dyn Transport>,
        policy: MaskPolicy,
        buffered: Bytes,
        config: WsConfig,
    ) -> Self {
        let keepalive = config.ping_interval.map(|period| {
            let mut timer = tokio::time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        let info = ConnectionInfo {
            peer_addr: transport.peer_addr(),
            encrypted: transport.is_encrypted(),
            ..ConnectionInfo::default()
        };
        counter!("ws_connections_total").increment(1);
        gauge!("ws_connections_active").increment(1.0);
        Self {
            id: Uuid::now_v7().to_string(),
            info,
            transport,
            policy,
            reassembler: Reassembler::new(config.max_message_size),
            config,
            buffer: BytesMut::from(&buffered[..]),
            state: ConnectionState::Open,
            close_sent: false,
            pong_pending: false,
            keepalive,
            outbox: None,
            registry: None,
            on_close: None,
            finished: false,
        }
    }

    /// Attach upgrade details.
    #[must_use]
    pub fn with_info(mut self, info: ConnectionInfo) -> Self {
        self.info = info;
        self
    }

    /// Connection ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Upgrade details.
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection has reached [`ConnectionState::Closed`].
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Whether a ping is waiting for its pong.
    pub fn pong_pending(&self) -> bool {
        self.pong_pending
    }

    /// Join `registry`. Returns the handle other tasks use to reach this
    /// connection. Membership ends when the connection closes.
    pub fn register(&mut self, registry: Arc<ConnectionRegistry>) -> Arc<ConnectionHandle> {
        let (tx, rx) = mpsc::channel(self.config.outbox_capacity.max(1));
        let handle = Arc::new(ConnectionHandle::new(self.id.clone(), tx));
        registry.add(Arc::clone(&handle));
        self.registry = Some(registry);
        self.outbox = Some(rx);
        handle
    }

    /// Run `callback` exactly once when the connection closes.
    pub fn on_close(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.on_close = Some(Box::new(callback));
    }

    /// Send one frame. A no-op once the connection is closing.
    ///
    /// A transport failure closes the connection and is returned. Sending a
    /// close frame shuts the transport down afterwards.
    pub async fn send(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        if self.state != ConnectionState::Open {
            debug!(conn_id = %self.id, ?opcode, "send on closed connection ignored");
            return Ok(());
        }
        if opcode.is_control() && payload.len() as u64 > frame::MAX_CONTROL_PAYLOAD {
            return Err(ProtocolError::ControlTooLong(payload.len() as u64).into());
        }
        let bytes = frame::encode(opcode, payload, self.policy.outgoing_key());
        if let Err(err) = self.transport.write_all(&bytes).await {
            warn!(conn_id = %self.id, ?opcode, error = %err, "send failed, closing");
            self.terminate().await;
            return Err(err.into());
        }
        if opcode == Opcode::Close {
            self.close_sent = true;
            self.state = ConnectionState::Closing;
            self.terminate().await;
        }
        Ok(())
    }

    /// Send a text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(Opcode::Text, text.as_bytes()).await
    }

    /// Send a binary frame.
    pub async fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.send(Opcode::Binary, data).await
    }

    /// Send a ping unless the previous one is still unanswered.
    ///
    /// Returns `false` without sending while a pong is pending.
    pub async fn ping(&mut self, payload: &[u8]) -> Result<bool> {
        if self.state != ConnectionState::Open {
            return Err(WsError::Closed);
        }
        if self.pong_pending {
            return Ok(false);
        }
        self.send(Opcode::Ping, payload).await?;
        self.pong_pending = true;
        Ok(true)
    }

    /// Send a close frame and shut the transport down without waiting for
    /// the peer's acknowledgement.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::Open {
            self.send(Opcode::Close, &[]).await
        } else {
            self.terminate().await;
            Ok(())
        }
    }

    /// Next complete data message.
    ///
    /// Control frames are handled here and never surface. Returns
    /// `Ok(None)` once the connection is closed, and `Err` for a protocol
    /// or transport failure (the connection is closed in both cases).
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            if self.state != ConnectionState::Open {
                return Ok(None);
            }

            match frame::decode(&self.buffer, self.policy.incoming, self.config.max_message_size) {
                Ok(Some((frame, used))) => {
                    let _ = self.buffer.split_to(used);
                    if let Some(message) = self.handle_frame(frame).await? {
                        return Ok(Some(message));
                    }
                    continue;
                }
                Ok(None) => {}
                Err(err) => return Err(self.protocol_failure(err).await),
            }

            match self.wait().await {
                Wake::Data(Ok(Some(chunk))) => self.buffer.extend_from_slice(&chunk),
                Wake::Data(Ok(None)) => {
                    debug!(conn_id = %self.id, "peer disconnected");
                    self.terminate().await;
                    return Ok(None);
                }
                Wake::Data(Err(err)) => {
                    warn!(conn_id = %self.id, error = %err, "read failed, closing");
                    self.terminate().await;
                    return Err(err.into());
                }
                Wake::Outbound(Some(Outbound::Text(text))) => {
                    self.send(Opcode::Text, text.as_bytes()).await?;
                }
                Wake::Outbound(Some(Outbound::Binary(data))) => {
                    self.send(Opcode::Binary, &data).await?;
                }
                Wake::Outbound(None) => self.outbox = None,
                Wake::Keepalive => {
                    if !self.ping(&[]).await? {
                        warn!(conn_id = %self.id, "pong overdue, closing");
                        self.close().await?;
                    }
                }
            }
        }
    }

    async fn wait(&mut self) -> Wake {
        let transport = &mut self.transport;
        let outbox = &mut self.outbox;
        let keepalive = &mut self.keepalive;
        // Queued writes go out first. Input already waiting is read before
        // the keepalive timer so a pong that raced the tick still counts.
        tokio::select! {
            biased;
            message = async {
                match outbox {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => Wake::Outbound(message),
            chunk = transport.read_chunk() => Wake::Data(chunk),
            () = async {
                match keepalive {
                    Some(timer) => {
                        let _ = timer.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => Wake::Keepalive,
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode {
            Opcode::Close => {
                debug!(conn_id = %self.id, "close frame received");
                if !self.close_sent {
                    let code = frame.payload.get(..2).unwrap_or_default();
                    self.send(Opcode::Close, code).await?;
                }
                self.terminate().await;
                Ok(None)
            }
            Opcode::Ping => {
                self.send(Opcode::Pong, &frame.payload).await?;
                Ok(None)
            }
            Opcode::Pong => {
                self.pong_pending = false;
                Ok(None)
            }
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                match self.reassembler.push(frame) {
                    Ok(message) => Ok(message),
                    Err(err) => Err(self.protocol_failure(err).await),
                }
            }
        }
    }

    async fn protocol_failure(&mut self, err: ProtocolError) -> WsError {
        warn!(conn_id = %self.id, error = %err, "protocol error, closing");
        counter!("ws_protocol_errors_total").increment(1);
        self.terminate().await;
        err.into()
    }

    async fn terminate(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.transport.shutdown().await {
            debug!(conn_id = %self.id, error = %err, "transport shutdown failed");
        }
        self.finish();
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.state = ConnectionState::Closed;
        self.outbox = None;
        if let Some(registry) = self.registry.take() {
            let _ = registry.remove(&self.id);
        }
        gauge!("ws_connections_active").decrement(1.0);
        debug!(conn_id = %self.id, "connection closed");
        if let Some(callback) = self.on_close.take() {
            callback();
        }
    }

    /// Deliver every message to `handler` until the connection closes.
    ///
    /// Without a handler, messages are logged and dropped. A handler error
    /// closes the connection and is returned.
    #[instrument(skip_all, fields(conn_id = %self.id))]
    pub async fn run(&mut self, mut handler: Option<&mut dyn MessageHandler>) -> Result<()> {
        if let Some(handler) = handler.as_deref_mut() {
            handler.on_open(self).await.map_err(WsError::Handler)?;
        }
        while let Some(message) = self.next_message().await? {
            let Some(handler) = handler.as_deref_mut() else {
                warn!("message received with no handler, dropping");
                continue;
            };
            if let Err(err) = handler.on_message(self, message).await {
                warn!(error = %err, "message handler failed, closing");
                let _ = self.close().await;
                return Err(WsError::Handler(err));
            }
        }
        Ok(())
    }
}

impl Drop for WebSocket {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Receives the messages of one connection.
#[async_trait]
pub trait MessageHandler: Send {
    /// Called once before the first message.
    async fn on_open(&mut self, _socket: &mut WebSocket) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Called for every complete data message.
    async fn on_message(
        &mut self,
        socket: &mut WebSocket,
        message: Message,
    ) -> std::result::Result<(), BoxError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::IoTransport;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::DuplexStream;

    /// Server-side socket plus the raw client end of the pipe.
    fn server_pair() -> (WebSocket, IoTransport<DuplexStream>) {
        server_pair_with(WsConfig::default())
    }

    fn server_pair_with(config: WsConfig) -> (WebSocket, IoTransport<DuplexStream>) {
        let (a, b) = tokio::io::duplex(1 << 16);
        let socket = WebSocket::new(
            Box::new(IoTransport::new(a)),
            MaskPolicy::SERVER,
            Bytes::new(),
            config,
        );
        (socket, IoTransport::new(b))
    }

    async fn read_frame(peer: &mut IoTransport<DuplexStream>, pending: &mut BytesMut) -> Frame {
        loop {
            if let Some((frame, used)) =
                frame::decode(pending, frame::MaskRequirement::Forbidden, 1 << 20).unwrap()
            {
                let _ = pending.split_to(used);
                return frame;
            }
            let chunk = peer.read_chunk().await.unwrap().expect("peer closed");
            pending.extend_from_slice(&chunk);
        }
    }

    fn masked(opcode: Opcode, payload: &[u8]) -> Bytes {
        frame::encode(opcode, payload, Some([1, 2, 3, 4]))
    }

    #[tokio::test]
    async fn ping_elicits_identical_pong() {
        let (mut socket, mut peer) = server_pair();
        peer.write_all(&masked(Opcode::Ping, b"are you there"))
            .await
            .unwrap();
        peer.write_all(&masked(Opcode::Text, b"after")).await.unwrap();

        let message = socket.next_message().await.unwrap();
        assert_eq!(message, Some(Message::Text("after".into())));

        let mut pending = BytesMut::new();
        let pong = read_frame(&mut peer, &mut pending).await;
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(&pong.payload[..], b"are you there");
    }

    #[tokio::test]
    async fn second_ping_refused_until_pong() {
        let (mut socket, mut peer) = server_pair();
        assert!(socket.ping(b"1").await.unwrap());
        assert!(socket.pong_pending());
        assert!(!socket.ping(b"2").await.unwrap());

        let mut pending = BytesMut::new();
        let ping = read_frame(&mut peer, &mut pending).await;
        assert_eq!(ping.opcode, Opcode::Ping);

        peer.write_all(&masked(Opcode::Pong, b"1")).await.unwrap();
        peer.write_all(&masked(Opcode::Text, b"x")).await.unwrap();
        let _ = socket.next_message().await.unwrap();
        assert!(!socket.pong_pending());
        assert!(socket.ping(b"3").await.unwrap());
    }

    #[tokio::test]
    async fn reserved_bits_close_without_delivery() {
        let (mut socket, mut peer) = server_pair();
        let mut bad = masked(Opcode::Text, b"nope").to_vec();
        bad[0] |= 0x40;
        peer.write_all(&bad).await.unwrap();

        assert_matches!(
            socket.next_message().await,
            Err(WsError::Protocol(ProtocolError::ReservedBits))
        );
        assert!(socket.is_closed());
        assert_matches!(socket.next_message().await, Ok(None));
    }

    #[tokio::test]
    async fn unmasked_client_frame_is_protocol_error() {
        let (mut socket, mut peer) = server_pair();
        peer.write_all(&frame::encode(Opcode::Text, b"hi", None))
            .await
            .unwrap();
        assert_matches!(
            socket.next_message().await,
            Err(WsError::Protocol(ProtocolError::MaskMismatch { masked: false }))
        );
        assert!(socket.is_closed());
    }

    #[tokio::test]
    async fn fragmented_message_with_interleaved_ping() {
        let (mut socket, mut peer) = server_pair();
        let mut first = masked(Opcode::Text, b"hel").to_vec();
        first[0] = 0x01;
        let mut last = masked(Opcode::Text, b"lo").to_vec();
        last[0] = 0x80;
        peer.write_all(&first).await.unwrap();
        peer.write_all(&masked(Opcode::Ping, b"p")).await.unwrap();
        peer.write_all(&last).await.unwrap();

        let message = socket.next_message().await.unwrap();
        assert_eq!(message, Some(Message::Text("hello".into())));

        let mut pending = BytesMut::new();
        assert_eq!(read_frame(&mut peer, &mut pending).await.opcode, Opcode::Pong);
    }

    #[tokio::test]
    async fn buffered_bytes_are_decoded_first() {
        let (a, _b) = tokio::io::duplex(1024);
        let mut socket = WebSocket::new(
            Box::new(IoTransport::new(a)),
            MaskPolicy::SERVER,
            masked(Opcode::Binary, b"early"),
            WsConfig::default(),
        );
        let message = socket.next_message().await.unwrap();
        assert_eq!(message, Some(Message::Binary(Bytes::from_static(b"early"))));
    }

    #[tokio::test]
    async fn close_is_echoed_and_callback_fires_once() {
        let (mut socket, mut peer) = server_pair();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        socket.on_close(move || {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });

        peer.write_all(&masked(Opcode::Close, &[0x03, 0xe8])).await.unwrap();
        assert_matches!(socket.next_message().await, Ok(None));
        assert!(socket.is_closed());

        let mut pending = BytesMut::new();
        let echo = read_frame(&mut peer, &mut pending).await;
        assert_eq!(echo.opcode, Opcode::Close);
        assert_eq!(&echo.payload[..], &[0x03, 0xe8]);

        socket.close().await.unwrap();
        socket.send_text("ignored").await.unwrap();
        drop(socket);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn eof_closes_connection() {
        let (mut socket, mut peer) = server_pair();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        socket.on_close(move || {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });
        peer.shutdown().await.unwrap();
        assert_matches!(socket.next_message().await, Ok(None));
        assert_eq!(socket.state(), ConnectionState::Closed);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_message_closes() {
        let config = WsConfig {
            max_message_size: 8,
            ..WsConfig::default()
        };
        let (mut socket, mut peer) = server_pair_with(config);
        peer.write_all(&masked(Opcode::Binary, &[0; 9])).await.unwrap();
        assert_matches!(
            socket.next_message().await,
            Err(WsError::Protocol(ProtocolError::MessageTooBig { size: 9, limit: 8 }))
        );
    }

    #[tokio::test]
    async fn registered_connection_flushes_outbox() {
        let (mut socket, mut peer) = server_pair();
        let registry = Arc::new(ConnectionRegistry::new());
        let _handle = socket.register(Arc::clone(&registry));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.broadcast_text("news"), 1);
        peer.write_all(&masked(Opcode::Text, b"later")).await.unwrap();

        let mut pending = BytesMut::new();
        let (message, sent) = tokio::join!(socket.next_message(), read_frame(&mut peer, &mut pending));
        assert_eq!(sent.opcode, Opcode::Text);
        assert_eq!(&sent.payload[..], b"news");
        assert_eq!(message.unwrap(), Some(Message::Text("later".into())));

        socket.close().await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_closes_when_pong_overdue() {
        let config = WsConfig {
            ping_interval: Some(Duration::from_secs(5)),
            ..WsConfig::default()
        };
        let (mut socket, mut peer) = server_pair_with(config);
        let result = socket.next_message().await;
        assert_matches!(result, Ok(None));
        assert!(socket.is_closed());

        let mut pending = BytesMut::new();
        assert_eq!(read_frame(&mut peer, &mut pending).await.opcode, Opcode::Ping);
        assert_eq!(read_frame(&mut peer, &mut pending).await.opcode, Opcode::Close);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_waiting_at_tick_keeps_connection_open() {
        let config = WsConfig {
            ping_interval: Some(Duration::from_secs(5)),
            ..WsConfig::default()
        };
        let (mut socket, mut peer) = server_pair_with(config);
        assert!(socket.ping(b"").await.unwrap());

        peer.write_all(&masked(Opcode::Pong, b"")).await.unwrap();
        peer.write_all(&masked(Opcode::Text, b"still here")).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        let message = socket.next_message().await.unwrap();
        assert_eq!(message, Some(Message::Text("still here".into())));
        assert!(!socket.pong_pending());
        assert!(!socket.is_closed());
    }

    /// Transport whose writes always fail.
    struct BrokenPipe;

    #[async_trait]
    impl Transport for BrokenPipe {
        async fn read_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
            std::future::pending().await
        }

        async fn write_all(&mut self, _bytes: &[u8]) -> std::io::Result<()> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }

        async fn shutdown(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_write_closes_and_reports() {
        let mut socket = WebSocket::new(
            Box::new(BrokenPipe),
            MaskPolicy::SERVER,
            Bytes::new(),
            WsConfig::default(),
        );
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        socket.on_close(move || {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_matches!(socket.send_text("lost").await, Err(WsError::Io(_)));
        assert!(socket.is_closed());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        socket.send_text("after close").await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    struct Echo;

    #[async_trait]
    impl MessageHandler for Echo {
        async fn on_message(
            &mut self,
            socket: &mut WebSocket,
            message: Message,
        ) -> std::result::Result<(), BoxError> {
            if let Message::Text(text) = message {
                socket.send_text(&text).await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_delivers_to_handler() {
        let (mut socket, mut peer) = server_pair();
        peer.write_all(&masked(Opcode::Text, b"echo me")).await.unwrap();
        let mut pending = BytesMut::new();
        let mut echo = Echo;
        let server = socket.run(Some(&mut echo));
        let client = async {
            let frame = read_frame(&mut peer, &mut pending).await;
            peer.shutdown().await.unwrap();
            frame
        };
        let (result, frame) = tokio::join!(server, client);
        result.unwrap();
        assert_eq!(&frame.payload[..], b"echo me");
    }
}
