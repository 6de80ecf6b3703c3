//! HTTP Upgrade exchange, server-accept and client-initiate.

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use tokio::net::TcpStream;
use tracing::{debug, instrument, warn};

use crate::connection::{ConnectionInfo, WebSocket, WsConfig};
use crate::errors::{HandshakeError, Result};
use crate::frame::MaskPolicy;
use crate::http::{self, RequestHead, Response, ResponseHead};
use crate::transport::{IoTransport, Transport};

/// Magic suffix hashed with the client key.
pub const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Key sent by the client side. The accept check only proves the server
/// speaks the protocol, so a fixed nonce is sufficient.
pub const CLIENT_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// Protocol version advertised and expected.
pub const VERSION: &str = "13";

/// `Sec-WebSocket-Accept` for a given `Sec-WebSocket-Key`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Whether `head` asks for a WebSocket upgrade at all.
pub fn is_upgrade_request(head: &RequestHead) -> bool {
    head.headers.has_token("Connection", "upgrade")
        && head.headers.has_token("Upgrade", "websocket")
}

/// Validate an upgrade request and build the 101 reply.
pub fn accept(head: &RequestHead) -> std::result::Result<Response, HandshakeError> {
    if !head.method.eq_ignore_ascii_case("GET") {
        return Err(HandshakeError::BadMethod(head.method.clone()));
    }
    if !is_upgrade_request(head) {
        return Err(HandshakeError::NotUpgrade);
    }
    let key = head
        .headers
        .get("Sec-WebSocket-Key")
        .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?;
    Ok(Response::new(101)
        .header("Sec-WebSocket-Accept", accept_key(key))
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", VERSION))
}

/// Complete the server side of the upgrade.
///
/// On a malformed request the peer gets a 400 and the transport is shut
/// down; no connection is created. `leftover` holds bytes read past the
/// request head.
#[instrument(skip_all, fields(path = %head.path()))]
pub async fn accept_upgrade(
    mut transport: Box<dyn Transport>,
    head: &RequestHead,
    leftover: Bytes,
    info: ConnectionInfo,
    config: WsConfig,
) -> Result<WebSocket> {
    let response = match accept(head) {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "rejecting upgrade");
            let reply = Response::new(400).to_bytes();
            if let Err(io) = transport.write_all(&reply).await {
                debug!(error = %io, "failed to send 400");
            }
            let _ = transport.shutdown().await;
            return Err(err.into());
        }
    };
    transport
        .write_all(&response.to_bytes())
        .await
        .map_err(HandshakeError::Io)?;
    debug!("upgrade accepted");
    Ok(WebSocket::new(transport, MaskPolicy::SERVER, leftover, config).with_info(info))
}

/// Per-call settings for a client-initiated connection.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request method. Servers only accept `GET`.
    pub method: String,
    /// Request target, e.g. `/` or `/rpc?room=1`.
    pub url: String,
    /// Value of the `Host` header.
    pub host: String,
    /// Basic-auth credentials.
    pub credentials: Option<(String, String)>,
    /// Extra headers, sent in order after the standard ones.
    pub extra_headers: Vec<(String, String)>,
}

impl ClientOptions {
    /// `GET url` against `host`.
    pub fn new(host: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_owned(),
            url: url.into(),
            host: host.into(),
            credentials: None,
            extra_headers: Vec::new(),
        }
    }

    /// Send `Authorization: Basic`.
    #[must_use]
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Append an extra header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Render the upgrade request.
    pub fn build_request(&self) -> String {
        let mut request = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {CLIENT_KEY}\r\nSec-WebSocket-Version: {VERSION}\r\n",
            self.method, self.url, self.host
        );
        if let Some((user, password)) = &self.credentials {
            let token = BASE64.encode(format!("{user}:{password}"));
            let _ = write!(request, "Authorization: Basic {token}\r\n");
        }
        for (name, value) in &self.extra_headers {
            let _ = write!(request, "{name}: {value}\r\n");
        }
        request.push_str("\r\n");
        request
    }
}

/// Run the client side of the upgrade over an established transport.
///
/// Anything other than 101 is fatal. Bytes that follow the response head
/// are handed to the connection as buffered frame data.
#[instrument(skip_all, fields(url = %options.url))]
pub async fn connect(
    mut transport: Box<dyn Transport>,
    options: &ClientOptions,
    config: WsConfig,
) -> Result<WebSocket> {
    transport
        .write_all(options.build_request().as_bytes())
        .await
        .map_err(HandshakeError::Io)?;
    let (head, leftover) = http::read_head(transport.as_mut()).await?;
    let response = ResponseHead::parse(&head)?;
    if response.status != 101 {
        let _ = transport.shutdown().await;
        return Err(HandshakeError::UnexpectedStatus(response.status).into());
    }
    if let Some(accept) = response.headers.get("Sec-WebSocket-Accept") {
        if accept != accept_key(CLIENT_KEY) {
            warn!(accept, "unexpected Sec-WebSocket-Accept");
        }
    }
    debug!(buffered = leftover.len(), "upgrade complete");
    let info = ConnectionInfo {
        path: options.url.clone(),
        user: options.credentials.as_ref().map(|(user, _)| user.clone()),
        peer_addr: transport.peer_addr(),
        encrypted: transport.is_encrypted(),
    };
    Ok(WebSocket::new(transport, MaskPolicy::CLIENT, leftover, config).with_info(info))
}

/// Open a TCP connection to `addr` and upgrade it.
pub async fn connect_tcp(addr: &str, options: &ClientOptions, config: WsConfig) -> Result<WebSocket> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;
    let transport = IoTransport::new(stream).with_peer(peer);
    connect(Box::new(transport), options, config).await
}
