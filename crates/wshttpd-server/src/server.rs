//! `WsServer` accepts TCP connections, answers plain HTTP requests and
//! hands upgraded sockets to an RPC registry or a message handler.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};
use wshttpd_rpc::{MethodRegistry, RpcPeer};
use wshttpd_ws::http::{self, RequestHead, Response};
use wshttpd_ws::{
    ConnectionInfo, ConnectionRegistry, HandshakeError, IoTransport, MessageHandler, Transport,
    WebSocket, handshake,
};

use crate::auth::{self, Authenticator, StaticUsers};
use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::pages::{PageHandler, PageRequest, StaticPages};
use crate::shutdown::ShutdownCoordinator;

/// Pause after a failed `accept` so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Creates the message handler for each accepted WebSocket.
pub trait SocketService: Send + Sync {
    /// Handler for the connection described by `info`.
    fn handler(&self, info: &ConnectionInfo) -> Box<dyn MessageHandler>;
}

impl<F> SocketService for F
where
    F: Fn(&ConnectionInfo) -> Box<dyn MessageHandler> + Send + Sync,
{
    fn handler(&self, info: &ConnectionInfo) -> Box<dyn MessageHandler> {
        self(info)
    }
}

/// What runs on an upgraded connection.
#[derive(Clone)]
pub enum Service {
    /// JSON RPC peer serving these methods.
    Rpc(Arc<MethodRegistry>),
    /// Raw messages delivered to a per-connection handler.
    Socket(Arc<dyn SocketService>),
}

/// The HTTP + WebSocket server.
pub struct WsServer {
    config: ServerConfig,
    service: Service,
    pages: Arc<dyn PageHandler>,
    authenticator: Arc<dyn Authenticator>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    active: Arc<AtomicUsize>,
    tasks: TaskTracker,
}

impl WsServer {
    /// Create a server. Static pages come from `config.http_dirs` and
    /// credentials from `config.auth_users` unless replaced.
    pub fn new(config: ServerConfig, service: Service) -> Self {
        let pages = Arc::new(StaticPages::new(config.http_dirs.clone()));
        let authenticator = Arc::new(StaticUsers::new(config.auth_users.clone()));
        Self {
            config,
            service,
            pages,
            authenticator,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            active: Arc::new(AtomicUsize::new(0)),
            tasks: TaskTracker::new(),
        }
    }

    /// Create a server whose sockets speak JSON RPC.
    pub fn rpc(config: ServerConfig, methods: MethodRegistry) -> Self {
        Self::new(config, Service::Rpc(Arc::new(methods)))
    }

    /// Replace the plain-HTTP handler.
    #[must_use]
    pub fn with_pages(mut self, pages: impl PageHandler + 'static) -> Self {
        self.pages = Arc::new(pages);
        self
    }

    /// Replace the credential check used when `auth_message` is set.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// Track connections in an existing registry, e.g. one a method
    /// handler already broadcasts through.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Open WebSocket connections, for broadcasting.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Connections currently being served, upgraded or not.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Bind the configured address and serve in a background task.
    ///
    /// Returns the bound address and the accept-loop handle, which finishes
    /// once shutdown is requested and open connections have wound down.
    pub async fn listen(self: &Arc<Self>) -> Result<(SocketAddr, JoinHandle<()>)> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local = listener.local_addr()?;
        info!(addr = %local, "listening");
        let server = Arc::clone(self);
        let handle = tokio::spawn(async move { server.serve(listener).await });
        Ok((local, handle))
    }

    /// Accept connections from `listener` until shutdown.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        let token = self.shutdown.token();
        loop {
            let (stream, peer) = tokio::select! {
                () = token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            let Some(slot) = ConnectionSlot::acquire(&self.active, self.config.max_connections)
            else {
                warn!(%peer, limit = self.config.max_connections, "connection limit reached");
                drop(self.tasks.spawn(reject_busy(stream)));
                continue;
            };

            let server = Arc::clone(&self);
            drop(self.tasks.spawn(async move {
                let _slot = slot;
                server.handle_connection(stream, peer).await;
            }));
        }

        drop(listener);
        self.shutdown.graceful_shutdown(&self.tasks, None).await;
        info!("server stopped");
    }

    #[instrument(skip_all, fields(peer = %peer))]
    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "set_nodelay failed");
        }
        let mut transport: Box<dyn Transport> = Box::new(IoTransport::new(stream).with_peer(peer));
        let token = self.shutdown.token();

        let read = tokio::select! {
            read = http::read_head(transport.as_mut()) => read,
            () = token.cancelled() => return,
        };
        let (raw, leftover) = match read {
            Ok(read) => read,
            Err(HandshakeError::UnexpectedEof) => {
                debug!("peer closed before sending a request");
                return;
            }
            Err(err) => {
                debug!(error = %err, "unreadable request head");
                reply(transport.as_mut(), &Response::new(400)).await;
                return;
            }
        };
        let head = match RequestHead::parse(&raw) {
            Ok(head) => head,
            Err(err) => {
                debug!(error = %err, "malformed request");
                reply(transport.as_mut(), &Response::new(400)).await;
                return;
            }
        };
        debug!(method = %head.method, path = %head.path(), "request");

        let user = match self.authenticate(&head) {
            Ok(user) => user,
            Err(response) => {
                reply(transport.as_mut(), &response).await;
                return;
            }
        };

        if !handshake::is_upgrade_request(&head) {
            self.serve_page(transport, &head, leftover, user).await;
            return;
        }

        let info = ConnectionInfo {
            path: head.path().to_string(),
            user,
            peer_addr: Some(peer),
            encrypted: transport.is_encrypted(),
        };
        match handshake::accept_upgrade(transport, &head, leftover, info, self.config.ws_config())
            .await
        {
            Ok(socket) => self.run_socket(socket, &token).await,
            Err(err) => debug!(error = %err, "upgrade failed"),
        }
    }

    fn authenticate(&self, head: &RequestHead) -> std::result::Result<Option<String>, Response> {
        match &self.config.auth_message {
            None => Ok(None),
            Some(realm) => auth::check(head, realm, self.authenticator.as_ref()).map(Some),
        }
    }

    async fn serve_page(
        &self,
        mut transport: Box<dyn Transport>,
        head: &RequestHead,
        body: Bytes,
        user: Option<String>,
    ) {
        let request = PageRequest {
            head,
            body,
            encrypted: transport.is_encrypted(),
            user,
        };
        let response = match self.pages.page(&request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, path = %head.path(), "page handler failed");
                Response::new(500)
            }
        };
        reply(transport.as_mut(), &response).await;
    }

    async fn run_socket(&self, mut socket: WebSocket, token: &CancellationToken) {
        let _handle = socket.register(Arc::clone(&self.registry));
        let conn_id = socket.id().to_string();
        info!(conn_id = %conn_id, path = %socket.info().path, user = ?socket.info().user, "websocket open");

        match &self.service {
            Service::Rpc(methods) => {
                let mut peer = RpcPeer::new(socket, Arc::clone(methods));
                let outcome = tokio::select! {
                    result = peer.run() => Some(result),
                    () = token.cancelled() => None,
                };
                if let Some(Err(err)) = outcome {
                    warn!(conn_id = %conn_id, error = %err, "closing rpc connection");
                }
                let _ = peer.socket_mut().close().await;
            }
            Service::Socket(service) => {
                let mut handler = service.handler(socket.info());
                let outcome = tokio::select! {
                    result = socket.run(Some(handler.as_mut())) => Some(result),
                    () = token.cancelled() => None,
                };
                if let Some(Err(err)) = outcome {
                    warn!(conn_id = %conn_id, error = %err, "closing connection");
                }
                let _ = socket.close().await;
            }
        }
        info!(conn_id = %conn_id, "websocket closed");
    }
}

/// Counts a connection against `max_connections` while held.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        let _ = active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?;
        Some(Self(Arc::clone(active)))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn reject_busy(stream: TcpStream) {
    let mut transport = IoTransport::new(stream);
    reply(&mut transport, &Response::new(503)).await;
}

/// Send a plain HTTP reply and close the stream.
async fn reply(transport: &mut dyn Transport, response: &Response) {
    counter!("http_responses_total", "status" => response.status.to_string()).increment(1);
    if let Err(err) = transport.write_all(&response.to_bytes()).await {
        debug!(error = %err, status = response.status, "failed to send reply");
    }
    let _ = transport.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> WsServer {
        WsServer::rpc(ServerConfig::default(), MethodRegistry::new())
    }

    #[test]
    fn new_server_is_idle() {
        let server = server();
        assert_eq!(server.active_connections(), 0);
        assert!(server.registry().is_empty());
        assert!(!server.shutdown().is_shutting_down());
        assert_eq!(server.config().port, 0);
    }

    #[test]
    fn slots_respect_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let first = ConnectionSlot::acquire(&active, 2).unwrap();
        let second = ConnectionSlot::acquire(&active, 2).unwrap();
        assert!(ConnectionSlot::acquire(&active, 2).is_none());
        drop(first);
        assert_eq!(active.load(Ordering::Acquire), 1);
        let _third = ConnectionSlot::acquire(&active, 2).unwrap();
        drop(second);
        assert_eq!(active.load(Ordering::Acquire), 1);
    }

    #[test]
    fn authentication_off_by_default() {
        let head = RequestHead::parse("GET / HTTP/1.1\r\n").unwrap();
        assert_eq!(server().authenticate(&head), Ok(None));
    }

    #[test]
    fn authentication_uses_configured_users() {
        let mut config = ServerConfig {
            auth_message: Some("private".into()),
            ..ServerConfig::default()
        };
        let _ = config.auth_users.insert("ann".into(), "pw".into());
        let server = WsServer::rpc(config, MethodRegistry::new());

        let head = RequestHead::parse("GET / HTTP/1.1\r\n").unwrap();
        assert_eq!(server.authenticate(&head).unwrap_err().status, 401);

        let head =
            RequestHead::parse("GET / HTTP/1.1\r\nAuthorization: Basic YW5uOnB3\r\n").unwrap();
        assert_eq!(server.authenticate(&head), Ok(Some("ann".to_string())));
    }

    #[test]
    fn custom_authenticator_replaces_users() {
        let config = ServerConfig {
            auth_message: Some("private".into()),
            ..ServerConfig::default()
        };
        let server = WsServer::rpc(config, MethodRegistry::new())
            .with_authenticator(|user: &str, _: &str| user == "ann");
        let head =
            RequestHead::parse("GET / HTTP/1.1\r\nAuthorization: Basic YW5uOnd4\r\n").unwrap();
        assert_eq!(server.authenticate(&head), Ok(Some("ann".to_string())));
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port() {
        let server = Arc::new(server());
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn bind_failure_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            port: taken.local_addr().unwrap().port(),
            ..ServerConfig::default()
        };
        let server = Arc::new(WsServer::rpc(config, MethodRegistry::new()));
        assert!(matches!(server.listen().await, Err(ServerError::Bind { .. })));
    }
}
