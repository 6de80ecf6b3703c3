//! One end of an RPC conversation over a [`WebSocket`].
//!
//! Incoming `call` and `event` envelopes are dispatched to a
//! [`MethodRegistry`]. Outgoing calls are synchronous from the caller's
//! point of view: [`RpcPeer::call`] sends the request and then reads the
//! connection itself until the reply arrives, serving any calls or events
//! the remote side sends in the meantime. Only one call may wait at a time;
//! a handler that tries to issue another while one is pending gets
//! [`RpcError::CallInProgress`].
//!
//! Dropping a [`RpcPeer::call`] future (for example under a timeout) frees
//! the slot. The remote side still owes a reply to that request; it is
//! dropped when it arrives instead of being taken as the answer to a later
//! call.

use std::sync::{Arc, Weak};

use metrics::counter;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use wshttpd_ws::{ClientOptions, ConnectionRegistry, Message, WebSocket, WsConfig};

use crate::envelope::{Envelope, EnvelopeError, EnvelopeKind, Invocation};
use crate::errors::RpcError;
use crate::registry::{Args, MethodRegistry};

/// RPC endpoint bound to one connection.
#[derive(Debug)]
pub struct RpcPeer {
    socket: WebSocket,
    methods: Arc<MethodRegistry>,
    pending: Option<PendingCall>,
    stale_replies: usize,
}

/// Outstanding call. `live` dies with the future that issued it.
#[derive(Debug)]
struct PendingCall {
    method: String,
    live: Weak<()>,
}

impl PendingCall {
    fn is_live(&self) -> bool {
        self.live.strong_count() > 0
    }
}

impl RpcPeer {
    /// Serve `methods` on `socket`.
    pub fn new(socket: WebSocket, methods: Arc<MethodRegistry>) -> Self {
        Self {
            socket,
            methods,
            pending: None,
            stale_replies: 0,
        }
    }

    /// Open a client connection to `addr` and wrap it.
    pub async fn connect(
        addr: &str,
        options: &ClientOptions,
        config: WsConfig,
        methods: Arc<MethodRegistry>,
    ) -> Result<Self, RpcError> {
        let socket = wshttpd_ws::connect_tcp(addr, options, config).await?;
        Ok(Self::new(socket, methods))
    }

    /// Underlying connection.
    pub fn socket(&self) -> &WebSocket {
        &self.socket
    }

    /// Underlying connection, mutably.
    pub fn socket_mut(&mut self) -> &mut WebSocket {
        &mut self.socket
    }

    /// Methods this peer serves.
    pub fn methods(&self) -> &Arc<MethodRegistry> {
        &self.methods
    }

    /// Method whose reply is outstanding, if any.
    pub fn pending_call(&self) -> Option<&str> {
        self.pending
            .as_ref()
            .filter(|pending| pending.is_live())
            .map(|pending| pending.method.as_str())
    }

    /// Call `method` on the remote side and wait for its result.
    ///
    /// Calls and events from the remote side that arrive before the reply
    /// are dispatched inline. An `error` reply becomes
    /// [`RpcError::Remote`]; losing the connection becomes
    /// [`RpcError::Disconnected`]. A transport failure while sending closes
    /// the connection and is returned as [`RpcError::Transport`].
    ///
    /// Cancel-safe with respect to the peer: dropping the future releases
    /// the pending slot.
    #[instrument(skip(self, args, kwargs), fields(conn_id = %self.socket.id()))]
    pub async fn call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, RpcError> {
        check_method_name(method)?;
        self.reap_abandoned();
        if let Some(pending) = &self.pending {
            return Err(RpcError::CallInProgress {
                method: method.to_owned(),
                pending: pending.method.clone(),
            });
        }
        self.send_envelope(&Envelope::Call(Invocation::new(method, args, kwargs)))
            .await?;
        let live = Arc::new(());
        self.pending = Some(PendingCall {
            method: method.to_owned(),
            live: Arc::downgrade(&live),
        });
        let result = self.await_reply(method).await;
        self.pending = None;
        drop(live);
        result
    }

    /// Send an event to the remote side. Does not wait.
    pub async fn event(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<(), RpcError> {
        check_method_name(method)?;
        self.send_envelope(&Envelope::Event(Invocation::new(method, args, kwargs)))
            .await
    }

    /// Serialize and send one envelope as a text frame.
    pub async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), RpcError> {
        self.socket.send_text(&envelope.to_json()).await?;
        Ok(())
    }

    /// Serve incoming messages until the connection closes.
    ///
    /// Returns `Err` on a transport failure or when an event handler fails.
    #[instrument(skip(self), fields(conn_id = %self.socket.id()))]
    pub async fn run(&mut self) -> Result<(), RpcError> {
        while let Some(message) = self.socket.next_message().await? {
            self.handle_message(message).await?;
        }
        debug!("peer finished");
        Ok(())
    }

    /// Process one complete WebSocket message.
    pub async fn handle_message(&mut self, message: Message) -> Result<(), RpcError> {
        let Some(text) = message.into_text() else {
            warn!("non-UTF-8 binary message dropped");
            return Ok(());
        };
        match Envelope::parse(&text) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(err) => self.reject(err).await,
        }
    }

    /// Forget a call whose future was dropped; its reply is still owed.
    fn reap_abandoned(&mut self) {
        if self.pending.as_ref().is_some_and(|pending| !pending.is_live()) {
            if let Some(pending) = self.pending.take() {
                debug!(method = %pending.method, "call abandoned before its reply");
            }
            self.stale_replies += 1;
        }
    }

    /// Whether a reply belongs to an abandoned call and should be dropped.
    fn take_stale_reply(&mut self) -> bool {
        if self.stale_replies == 0 {
            return false;
        }
        self.stale_replies -= 1;
        debug!("late reply to an abandoned call dropped");
        true
    }

    async fn await_reply(&mut self, method: &str) -> Result<Value, RpcError> {
        loop {
            let Some(message) = self.socket.next_message().await? else {
                warn!(method, "connection closed while awaiting reply");
                return Err(RpcError::Disconnected {
                    method: method.to_owned(),
                });
            };
            let Some(text) = message.into_text() else {
                warn!("non-UTF-8 binary message dropped");
                continue;
            };
            match Envelope::parse(&text) {
                Ok(Envelope::Return(_) | Envelope::Error(_)) if self.take_stale_reply() => {}
                Ok(Envelope::Return(value)) => return Ok(value),
                Ok(Envelope::Error(message)) => return Err(RpcError::Remote { message }),
                Ok(envelope) => self.dispatch(envelope).await?,
                Err(err) => self.reject(err).await?,
            }
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) -> Result<(), RpcError> {
        match envelope {
            Envelope::Call(invocation) => self.serve_call(invocation).await,
            Envelope::Event(invocation) => self.serve_event(invocation).await,
            Envelope::Return(_) | Envelope::Error(_) => {
                self.reap_abandoned();
                if !self.take_stale_reply() {
                    warn!(kind = %envelope.kind(), "reply without a pending call dropped");
                }
                Ok(())
            }
        }
    }

    async fn serve_call(&mut self, invocation: Invocation) -> Result<(), RpcError> {
        let method = invocation.method.clone();
        counter!("rpc_requests_total", "method" => method.clone(), "kind" => "call").increment(1);
        let reply = match self.invoke(invocation).await {
            Ok(value) => Envelope::Return(value),
            Err(err) => {
                counter!("rpc_errors_total", "method" => method.clone(), "error_type" => err.code()).increment(1);
                warn!(method, error = %err, "call failed");
                Envelope::Error(err.to_string())
            }
        };
        self.send_envelope(&reply).await
    }

    async fn serve_event(&mut self, invocation: Invocation) -> Result<(), RpcError> {
        let method = invocation.method.clone();
        counter!("rpc_requests_total", "method" => method.clone(), "kind" => "event").increment(1);
        match self.invoke(invocation).await {
            Ok(_) => Ok(()),
            Err(err @ RpcError::MethodNotFound { .. }) => {
                warn!(method, error = %err, "event dropped");
                Ok(())
            }
            Err(err) => {
                counter!("rpc_errors_total", "method" => method.clone(), "error_type" => err.code()).increment(1);
                Err(RpcError::EventFailed {
                    method,
                    source: Box::new(err),
                })
            }
        }
    }

    async fn invoke(&mut self, invocation: Invocation) -> Result<Value, RpcError> {
        let handler = if invocation.method.starts_with('_') {
            None
        } else {
            self.methods.get(&invocation.method)
        };
        let Some(handler) = handler else {
            return Err(RpcError::MethodNotFound {
                method: invocation.method,
            });
        };
        handler
            .handle(Args::new(invocation.args, invocation.kwargs), self)
            .await
    }

    async fn reject(&mut self, err: EnvelopeError) -> Result<(), RpcError> {
        counter!("rpc_errors_total", "method" => "", "error_type" => crate::errors::INVALID_ENVELOPE)
            .increment(1);
        warn!(error = %err, "invalid envelope");
        if let EnvelopeError::BadInvocation {
            kind: EnvelopeKind::Call,
            ..
        } = err
        {
            let reply = Envelope::Error(RpcError::InvalidEnvelope(err).to_string());
            return self.send_envelope(&reply).await;
        }
        Ok(())
    }
}

/// Send an event to every connection in `registry`.
///
/// Delivery goes through each connection's outbound queue; returns how many
/// accepted it.
pub fn broadcast_event(
    registry: &ConnectionRegistry,
    method: &str,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
) -> Result<usize, RpcError> {
    check_method_name(method)?;
    let envelope = Envelope::Event(Invocation::new(method, args, kwargs));
    Ok(registry.broadcast_text(&envelope.to_json()))
}

fn check_method_name(method: &str) -> Result<(), RpcError> {
    if method.starts_with('_') {
        return Err(RpcError::InvalidMethodName {
            method: method.to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wshttpd_ws::{IoTransport, MaskPolicy, Transport};

    use crate::registry::MethodHandler;

    fn socket_pair() -> (WebSocket, WebSocket) {
        let (a, b) = tokio::io::duplex(1 << 16);
        let server = WebSocket::new(
            Box::new(IoTransport::new(a)),
            MaskPolicy::SERVER,
            Bytes::new(),
            WsConfig::default(),
        );
        let client = WebSocket::new(
            Box::new(IoTransport::new(b)),
            MaskPolicy::CLIENT,
            Bytes::new(),
            WsConfig::default(),
        );
        (server, client)
    }

    fn calculator() -> MethodRegistry {
        let mut methods = MethodRegistry::new();
        methods.register_fn("add", |args| {
            let a: i64 = args.require(0, "a")?;
            let b: i64 = args.require(1, "b")?;
            Ok(json!(a + b))
        });
        methods.register_fn("fail", |_| Err(RpcError::application("nope")));
        methods
    }

    async fn next_envelope(socket: &mut WebSocket) -> Envelope {
        let message = socket.next_message().await.unwrap().expect("closed");
        Envelope::parse(&message.into_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn call_returns_result() {
        let (server, client) = socket_pair();
        let mut server = RpcPeer::new(server, Arc::new(calculator()));
        let mut client = RpcPeer::new(client, Arc::new(MethodRegistry::new()));
        let serving = tokio::spawn(async move { server.run().await });

        let sum = client.call("add", vec![json!(2), json!(3)], Map::new()).await.unwrap();
        assert_eq!(sum, json!(5));

        let mut named = Map::new();
        let _ = named.insert("b".into(), json!(10));
        let sum = client.call("add", vec![json!(1)], named).await.unwrap();
        assert_eq!(sum, json!(11));

        drop(client);
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failures_come_back_as_error_envelopes() {
        let (server, client) = socket_pair();
        let mut server = RpcPeer::new(server, Arc::new(calculator()));
        let mut client = RpcPeer::new(client, Arc::new(MethodRegistry::new()));
        let _serving = tokio::spawn(async move { server.run().await });

        assert_matches!(
            client.call("missing", vec![], Map::new()).await,
            Err(RpcError::Remote { message }) if message == "method 'missing' not found"
        );
        assert_matches!(
            client.call("fail", vec![], Map::new()).await,
            Err(RpcError::Remote { message }) if message == "nope"
        );
        assert_matches!(
            client.call("add", vec![json!("x")], Map::new()).await,
            Err(RpcError::Remote { message }) if message.contains("invalid argument 'a'")
        );
        // The connection survives all of the above.
        assert_eq!(
            client.call("add", vec![json!(1), json!(1)], Map::new()).await.unwrap(),
            json!(2)
        );
    }

    #[tokio::test]
    async fn malformed_frames_are_rejected_without_closing() {
        let (server, mut raw) = socket_pair();
        let mut server = RpcPeer::new(server, Arc::new(calculator()));
        let _serving = tokio::spawn(async move { server.run().await });

        raw.send_text("not json at all").await.unwrap();
        raw.send_text(r#"["return", 1]"#).await.unwrap();
        raw.send_text(r#"["call", [5]]"#).await.unwrap();
        assert_matches!(
            next_envelope(&mut raw).await,
            Envelope::Error(message) if message.starts_with("invalid envelope")
        );

        raw.send_text(r#"["call",["add",[4,4],{}]]"#).await.unwrap();
        assert_eq!(next_envelope(&mut raw).await, Envelope::Return(json!(8)));
    }

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl MethodHandler for Counter {
        async fn handle(&self, _args: Args, _peer: &mut RpcPeer) -> Result<Value, RpcError> {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn interleaved_event_is_dispatched_once() {
        let (mut raw, client) = socket_pair();
        let hits = Arc::new(AtomicUsize::new(0));
        let mut methods = MethodRegistry::new();
        methods.register("notify", Counter(Arc::clone(&hits)));
        let mut client = RpcPeer::new(client, Arc::new(methods));

        let remote = async {
            let request = next_envelope(&mut raw).await;
            assert_matches!(request, Envelope::Call(inv) if inv.method == "slow");
            raw.send_text(r#"["event",["notify",[],{}]]"#).await.unwrap();
            raw.send_text(r#"["return","done"]"#).await.unwrap();
        };
        let (result, ()) = tokio::join!(client.call("slow", vec![], Map::new()), remote);
        assert_eq!(result.unwrap(), json!("done"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remote_error_reply() {
        let (mut raw, client) = socket_pair();
        let mut client = RpcPeer::new(client, Arc::new(MethodRegistry::new()));
        let remote = async {
            let _ = next_envelope(&mut raw).await;
            raw.send_text(r#"["error","it broke"]"#).await.unwrap();
        };
        let (result, ()) = tokio::join!(client.call("x", vec![], Map::new()), remote);
        assert_matches!(result, Err(RpcError::Remote { message }) if message == "it broke");
        assert!(client.pending_call().is_none());
    }

    /// Tries to issue a call of its own while serving one.
    struct Nested;

    #[async_trait]
    impl MethodHandler for Nested {
        async fn handle(&self, _args: Args, peer: &mut RpcPeer) -> Result<Value, RpcError> {
            peer.call("other", vec![], Map::new()).await
        }
    }

    #[tokio::test]
    async fn nested_call_is_refused() {
        let (mut raw, client) = socket_pair();
        let mut methods = MethodRegistry::new();
        methods.register("ask", Nested);
        let mut client = RpcPeer::new(client, Arc::new(methods));

        let remote = async {
            let _ = next_envelope(&mut raw).await;
            raw.send_text(r#"["call",["ask",[],{}]]"#).await.unwrap();
            let reply = next_envelope(&mut raw).await;
            raw.send_text(r#"["return",0]"#).await.unwrap();
            reply
        };
        let (result, reply) = tokio::join!(client.call("start", vec![], Map::new()), remote);
        assert_eq!(result.unwrap(), json!(0));
        assert_matches!(
            reply,
            Envelope::Error(message) if message == "cannot call 'other' while 'start' is awaiting its reply"
        );
    }

    /// Calls back into the client before answering.
    struct CallBack;

    #[async_trait]
    impl MethodHandler for CallBack {
        async fn handle(&self, args: Args, peer: &mut RpcPeer) -> Result<Value, RpcError> {
            let n: i64 = args.require(0, "n")?;
            let doubled = peer.call("double", vec![json!(n)], Map::new()).await?;
            Ok(json!({ "doubled": doubled }))
        }
    }

    #[tokio::test]
    async fn server_calls_back_during_client_call() {
        let (server, client) = socket_pair();
        let mut server_methods = MethodRegistry::new();
        server_methods.register("work", CallBack);
        let mut server = RpcPeer::new(server, Arc::new(server_methods));
        let _serving = tokio::spawn(async move { server.run().await });

        let mut client_methods = MethodRegistry::new();
        client_methods.register_fn("double", |args| Ok(json!(args.require::<i64>(0, "n")? * 2)));
        let mut client = RpcPeer::new(client, Arc::new(client_methods));

        let result = client.call("work", vec![json!(21)], Map::new()).await.unwrap();
        assert_eq!(result, json!({ "doubled": 42 }));
    }

    #[tokio::test]
    async fn disconnect_fails_pending_call() {
        let (mut raw, client) = socket_pair();
        let mut client = RpcPeer::new(client, Arc::new(MethodRegistry::new()));
        let remote = async move {
            let _ = next_envelope(&mut raw).await;
            drop(raw);
        };
        let (result, ()) = tokio::join!(client.call("add", vec![], Map::new()), remote);
        assert_matches!(result, Err(RpcError::Disconnected { method }) if method == "add");
        assert!(client.socket().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_call_releases_the_slot() {
        let (mut raw, client) = socket_pair();
        let mut client = RpcPeer::new(client, Arc::new(MethodRegistry::new()));

        let timed_out = tokio::time::timeout(
            Duration::from_millis(50),
            client.call("slow", vec![], Map::new()),
        )
        .await;
        assert!(timed_out.is_err());
        assert!(client.pending_call().is_none());

        let remote = async {
            assert_matches!(next_envelope(&mut raw).await, Envelope::Call(inv) if inv.method == "slow");
            assert_matches!(next_envelope(&mut raw).await, Envelope::Call(inv) if inv.method == "add");
            raw.send_text(r#"["return","late"]"#).await.unwrap();
            raw.send_text(r#"["return",2]"#).await.unwrap();
        };
        let (result, ()) = tokio::join!(
            client.call("add", vec![json!(1), json!(1)], Map::new()),
            remote
        );
        assert_eq!(result.unwrap(), json!(2));
        assert!(client.pending_call().is_none());
    }

    /// Transport that accepts no writes and never delivers input.
    struct DeadLink;

    #[async_trait]
    impl Transport for DeadLink {
        async fn read_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
            std::future::pending().await
        }

        async fn write_all(&mut self, _data: &[u8]) -> std::io::Result<()> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }

        async fn shutdown(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn call_on_failed_transport_errors_without_waiting() {
        let socket = WebSocket::new(
            Box::new(DeadLink),
            MaskPolicy::CLIENT,
            Bytes::new(),
            WsConfig::default(),
        );
        let mut client = RpcPeer::new(socket, Arc::new(MethodRegistry::new()));
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            client.call("add", vec![json!(1), json!(2)], Map::new()),
        )
        .await
        .expect("call must not wait for a reply");
        assert_matches!(result, Err(RpcError::Transport(wshttpd_ws::WsError::Io(_))));
        assert!(client.socket().is_closed());
        assert!(client.pending_call().is_none());
    }

    #[tokio::test]
    async fn event_failure_surfaces_from_run() {
        let (server, mut raw) = socket_pair();
        let mut server = RpcPeer::new(server, Arc::new(calculator()));
        raw.send_text(r#"["event",["unknown",[],{}]]"#).await.unwrap();
        raw.send_text(r#"["event",["fail",[],{}]]"#).await.unwrap();
        assert_matches!(
            server.run().await,
            Err(RpcError::EventFailed { method, .. }) if method == "fail"
        );
    }

    #[tokio::test]
    async fn events_are_fire_and_forget() {
        let (server, client) = socket_pair();
        let hits = Arc::new(AtomicUsize::new(0));
        let mut methods = MethodRegistry::new();
        methods.register("tick", Counter(Arc::clone(&hits)));
        let mut server = RpcPeer::new(server, Arc::new(methods));
        let mut client = RpcPeer::new(client, Arc::new(MethodRegistry::new()));

        client.event("tick", vec![], Map::new()).await.unwrap();
        client.event("tick", vec![json!(1)], Map::new()).await.unwrap();
        client.socket_mut().close().await.unwrap();
        server.run().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn underscore_names_are_refused_locally() {
        let (_server, client) = socket_pair();
        let mut client = RpcPeer::new(client, Arc::new(MethodRegistry::new()));
        assert_matches!(
            client.call("_private", vec![], Map::new()).await,
            Err(RpcError::InvalidMethodName { .. })
        );
        assert_matches!(
            client.event("__init__", vec![], Map::new()).await,
            Err(RpcError::InvalidMethodName { .. })
        );
        let registry = ConnectionRegistry::new();
        assert_matches!(
            broadcast_event(&registry, "_x", vec![], Map::new()),
            Err(RpcError::InvalidMethodName { .. })
        );
    }

    #[tokio::test]
    async fn incoming_underscore_names_are_not_found() {
        let (server, client) = socket_pair();
        let mut methods = calculator();
        methods.register_fn("_hidden", |_| Ok(json!("leaked")));
        let mut server = RpcPeer::new(server, Arc::new(methods));
        let mut client = RpcPeer::new(client, Arc::new(MethodRegistry::new()));
        let _serving = tokio::spawn(async move { server.run().await });

        let call = Envelope::Call(Invocation::new("_hidden", vec![], Map::new()));
        client.send_envelope(&call).await.unwrap();
        assert_eq!(
            next_envelope(client.socket_mut()).await,
            Envelope::Error("method '_hidden' not found".into())
        );
    }

    #[tokio::test]
    async fn broadcast_event_reaches_registered_peers() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (mut server, client) = socket_pair();
        let _handle = server.register(Arc::clone(&registry));

        let hits = Arc::new(AtomicUsize::new(0));
        let mut methods = MethodRegistry::new();
        methods.register("news", Counter(Arc::clone(&hits)));
        let mut client = RpcPeer::new(client, Arc::new(methods));

        assert_eq!(broadcast_event(&registry, "news", vec![json!("hi")], Map::new()).unwrap(), 1);

        // Drive the server side so it flushes its queue, then close.
        let server_task = tokio::spawn(async move {
            let mut server = RpcPeer::new(server, Arc::new(MethodRegistry::new()));
            server.run().await
        });
        let message = client.socket_mut().next_message().await.unwrap().unwrap();
        client.handle_message(message).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        client.socket_mut().close().await.unwrap();
        server_task.await.unwrap().unwrap();
        assert!(registry.is_empty());
    }
}
