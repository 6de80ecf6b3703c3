//! Methods served by the `wshttpd` binary.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::info;
use wshttpd_rpc::{Args, MethodHandler, MethodRegistry, RpcError, RpcPeer, broadcast_event};
use wshttpd_ws::ConnectionRegistry;

/// Register the demo methods.
///
/// - `add(a, b)`: sum of two integers
/// - `echo(...)`: the arguments back, as `{"args": [...], "kwargs": {...}}`
/// - `methods()`: sorted method names
/// - `announce(text)`: sends an `announcement` event to every connection
pub fn methods(connections: Arc<ConnectionRegistry>) -> MethodRegistry {
    let mut methods = MethodRegistry::new();
    methods.register_fn("add", |args: Args| {
        let a: i64 = args.require(0, "a")?;
        let b: i64 = args.require(1, "b")?;
        a.checked_add(b)
            .map(Value::from)
            .ok_or_else(|| RpcError::application("integer overflow"))
    });
    methods.register_fn("echo", |args: Args| {
        Ok(json!({ "args": args.positional, "kwargs": args.named }))
    });
    methods.register("methods", ListMethods);
    methods.register("announce", Announce { connections });
    methods
}

struct ListMethods;

#[async_trait]
impl MethodHandler for ListMethods {
    async fn handle(&self, _args: Args, peer: &mut RpcPeer) -> Result<Value, RpcError> {
        Ok(json!(peer.methods().methods()))
    }
}

struct Announce {
    connections: Arc<ConnectionRegistry>,
}

#[async_trait]
impl MethodHandler for Announce {
    async fn handle(&self, args: Args, peer: &mut RpcPeer) -> Result<Value, RpcError> {
        let text: String = args.require(0, "text")?;
        let from = peer.socket().info().user.clone().unwrap_or_else(|| "anonymous".into());
        let mut kwargs = Map::new();
        let _ = kwargs.insert("from".into(), json!(from));
        let sent = broadcast_event(&self.connections, "announcement", vec![json!(text)], kwargs)?;
        info!(sent, "announcement broadcast");
        Ok(json!(sent))
    }
}
