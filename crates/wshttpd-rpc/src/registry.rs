//! Method registry: the capability surface a peer exposes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::errors::RpcError;
use crate::peer::RpcPeer;

/// Arguments of an incoming call or event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    /// Positional arguments.
    pub positional: Vec<Value>,
    /// Named arguments.
    pub named: Map<String, Value>,
}

impl Args {
    /// Bundle positional and named arguments.
    pub fn new(positional: Vec<Value>, named: Map<String, Value>) -> Self {
        Self { positional, named }
    }

    /// Argument at `index`, falling back to the named argument `name`.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.named.get(name))
    }

    /// Deserialize a required argument.
    pub fn require<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T, RpcError> {
        let value = self.get(index, name).ok_or_else(|| RpcError::InvalidParams {
            message: format!("missing argument '{name}'"),
        })?;
        Self::convert(value, name)
    }

    /// Deserialize an optional argument. `null` counts as absent.
    pub fn optional<T: DeserializeOwned>(
        &self,
        index: usize,
        name: &str,
    ) -> Result<Option<T>, RpcError> {
        match self.get(index, name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Self::convert(value, name).map(Some),
        }
    }

    fn convert<T: DeserializeOwned>(value: &Value, name: &str) -> Result<T, RpcError> {
        serde_json::from_value(value.clone()).map_err(|err| RpcError::InvalidParams {
            message: format!("invalid argument '{name}': {err}"),
        })
    }
}

/// Trait implemented by every RPC method handler.
///
/// The handler gets the peer it was invoked on, so it can call back into
/// the remote side or emit events before returning.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler.
    async fn handle(&self, args: Args, peer: &mut RpcPeer) -> Result<Value, RpcError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> MethodHandler for FnHandler<F>
where
    F: Fn(Args) -> Result<Value, RpcError> + Send + Sync,
{
    async fn handle(&self, args: Args, _peer: &mut RpcPeer) -> Result<Value, RpcError> {
        (self.0)(args)
    }
}

/// Registry mapping method names to handlers.
#[derive(Default, Clone)]
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a method name.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Register a plain function that does not need the peer.
    pub fn register_fn<F>(&mut self, method: &str, f: F)
    where
        F: Fn(Args) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.register(method, FnHandler(f));
    }

    /// Handler for `method`.
    pub fn get(&self, method: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.get(method).cloned()
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
