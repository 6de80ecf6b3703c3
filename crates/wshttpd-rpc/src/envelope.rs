//! Wire envelope: a two-element JSON array `[kind, payload]`.
//!
//! | kind     | payload                          |
//! |----------|----------------------------------|
//! | `call`   | `[method, [args...], {kwargs}]`  |
//! | `event`  | `[method, [args...], {kwargs}]`  |
//! | `return` | result value                     |
//! | `error`  | message string                   |

use std::fmt;

use serde_json::{Map, Value, json};

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// Request expecting a `return` or `error`.
    Call,
    /// Fire-and-forget request.
    Event,
    /// Successful reply to a call.
    Return,
    /// Failed reply to a call.
    Error,
}

impl EnvelopeKind {
    /// Wire spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Event => "event",
            Self::Return => "return",
            Self::Error => "error",
        }
    }

    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "call" => Some(Self::Call),
            "event" => Some(Self::Event),
            "return" => Some(Self::Return),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method name plus arguments of a call or event.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Target method.
    pub method: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Named arguments.
    pub kwargs: Map<String, Value>,
}

impl Invocation {
    /// Build an invocation.
    pub fn new(method: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            method: method.into(),
            args,
            kwargs,
        }
    }

    fn to_value(&self) -> Value {
        json!([self.method, self.args, self.kwargs])
    }

    fn from_value(payload: Value) -> Result<Self, &'static str> {
        let Value::Array(items) = payload else {
            return Err("payload is not an array");
        };
        if items.is_empty() || items.len() > 3 {
            return Err("payload must have one to three elements");
        }
        let mut items = items.into_iter();
        let Some(Value::String(method)) = items.next() else {
            return Err("method name is not a string");
        };
        let args = match items.next() {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(args)) => args,
            Some(_) => return Err("positional arguments are not an array"),
        };
        let kwargs = match items.next() {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(kwargs)) => kwargs,
            Some(_) => return Err("named arguments are not an object"),
        };
        Ok(Self {
            method,
            args,
            kwargs,
        })
    }
}

/// A decoded RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Remote call awaiting a reply.
    Call(Invocation),
    /// Remote event, no reply.
    Event(Invocation),
    /// Result of the peer's pending call.
    Return(Value),
    /// Failure of the peer's pending call.
    Error(String),
}

/// Why a text frame is not a valid envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// The frame does not start with a JSON value.
    #[error("not valid JSON: {0}")]
    Json(String),
    /// Top level is not `[kind, payload]`.
    #[error("expected a two-element array with a string kind")]
    NotAPair,
    /// Kind is not one of call/event/return/error.
    #[error("unknown envelope kind {0:?}")]
    UnknownKind(String),
    /// A call or event payload is malformed.
    #[error("malformed {kind} payload: {reason}")]
    BadInvocation {
        /// `call` or `event`.
        kind: EnvelopeKind,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl Envelope {
    /// Discriminator of this envelope.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Call(_) => EnvelopeKind::Call,
            Self::Event(_) => EnvelopeKind::Event,
            Self::Return(_) => EnvelopeKind::Return,
            Self::Error(_) => EnvelopeKind::Error,
        }
    }

    /// Serialize to the wire form.
    pub fn to_json(&self) -> String {
        let payload = match self {
            Self::Call(invocation) | Self::Event(invocation) => invocation.to_value(),
            Self::Return(value) => value.clone(),
            Self::Error(message) => Value::String(message.clone()),
        };
        json!([self.kind().as_str(), payload]).to_string()
    }

    /// Decode a text frame.
    ///
    /// Only the first JSON value is read; anything after it is ignored.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let value = serde_json::Deserializer::from_str(text)
            .into_iter::<Value>()
            .next()
            .ok_or_else(|| EnvelopeError::Json("empty frame".to_owned()))?
            .map_err(|err| EnvelopeError::Json(err.to_string()))?;

        let Value::Array(pair) = value else {
            return Err(EnvelopeError::NotAPair);
        };
        let pair: Result<[Value; 2], _> = pair.try_into();
        let Ok([kind, payload]) = pair else {
            return Err(EnvelopeError::NotAPair);
        };
        let Value::String(kind) = kind else {
            return Err(EnvelopeError::NotAPair);
        };
        let kind = EnvelopeKind::parse(&kind).ok_or(EnvelopeError::UnknownKind(kind))?;

        let bad = |reason| EnvelopeError::BadInvocation { kind, reason };
        Ok(match kind {
            EnvelopeKind::Call => Self::Call(Invocation::from_value(payload).map_err(bad)?),
            EnvelopeKind::Event => Self::Event(Invocation::from_value(payload).map_err(bad)?),
            EnvelopeKind::Return => Self::Return(payload),
            EnvelopeKind::Error => Self::Error(match payload {
                Value::String(message) => message,
                other => other.to_string(),
            }),
        })
    }
}
