//! Wire format of calls, replies and control messages.
//!
//! Every envelope is sent as the arguments `[id, method, payload]` of a single
//! reserved socket event.
use serde_json::Value;
use std::convert::TryFrom;

use crate::error::RemoteError;
use crate::socket::Message;

/// Default name of the socket event that carries all envelopes.
pub const DEFAULT_CONTROL_EVENT: &str = "_____rtm_invoke";

const REPLY: &str = "_____rtm_invoke_cb";
const EMIT_SAFE: &str = "_____rtm_emitSafe";
const PING: &str = "_____rtm_ping";

/// Method slot of an [Envelope].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// The envelope answers a call previously sent by the receiver.
    Reply,
    /// Re-emit an event on the receiving side and acknowledge it.
    EmitSafe,
    /// Acknowledge immediately.
    Ping,
    /// Application method looked up in the receiver's handlers.
    Call(String),
}

impl Method {
    pub fn from_name(name: String) -> Self {
        match name.as_str() {
            REPLY => Method::Reply,
            EMIT_SAFE => Method::EmitSafe,
            PING => Method::Ping,
            _ => Method::Call(name),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Reply => REPLY,
            Method::EmitSafe => EMIT_SAFE,
            Method::Ping => PING,
            Method::Call(name) => name.as_str(),
        }
    }

    /// Returns true if `name` is one of the reserved control method names.
    pub fn is_control(name: &str) -> bool {
        matches!(name, REPLY | EMIT_SAFE | PING)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: u32,
    pub method: Method,
    pub payload: Value,
}

/// Reason an inbound envelope was dropped.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum EnvelopeParseError {
    #[error("Expected 2 or 3 arguments, got {count}")]
    Arity { count: usize },
    #[error("Invalid correlation id {value}")]
    InvalidId { value: Value },
    #[error("Invalid method name {value}")]
    InvalidMethod { value: Value },
    #[error("Reply payload is not an array: {value}")]
    ReplyBody { value: Value },
    #[error("Broadcast payload must start with an event name: {value}")]
    BroadcastBody { value: Value },
}

impl Envelope {
    /// Parse the arguments of a control event. A missing payload is `null`.
    pub fn parse(args: Vec<Value>) -> Result<Self, EnvelopeParseError> {
        let count = args.len();
        if count < 2 || count > 3 {
            return Err(EnvelopeParseError::Arity { count });
        }
        let mut args = args.into_iter();
        let id_value = args.next().unwrap_or(Value::Null);
        let method_value = args.next().unwrap_or(Value::Null);
        let payload = args.next().unwrap_or(Value::Null);

        let id = id_value
            .as_u64()
            .and_then(|id| u32::try_from(id).ok())
            .filter(|id| *id > 0)
            .ok_or(EnvelopeParseError::InvalidId { value: id_value })?;

        let method = match method_value {
            Value::String(name) if !name.is_empty() => Method::from_name(name),
            value => return Err(EnvelopeParseError::InvalidMethod { value }),
        };

        Ok(Self {
            id,
            method,
            payload,
        })
    }

    pub fn build(self) -> Vec<Value> {
        let Envelope {
            id,
            method,
            payload,
        } = self;
        let method = match method {
            Method::Call(name) => name,
            method => method.as_str().to_string(),
        };
        vec![Value::from(id), Value::String(method), payload]
    }

    pub fn into_message(self, event: &str) -> Message {
        Message::new(event, self.build())
    }
}

/// Encode the payload of a reply: `[error_or_null, ...results]`.
pub fn encode_reply(result: Result<Vec<Value>, RemoteError>) -> Value {
    match result {
        Ok(results) => {
            let mut payload = Vec::with_capacity(results.len() + 1);
            payload.push(Value::Null);
            payload.extend(results);
            Value::Array(payload)
        }
        Err(error) => Value::Array(vec![error.marshal()]),
    }
}

/// Decode the payload of a reply. An empty array is a success without results.
pub fn decode_reply(payload: Value) -> Result<Result<Vec<Value>, RemoteError>, EnvelopeParseError> {
    let items = match payload {
        Value::Array(items) => items,
        value => return Err(EnvelopeParseError::ReplyBody { value }),
    };
    let mut items = items.into_iter();
    match items.next() {
        None | Some(Value::Null) => Ok(Ok(items.collect())),
        Some(error) => Ok(Err(RemoteError::from_value(error))),
    }
}

/// Encode the payload of a safe broadcast: `[event, ...params]`.
pub fn encode_broadcast(event: &str, params: Vec<Value>) -> Value {
    let mut payload = Vec::with_capacity(params.len() + 1);
    payload.push(Value::String(event.to_string()));
    payload.extend(params);
    Value::Array(payload)
}

pub fn decode_broadcast(payload: Value) -> Result<Message, EnvelopeParseError> {
    match payload {
        Value::Array(items) => {
            let mut items = items.into_iter();
            match items.next() {
                Some(Value::String(event)) if !event.is_empty() => {
                    Ok(Message::new(event, items.collect()))
                }
                first => {
                    let mut value = vec![first.unwrap_or(Value::Null)];
                    value.extend(items);
                    Err(EnvelopeParseError::BroadcastBody {
                        value: Value::Array(value),
                    })
                }
            }
        }
        value => Err(EnvelopeParseError::BroadcastBody { value }),
    }
}
