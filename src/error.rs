use serde_json::{Map, Value};

/// Field that never crosses the connection boundary.
const STACK_FIELD: &str = "stack";
const MESSAGE_FIELD: &str = "message";

/// Application error that is sent between peers.
///
/// On the wire this is a JSON object with a `message` field and any number of
/// additional fields. A `stack` field is never sent and never accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    message: String,
    fields: Map<String, Value>,
}

impl RemoteError {
    pub fn new(message: impl ToString) -> Self {
        Self {
            message: message.to_string(),
            fields: Map::new(),
        }
    }

    /// Build a [RemoteError] from a native error. Only the display message is kept.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(error)
    }

    /// Attach an additional field. Setting `message` replaces the message,
    /// `stack` is ignored.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            STACK_FIELD => {}
            MESSAGE_FIELD => self.message = message_from_value(value),
            _ => {
                self.fields.insert(key, value);
            }
        }
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The `name` field, if the peer sent one.
    pub fn name(&self) -> Option<&str> {
        self.field("name").and_then(Value::as_str)
    }

    /// Convert into the plain object that is sent to the peer.
    pub fn marshal(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert(
            MESSAGE_FIELD.to_string(),
            Value::String(self.message.clone()),
        );
        Value::Object(object)
    }

    /// Decode an error value received from the peer.
    ///
    /// Objects keep all fields except `stack`. Any other value becomes the
    /// message.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut object) => {
                object.remove(STACK_FIELD);
                let message = object
                    .remove(MESSAGE_FIELD)
                    .map(message_from_value)
                    .unwrap_or_default();
                Self {
                    message,
                    fields: object,
                }
            }
            value => Self::new(message_from_value(value)),
        }
    }
}

fn message_from_value(value: Value) -> String {
    match value {
        Value::String(message) => message,
        Value::Null => String::new(),
        value => value.to_string(),
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RemoteError {}

impl From<&str> for RemoteError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for RemoteError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl serde::Serialize for RemoteError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.marshal().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for RemoteError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

/// Local validation error. Returned before anything is sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    #[error("Please provide a method name for invoke")]
    EmptyMethod,
    #[error("Please provide an event name for emit_safe")]
    EmptyEvent,
    #[error("Method name {0:?} is reserved for control messages")]
    ReservedMethod(String),
}

/// Error delivered to the completion of a call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// The peer replied with an error.
    #[error(transparent)]
    Remote(RemoteError),
    /// The channel was torn down before a reply arrived.
    #[error("Connection closed")]
    ConnectionClosed,
    /// Arguments passed through [crate::Socket::call] were invalid.
    #[error("Invalid call")]
    Invalid(
        #[source]
        #[from]
        InvokeError,
    ),
}

impl CallError {
    /// Returns the remote error if the peer replied with one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            CallError::Remote(error) => Some(error),
            _ => None,
        }
    }
}

/// Error binding or calling a proxied method on a [crate::Socket].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("Method name {0:?} is reserved by the socket")]
    Reserved(String),
    #[error("Method {0:?} is bound twice")]
    Duplicate(String),
    #[error("Method {0:?} is not bound")]
    NotBound(String),
}

/// Error returned by the room pass-through methods of [crate::Channel].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomsError {
    #[error("Rooms are only available on responder channels with room support")]
    Unsupported,
}
