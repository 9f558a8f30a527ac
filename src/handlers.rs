use futures::prelude::*;
use serde_json::Value;
use std::collections::HashMap;

use crate::channel::Outgoing;
use crate::envelope::{encode_reply, Envelope, Method};
use crate::error::RemoteError;

type Handler = Box<dyn Fn(Value, Reply) + Send + Sync + 'static>;

/// Methods a channel answers for its peer.
///
/// The table is moved into the channel on construction and does not change
/// afterwards.
#[derive(Default)]
pub struct Handlers {
    handlers: HashMap<String, Handler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that receives the raw payload and decides how to
    /// [Reply].
    ///
    /// Control method names cannot be registered since the dispatcher never
    /// looks them up.
    pub fn add(
        &mut self,
        method: impl ToString,
        f: impl Fn(Value, Reply) + Send + Sync + 'static,
    ) {
        let method = method.to_string();
        if Method::is_control(&method) {
            tracing::warn!(?method, "ignoring handler for control method");
            return;
        }
        self.handlers.insert(method, Box::new(f));
    }

    /// Register an async handler with typed arguments and a single result.
    ///
    /// The payload is deserialized into `Args`. If that fails the caller gets
    /// an `ArgumentError`.
    pub fn add_async<Args, Fut, T>(
        &mut self,
        method: impl ToString,
        f: impl Fn(Args) -> Fut + Send + Sync + 'static,
    ) where
        Args: serde::de::DeserializeOwned,
        Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
        T: serde::Serialize + Send + 'static,
    {
        let method2 = method.to_string();
        self.add(method, move |payload, reply| {
            match serde_json::from_value::<Args>(payload) {
                Ok(args) => {
                    let response_fut = f(args);
                    async_std::task::spawn(async move {
                        match response_fut.await {
                            Ok(value) => reply.ok(&value),
                            Err(error) => reply.err(error),
                        }
                    });
                }
                Err(error) => {
                    tracing::warn!(method = ?method2, ?error, "failed to deserialize arguments");
                    reply.err(deserialize_arguments_error(error))
                }
            }
        });
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Run the handler for `method`. Replies with a "no such method" error if
    /// there is none.
    pub(crate) fn handle(&self, method: &str, payload: Value, reply: Reply) {
        match self.handlers.get(method) {
            Some(handler) => handler(payload, reply),
            None => {
                tracing::warn!(?method, "missing method");
                reply.err(method_not_found_error(method))
            }
        }
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Answers one inbound call.
///
/// Consumed by sending, so every call is answered at most once. Dropping a
/// `Reply` without sending leaves the caller waiting until the connection
/// closes. Replies sent after the channel is torn down are discarded.
#[derive(Debug)]
pub struct Reply {
    id: u32,
    outgoing: Outgoing,
}

impl Reply {
    pub(crate) fn new(id: u32, outgoing: Outgoing) -> Self {
        Self { id, outgoing }
    }

    /// Send `[error_or_null, ...results]` back to the caller.
    pub fn send(self, result: Result<Vec<Value>, RemoteError>) {
        let envelope = Envelope {
            id: self.id,
            method: Method::Reply,
            payload: encode_reply(result),
        };
        if !self.outgoing.send_envelope(envelope) {
            tracing::debug!(id = self.id, "channel closed, discarding reply");
        }
    }

    /// Reply with a single result.
    pub fn ok(self, value: &impl serde::Serialize) {
        match serde_json::to_value(value) {
            Ok(value) => self.send(Ok(vec![value])),
            Err(error) => self.err(RemoteError::new(format!(
                "Failed to serialize result {}",
                error
            ))),
        }
    }

    /// Reply without error and without results.
    pub fn done(self) {
        self.send(Ok(Vec::new()))
    }

    pub fn err(self, error: impl Into<RemoteError>) {
        self.send(Err(error.into()))
    }
}

fn method_not_found_error(method: &str) -> RemoteError {
    RemoteError::new(format!("There is no method: {}", method))
}

fn deserialize_arguments_error(error: serde_json::Error) -> RemoteError {
    RemoteError::new(format!("Failed to deserialize arguments {}", error))
        .with_field("name", "ArgumentError")
}
