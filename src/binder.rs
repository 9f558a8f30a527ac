//! Expose channel methods on the raw [Socket] handle.
//!
//! Methods are declared explicitly when the channel is built. Once the
//! channel is torn down every bound slot is replaced with a no-op.
use chashmap::CHashMap;
use futures::prelude::*;
use serde_json::Value;
use std::sync::{Arc, Weak};

use crate::channel::{Call, Channel, Inner, Outgoing};
use crate::error::{BindError, CallError, InvokeError};
use crate::socket::Message;

/// Names the underlying socket already defines with different semantics.
const RESERVED: &[&str] = &[
    "send",
    "emit",
    "to",
    "in",
    "join",
    "leave",
    "leaveAll",
    "disconnect",
];

pub(crate) type MethodFn = Arc<dyn Fn(&Channel, Vec<Value>) -> Call<Vec<Value>> + Send + Sync>;

type BoundMethod = Arc<dyn Fn(Vec<Value>) -> Call<Vec<Value>> + Send + Sync>;

/// Returns true if `name` must not be bound on the socket.
pub fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name) || name.starts_with('_')
}

/// Methods declared for a channel before it is connected.
pub(crate) struct Binder {
    methods: Vec<(String, MethodFn)>,
}

impl Binder {
    /// A binder with the `invoke`, `emitSafe` and `ping` methods every
    /// channel exposes.
    pub fn with_builtins() -> Self {
        let mut binder = Self {
            methods: Vec::new(),
        };
        binder.add("invoke".to_string(), Arc::new(bound_invoke));
        binder.add("emitSafe".to_string(), Arc::new(bound_emit_safe));
        binder.add("ping".to_string(), Arc::new(bound_ping));
        binder
    }

    pub fn add(&mut self, name: String, method: MethodFn) {
        self.methods.push((name, method));
    }

    pub fn validate(&self) -> Result<(), BindError> {
        let mut seen = std::collections::HashSet::new();
        for (name, _) in &self.methods {
            if is_reserved(name) {
                return Err(BindError::Reserved(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(BindError::Duplicate(name.clone()));
            }
        }
        Ok(())
    }

    /// Bind every declared method to `channel`.
    ///
    /// Bound methods hold a weak reference so the socket handle never keeps
    /// the channel alive.
    pub fn bind(self, channel: Weak<Inner>) -> Bindings {
        let slots = CHashMap::new();
        let mut names = Vec::with_capacity(self.methods.len());
        for (name, method) in self.methods {
            let channel = channel.clone();
            let bound: BoundMethod = Arc::new(move |args: Vec<Value>| match channel.upgrade() {
                Some(inner) => method(&Channel::from_inner(inner), args),
                None => noop_call(),
            });
            slots.insert(name.clone(), bound);
            names.push(name);
        }
        Bindings { slots, names }
    }
}

impl std::fmt::Debug for Binder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binder")
            .field(
                "methods",
                &self.methods.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Method slots of a socket. The set of names is fixed once bound.
pub(crate) struct Bindings {
    slots: CHashMap<String, BoundMethod>,
    names: Vec<String>,
}

impl Bindings {
    fn get(&self, name: &str) -> Option<BoundMethod> {
        self.slots
            .get(&name.to_string())
            .map(|method| Arc::clone(&*method))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Replace every bound method with a no-op.
    pub fn neutralize(&self) {
        for name in &self.names {
            let noop: BoundMethod = Arc::new(|_: Vec<Value>| noop_call());
            self.slots.insert(name.clone(), noop);
        }
    }
}

impl std::fmt::Debug for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bindings")
            .field("names", &self.names)
            .finish()
    }
}

/// Raw handle to the underlying socket of a channel.
///
/// Code that only holds the socket can still emit plain events and call the
/// channel's bound methods by name. The handle may outlive the channel, in
/// which case bound methods do nothing and resolve to an empty result list.
#[derive(Clone)]
pub struct Socket {
    outgoing: Outgoing,
    bindings: Arc<Bindings>,
}

impl Socket {
    pub(crate) fn new(outgoing: Outgoing, bindings: Arc<Bindings>) -> Self {
        Self { outgoing, bindings }
    }

    /// Send a fire-and-forget event to the peer. Returns false if the socket
    /// is closed.
    pub fn emit(&self, event: impl Into<String>, args: Vec<Value>) -> bool {
        self.outgoing.send(Message::new(event, args))
    }

    /// Call the method bound under `name`.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Call<Vec<Value>>, BindError> {
        match self.bindings.get(name) {
            Some(method) => Ok(method(args)),
            None => Err(BindError::NotBound(name.to_string())),
        }
    }

    pub fn bound_methods(&self) -> &[String] {
        self.bindings.names()
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.bindings.names().iter().any(|bound| bound == name)
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("outgoing", &self.outgoing)
            .field("bindings", &self.bindings)
            .finish()
    }
}

fn noop_call() -> Call<Vec<Value>> {
    future::ready(Ok(Vec::new())).boxed()
}

fn invalid_call(error: InvokeError) -> Call<Vec<Value>> {
    future::ready(Err(CallError::Invalid(error))).boxed()
}

/// `invoke(method, payload)`
fn bound_invoke(channel: &Channel, args: Vec<Value>) -> Call<Vec<Value>> {
    let mut args = args.into_iter();
    let method = match args.next() {
        Some(Value::String(method)) => method,
        _ => return invalid_call(InvokeError::EmptyMethod),
    };
    let payload = args.next().unwrap_or(Value::Null);
    match channel.invoke_async(&method, payload) {
        Ok(call) => call,
        Err(error) => invalid_call(error),
    }
}

/// `emitSafe(event, ...params)`
fn bound_emit_safe(channel: &Channel, args: Vec<Value>) -> Call<Vec<Value>> {
    let mut args = args.into_iter();
    let event = match args.next() {
        Some(Value::String(event)) => event,
        _ => return invalid_call(InvokeError::EmptyEvent),
    };
    match channel.emit_safe_async(&event, args.collect()) {
        Ok(call) => call.map_ok(|()| Vec::new()).boxed(),
        Err(error) => invalid_call(error),
    }
}

/// `ping()`, resolves to the latency in milliseconds.
fn bound_ping(channel: &Channel, _args: Vec<Value>) -> Call<Vec<Value>> {
    channel
        .ping_async()
        .map_ok(|latency| vec![Value::from(latency.as_millis() as u64)])
        .boxed()
}
