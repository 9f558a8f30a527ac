use futures::channel::{mpsc, oneshot};
use futures::future::BoxFuture;
use futures::prelude::*;
use serde_json::Value;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::binder::{Binder, Bindings, MethodFn, Socket};
use crate::config::{Config, Role};
use crate::correlation::{CorrelationTable, Outcome};
use crate::envelope::{encode_broadcast, Envelope, Method};
use crate::error::{BindError, CallError, InvokeError, RoomsError};
use crate::handlers::Handlers;
use crate::socket::{Message, Reconnection, Rooms, SocketEvent};

/// Future returned by the `*_async` operations of [Channel].
pub type Call<T> = BoxFuture<'static, Result<T, CallError>>;

/// Event delivered to the application through [Events].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Plain event from the peer, or an event the peer sent with
    /// [Channel::emit_safe].
    Message(Message),
    /// Connectivity was lost. Followed by [Event::Reconnect] or [Event::Closed].
    Disconnect,
    Reconnect,
    /// The channel was torn down. Emitted exactly once, as the last event.
    Closed,
}

/// Local events of a [Channel].
#[pin_project::pin_project]
#[derive(Debug)]
pub struct Events {
    #[pin]
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl Events {
    /// Wait until the channel is torn down.
    pub async fn closed(mut self) {
        while let Some(event) = self.next().await {
            if event == Event::Closed {
                return;
            }
        }
    }
}

impl Stream for Events {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().receiver.poll_next(cx)
    }
}

/// Queue of messages for the underlying socket.
///
/// Closing it discards everything sent afterwards.
#[derive(Debug, Clone)]
pub(crate) struct Outgoing {
    sender: mpsc::UnboundedSender<Message>,
    control_event: Arc<str>,
}

impl Outgoing {
    pub fn new(control_event: &str) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded();
        let outgoing = Self {
            sender,
            control_event: Arc::from(control_event),
        };
        (outgoing, receiver)
    }

    pub fn send(&self, message: Message) -> bool {
        self.sender.unbounded_send(message).is_ok()
    }

    pub fn send_envelope(&self, envelope: Envelope) -> bool {
        self.send(envelope.into_message(&self.control_event))
    }

    pub fn close(&self) {
        self.sender.close_channel()
    }
}

pub(crate) struct Inner {
    pub(crate) config: Config,
    pub(crate) handlers: Handlers,
    pub(crate) pending: CorrelationTable,
    pub(crate) outgoing: Outgoing,
    events: mpsc::UnboundedSender<Event>,
    bindings: Arc<Bindings>,
    reconnection: Option<Arc<dyn Reconnection>>,
    rooms: Option<Arc<dyn Rooms>>,
    destroyed: AtomicBool,
    shutdown: mpsc::UnboundedSender<()>,
}

impl Inner {
    pub(crate) fn emit_local(&self, event: Event) {
        if self.events.unbounded_send(event).is_err() {
            tracing::trace!("local event listener dropped");
        }
    }

    /// True if a disconnect should be waited out instead of tearing down.
    pub(crate) fn reconnecting(&self) -> bool {
        self.config.role == Role::Initiator
            && self
                .reconnection
                .as_ref()
                .map_or(false, |reconnection| reconnection.is_active())
    }

    /// Send a call and return the receiver for its outcome.
    ///
    /// If the channel is closed the call is not sent and the receiver is
    /// cancelled.
    fn send_call(&self, method: Method, payload: Value) -> oneshot::Receiver<Outcome> {
        let (respond, receiver) = oneshot::channel();
        let id = self.pending.allocate(respond);
        let envelope = Envelope {
            id,
            method,
            payload,
        };
        tracing::trace!(?envelope, "send call");
        if !self.outgoing.send_envelope(envelope) {
            tracing::debug!(id, "channel closed, call not sent");
            self.pending.forget(id);
        }
        receiver
    }

    /// Tear the channel down. Only the first call has an effect.
    pub(crate) fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("tearing down channel");
        self.outgoing.close();
        self.shutdown.close_channel();
        self.bindings.neutralize();
        let drained = self.pending.drain_all(CallError::ConnectionClosed);
        tracing::debug!(drained, "channel closed");
        self.emit_local(Event::Closed);
        self.events.close_channel();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.destroy()
    }
}

/// Request/response calls, acknowledged broadcast and ping over one event
/// socket.
///
/// A `Channel` is a cheap handle; clones refer to the same connection.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("config", &self.inner.config)
            .field("handlers", &self.inner.handlers)
            .field("pending", &self.inner.pending)
            .field("bindings", &self.inner.bindings)
            .field("destroyed", &self.inner.destroyed)
            .finish()
    }
}

impl Channel {
    pub fn builder(handlers: Handlers) -> ChannelBuilder {
        ChannelBuilder::new(handlers)
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub fn role(&self) -> Role {
        self.inner.config.role
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// The raw socket handle with this channel's bound methods.
    pub fn socket(&self) -> Socket {
        Socket::new(self.inner.outgoing.clone(), Arc::clone(&self.inner.bindings))
    }

    /// Call `method` on the peer and pass the outcome to `callback`.
    ///
    /// `callback` runs exactly once, unless the channel was already torn
    /// down when the call was made. In that case nothing is sent and
    /// `callback` never runs.
    pub fn invoke(
        &self,
        method: &str,
        payload: Value,
        callback: impl FnOnce(Outcome) + Send + 'static,
    ) -> Result<(), InvokeError> {
        validate_method(method)?;
        let receiver = self
            .inner
            .send_call(Method::Call(method.to_string()), payload);
        spawn_callback(receiver, callback);
        Ok(())
    }

    /// Call `method` on the peer and return the reply values.
    ///
    /// Resolves to [CallError::ConnectionClosed] if the channel is torn down
    /// before the reply arrives, or was already torn down.
    pub fn invoke_async(&self, method: &str, payload: Value) -> Result<Call<Vec<Value>>, InvokeError> {
        validate_method(method)?;
        let receiver = self
            .inner
            .send_call(Method::Call(method.to_string()), payload);
        Ok(receiver.map(settle).boxed())
    }

    /// Emit `event` with `params` on the peer's side and get notified once
    /// the peer has re-emitted it.
    pub fn emit_safe(
        &self,
        event: &str,
        params: Vec<Value>,
        callback: impl FnOnce(Result<(), CallError>) + Send + 'static,
    ) -> Result<(), InvokeError> {
        let receiver = self.send_broadcast(event, params)?;
        spawn_callback(receiver, move |outcome| callback(outcome.map(drop)));
        Ok(())
    }

    pub fn emit_safe_async(&self, event: &str, params: Vec<Value>) -> Result<Call<()>, InvokeError> {
        let receiver = self.send_broadcast(event, params)?;
        Ok(receiver.map(|result| settle(result).map(drop)).boxed())
    }

    fn send_broadcast(
        &self,
        event: &str,
        params: Vec<Value>,
    ) -> Result<oneshot::Receiver<Outcome>, InvokeError> {
        if event.is_empty() {
            return Err(InvokeError::EmptyEvent);
        }
        Ok(self
            .inner
            .send_call(Method::EmitSafe, encode_broadcast(event, params)))
    }

    /// Measure the round trip time to the peer.
    ///
    /// The timestamp the peer sends back is ignored. Latency is measured on
    /// the local monotonic clock only.
    pub fn ping(&self, callback: impl FnOnce(Result<Duration, CallError>) + Send + 'static) {
        let start = Instant::now();
        let receiver = self.inner.send_call(Method::Ping, Value::Null);
        spawn_callback(receiver, move |outcome| {
            callback(outcome.map(|_| start.elapsed()))
        });
    }

    pub fn ping_async(&self) -> Call<Duration> {
        let start = Instant::now();
        let receiver = self.inner.send_call(Method::Ping, Value::Null);
        receiver
            .map(move |result| settle(result).map(|_| start.elapsed()))
            .boxed()
    }

    /// Tear the channel down from the local side.
    ///
    /// Pending calls fail with [CallError::ConnectionClosed] and
    /// [Event::Closed] is emitted.
    pub fn disconnect(&self) {
        self.inner.destroy()
    }

    fn rooms(&self) -> Result<&dyn Rooms, RoomsError> {
        match (self.inner.config.role, &self.inner.rooms) {
            (Role::Responder, Some(rooms)) => Ok(rooms.as_ref()),
            _ => Err(RoomsError::Unsupported),
        }
    }

    pub fn join(&self, room: &str) -> Result<(), RoomsError> {
        self.rooms()?.join(room);
        Ok(())
    }

    pub fn leave(&self, room: &str) -> Result<(), RoomsError> {
        self.rooms()?.leave(room);
        Ok(())
    }

    pub fn leave_all(&self) -> Result<(), RoomsError> {
        self.rooms()?.leave_all();
        Ok(())
    }

    /// Send a plain event to every socket in `room`.
    pub fn to(&self, room: &str, event: impl Into<String>, args: Vec<Value>) -> Result<(), RoomsError> {
        self.rooms()?.to(room, Message::new(event, args));
        Ok(())
    }
}

fn validate_method(method: &str) -> Result<(), InvokeError> {
    if method.is_empty() {
        return Err(InvokeError::EmptyMethod);
    }
    if Method::is_control(method) {
        return Err(InvokeError::ReservedMethod(method.to_string()));
    }
    Ok(())
}

/// A cancelled receiver means the completion was dropped by a teardown.
fn settle(result: Result<Outcome, oneshot::Canceled>) -> Outcome {
    result.unwrap_or(Err(CallError::ConnectionClosed))
}

fn spawn_callback(
    receiver: oneshot::Receiver<Outcome>,
    callback: impl FnOnce(Outcome) + Send + 'static,
) {
    async_std::task::spawn(async move {
        if let Ok(outcome) = receiver.await {
            callback(outcome)
        }
    });
}

/// Builder for a [Channel].
///
/// ```
/// # use invoke_channel::{Channel, Config, Handlers};
/// # async_std::task::block_on(async {
/// let (local, _remote) = invoke_channel::memory::pair();
/// let (channel, _events) = Channel::builder(Handlers::new())
///     .config(Config::initiator())
///     .reconnection(|| false)
///     .connect(local.sink, local.stream)
///     .unwrap();
/// assert!(channel.socket().is_bound("ping"));
/// # });
/// ```
pub struct ChannelBuilder {
    handlers: Handlers,
    config: Config,
    reconnection: Option<Arc<dyn Reconnection>>,
    rooms: Option<Arc<dyn Rooms>>,
    binder: Binder,
}

impl std::fmt::Debug for ChannelBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBuilder")
            .field("handlers", &self.handlers)
            .field("config", &self.config)
            .field("reconnection", &self.reconnection.is_some())
            .field("rooms", &self.rooms.is_some())
            .field("binder", &self.binder)
            .finish()
    }
}

impl ChannelBuilder {
    pub fn new(handlers: Handlers) -> Self {
        Self {
            handlers,
            config: Config::default(),
            reconnection: None,
            rooms: None,
            binder: Binder::with_builtins(),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    /// Reconnection policy of an initiator socket. Without one every
    /// disconnect is final.
    pub fn reconnection(mut self, reconnection: impl Reconnection) -> Self {
        self.reconnection = Some(Arc::new(reconnection));
        self
    }

    /// Room support of a responder socket.
    pub fn rooms(mut self, rooms: impl Rooms) -> Self {
        self.rooms = Some(Arc::new(rooms));
        self
    }

    /// Declare an additional method that is bound on the [Socket] handle.
    ///
    /// Reserved and duplicate names make [ChannelBuilder::connect] fail.
    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Channel, Vec<Value>) -> Call<Vec<Value>> + Send + Sync + 'static,
    {
        let method: MethodFn = Arc::new(f);
        self.binder.add(name.into(), method);
        self
    }

    /// Wrap the socket given by `send` and `receive`.
    ///
    /// Spawns a task that forwards outgoing messages to `send` and a task
    /// that dispatches everything received from `receive`.
    pub fn connect<Si, St>(self, send: Si, receive: St) -> Result<(Channel, Events), BindError>
    where
        Si: Sink<Message> + Send + 'static,
        Si::Error: std::error::Error + Send + Sync + 'static,
        St: Stream<Item = SocketEvent> + Send + Unpin + 'static,
    {
        self.binder.validate()?;
        let ChannelBuilder {
            handlers,
            config,
            reconnection,
            rooms,
            binder,
        } = self;

        let (outgoing, outgoing_receiver) = Outgoing::new(&config.control_event);
        let (events_sender, events_receiver) = mpsc::unbounded();
        let (shutdown_sender, shutdown_receiver) = mpsc::unbounded();
        tracing::debug!(role = ?config.role, "connecting channel");

        let inner = Arc::new_cyclic(|weak| Inner {
            config,
            handlers,
            pending: CorrelationTable::new(),
            outgoing,
            events: events_sender,
            bindings: Arc::new(binder.bind(weak.clone())),
            reconnection,
            rooms,
            destroyed: AtomicBool::new(false),
            shutdown: shutdown_sender,
        });

        async_std::task::spawn(async move {
            let result = outgoing_receiver
                .map(Ok)
                .forward(send.sink_map_err(anyhow::Error::from))
                .await;
            if let Err(error) = result {
                tracing::warn!(?error, "failed to send message");
            }
        });
        async_std::task::spawn(crate::dispatcher::run(
            Arc::clone(&inner),
            receive,
            shutdown_receiver,
        ));

        Ok((
            Channel { inner },
            Events {
                receiver: events_receiver,
            },
        ))
    }
}
