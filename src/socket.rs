//! Types shared with the underlying event socket.
use serde_json::Value;

/// A fire-and-forget event exchanged with the peer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub event: String,
    pub args: Vec<Value>,
}

impl Message {
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }
}

/// Everything the underlying socket reports to its owner.
///
/// The end of the inbound stream means the socket is gone and is handled like
/// a disconnect without reconnection.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Message(Message),
    /// Connectivity was lost.
    Disconnect,
    /// Connectivity was restored after a [SocketEvent::Disconnect].
    Reconnect,
    /// The socket gave up reconnecting.
    ReconnectFailed,
}

/// Reports whether an initiator socket is still trying to reconnect.
///
/// Implemented for closures, e.g. `move || flag.load(Ordering::SeqCst)`.
pub trait Reconnection: Send + Sync + 'static {
    fn is_active(&self) -> bool;
}

impl<F> Reconnection for F
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    fn is_active(&self) -> bool {
        self()
    }
}

/// Room grouping of a responder socket.
///
/// Channels only forward to these methods, they never implement grouping.
pub trait Rooms: Send + Sync + 'static {
    fn join(&self, room: &str);

    fn leave(&self, room: &str);

    fn leave_all(&self);

    /// Send `message` to every socket in `room`.
    fn to(&self, room: &str, message: Message);
}
