//! In-process socket pair.
//!
//! Each end has a [MemorySink] that delivers messages to the other end, the
//! inbound stream of its own end and a [MemoryControl] that injects
//! connectivity events into that stream. Messages are delivered in order and
//! never dropped while the link is open.
//!
//! Closing a sink, which a channel does on teardown, closes the peer's inbound
//! stream. The peer then sees the socket as gone.
use futures::channel::mpsc;
use futures::prelude::*;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::socket::{Message, Reconnection, SocketEvent};

/// One end of a linked pair created by [pair].
#[derive(Debug)]
pub struct MemorySocket {
    pub sink: MemorySink,
    pub stream: mpsc::UnboundedReceiver<SocketEvent>,
    pub control: MemoryControl,
}

/// Create two linked socket ends.
pub fn pair() -> (MemorySocket, MemorySocket) {
    let (a_sender, a_receiver) = mpsc::unbounded();
    let (b_sender, b_receiver) = mpsc::unbounded();
    let a = MemorySocket {
        sink: MemorySink {
            peer: b_sender.clone(),
        },
        stream: a_receiver,
        control: MemoryControl::new(a_sender.clone()),
    };
    let b = MemorySocket {
        sink: MemorySink { peer: a_sender },
        stream: b_receiver,
        control: MemoryControl::new(b_sender),
    };
    (a, b)
}

#[derive(Debug, thiserror::Error)]
#[error("Memory socket is closed")]
pub struct MemoryClosed;

/// Sends messages to the peer end.
#[derive(Debug, Clone)]
pub struct MemorySink {
    peer: mpsc::UnboundedSender<SocketEvent>,
}

impl Sink<Message> for MemorySink {
    type Error = MemoryClosed;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.peer.poll_ready(cx).map_err(|_| MemoryClosed)
    }

    fn start_send(self: Pin<&mut Self>, message: Message) -> Result<(), Self::Error> {
        self.peer
            .unbounded_send(SocketEvent::Message(message))
            .map_err(|_| MemoryClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.peer.close_channel();
        Poll::Ready(Ok(()))
    }
}

/// Drives the connectivity of one end.
#[derive(Debug, Clone)]
pub struct MemoryControl {
    events: mpsc::UnboundedSender<SocketEvent>,
    reconnecting: Arc<AtomicBool>,
}

impl MemoryControl {
    fn new(events: mpsc::UnboundedSender<SocketEvent>) -> Self {
        Self {
            events,
            reconnecting: Arc::new(AtomicBool::new(false)),
        }
    }

    fn inject(&self, event: SocketEvent) {
        if self.events.unbounded_send(event).is_err() {
            tracing::debug!("memory socket closed, dropping injected event");
        }
    }

    pub fn disconnect(&self) {
        self.inject(SocketEvent::Disconnect)
    }

    pub fn reconnect(&self) {
        self.inject(SocketEvent::Reconnect)
    }

    pub fn reconnect_failed(&self) {
        self.inject(SocketEvent::ReconnectFailed)
    }

    /// Set whether this end reports an active reconnection attempt.
    pub fn set_reconnecting(&self, reconnecting: bool) {
        self.reconnecting.store(reconnecting, Ordering::SeqCst)
    }

    /// Reconnection policy backed by [MemoryControl::set_reconnecting].
    pub fn reconnection(&self) -> impl Reconnection {
        let reconnecting = Arc::clone(&self.reconnecting);
        move || reconnecting.load(Ordering::SeqCst)
    }

    /// End the inbound stream of this end.
    pub fn close(&self) {
        self.events.close_channel()
    }
}
