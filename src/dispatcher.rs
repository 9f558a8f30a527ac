use futures::channel::mpsc;
use futures::prelude::*;
use serde_json::Value;
use std::sync::Arc;

use crate::channel::{Event, Inner};
use crate::config::Role;
use crate::envelope::{decode_broadcast, decode_reply, Envelope, Method};
use crate::error::{CallError, RemoteError};
use crate::handlers::Reply;
use crate::socket::{Message, SocketEvent};

/// What to do after an inbound event was handled.
#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Teardown,
}

/// Dispatch everything received from the socket until the channel is torn
/// down or the socket goes away.
#[tracing::instrument(skip(inner, receive, shutdown))]
pub(crate) async fn run(
    inner: Arc<Inner>,
    receive: impl Stream<Item = SocketEvent> + Unpin + Send + 'static,
    shutdown: mpsc::UnboundedReceiver<()>,
) {
    let mut receive = receive.take_until(shutdown.into_future());
    while let Some(event) = receive.next().await {
        if handle_event(&inner, event) == Flow::Teardown {
            break;
        }
    }
    tracing::trace!("dispatcher finished");
    inner.destroy();
}

fn handle_event(inner: &Inner, event: SocketEvent) -> Flow {
    match event {
        SocketEvent::Message(message) => {
            if message.event == inner.config.control_event {
                handle_control(inner, message);
            } else {
                inner.emit_local(Event::Message(message));
            }
            Flow::Continue
        }
        SocketEvent::Disconnect => {
            inner.emit_local(Event::Disconnect);
            if inner.reconnecting() {
                tracing::debug!("disconnected, waiting for reconnect");
                Flow::Continue
            } else {
                Flow::Teardown
            }
        }
        SocketEvent::Reconnect => {
            tracing::debug!("reconnected");
            inner.emit_local(Event::Reconnect);
            Flow::Continue
        }
        SocketEvent::ReconnectFailed => match inner.config.role {
            Role::Initiator => Flow::Teardown,
            Role::Responder => {
                tracing::trace!("ignoring reconnect failure on responder");
                Flow::Continue
            }
        },
    }
}

fn handle_control(inner: &Inner, message: Message) {
    let envelope = match Envelope::parse(message.args) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(?error, "dropping malformed envelope");
            return;
        }
    };
    tracing::trace!(?envelope, "handle envelope");
    let Envelope {
        id,
        method,
        payload,
    } = envelope;
    let reply = || Reply::new(id, inner.outgoing.clone());
    match method {
        Method::Reply => handle_reply(inner, id, payload),
        Method::EmitSafe => match decode_broadcast(payload) {
            Ok(message) => {
                inner.emit_local(Event::Message(message));
                reply().done()
            }
            Err(error) => {
                tracing::warn!(?error, "malformed broadcast");
                reply().err(RemoteError::from_error(&error))
            }
        },
        Method::Ping => reply().ok(&now_millis()),
        Method::Call(name) => inner.handlers.handle(&name, payload, reply()),
    }
}

fn handle_reply(inner: &Inner, id: u32, payload: Value) {
    let outcome = match decode_reply(payload) {
        Ok(result) => result.map_err(CallError::Remote),
        Err(error) => {
            tracing::warn!(id, ?error, "dropping malformed reply");
            return;
        }
    };
    if !inner.pending.resolve(id, outcome) {
        tracing::debug!(id, "reply without pending call");
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::{Channel, Events};
    use crate::config::Config;
    use crate::envelope::DEFAULT_CONTROL_EVENT;
    use crate::handlers::Handlers;
    use serde_json::json;

    /// A channel connected to plain queues so tests see the raw wire traffic.
    struct TestSocket {
        channel: Channel,
        events: Events,
        inbound: mpsc::UnboundedSender<SocketEvent>,
        outbound: mpsc::UnboundedReceiver<Message>,
    }

    impl TestSocket {
        fn new(handlers: Handlers, config: Config) -> Self {
            let (inbound, receive) = mpsc::unbounded();
            let (send, outbound) = mpsc::unbounded();
            let (channel, events) = Channel::builder(handlers)
                .config(config)
                .connect(send, receive)
                .unwrap();
            Self {
                channel,
                events,
                inbound,
                outbound,
            }
        }

        fn receive_envelope(&self, id: u32, method: Method, payload: Value) {
            let message = Envelope {
                id,
                method,
                payload,
            }
            .into_message(DEFAULT_CONTROL_EVENT);
            self.inbound
                .unbounded_send(SocketEvent::Message(message))
                .unwrap();
        }

        fn receive(&self, event: SocketEvent) {
            self.inbound.unbounded_send(event).unwrap();
        }

        async fn sent_envelope(&mut self) -> Envelope {
            let message = self.outbound.next().await.unwrap();
            assert_eq!(message.event, DEFAULT_CONTROL_EVENT);
            Envelope::parse(message.args).unwrap()
        }
    }

    #[async_std::test]
    async fn answer_ping() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut socket = TestSocket::new(Handlers::new(), Config::responder());

        socket.receive_envelope(5, Method::Ping, Value::Null);
        let envelope = socket.sent_envelope().await;
        assert_eq!(envelope.id, 5);
        assert_eq!(envelope.method, Method::Reply);
        assert_eq!(envelope.payload[0], Value::Null);
        assert!(envelope.payload[1].as_u64().unwrap() > 0);
    }

    #[async_std::test]
    async fn answer_broadcast() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut socket = TestSocket::new(Handlers::new(), Config::responder());

        socket.receive_envelope(3, Method::EmitSafe, json!(["greeting", "hi", 1]));
        assert_eq!(
            socket.events.next().await,
            Some(Event::Message(Message::new(
                "greeting",
                vec![json!("hi"), json!(1)]
            )))
        );
        let envelope = socket.sent_envelope().await;
        assert_eq!(envelope.id, 3);
        assert_eq!(envelope.payload, json!([null]));

        socket.receive_envelope(4, Method::EmitSafe, json!({}));
        let envelope = socket.sent_envelope().await;
        assert_eq!(envelope.id, 4);
        assert!(envelope.payload[0]["message"].is_string());
    }

    #[async_std::test]
    async fn plain_events_pass_through() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut socket = TestSocket::new(Handlers::new(), Config::initiator());

        let message = Message::new("chat", vec![json!("hello")]);
        socket.receive(SocketEvent::Message(message.clone()));
        assert_eq!(socket.events.next().await, Some(Event::Message(message)));
    }

    #[async_std::test]
    async fn malformed_envelope_is_dropped() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut socket = TestSocket::new(Handlers::new(), Config::responder());

        socket.receive(SocketEvent::Message(Message::new(
            DEFAULT_CONTROL_EVENT,
            vec![json!(0), json!("_____rtm_ping")],
        )));
        socket.receive_envelope(6, Method::Ping, Value::Null);
        assert_eq!(socket.sent_envelope().await.id, 6);
    }

    #[async_std::test]
    async fn reply_resolves_call() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut socket = TestSocket::new(Handlers::new(), Config::initiator());

        let call = socket
            .channel
            .invoke_async("getTime", json!({"zone": "UTC"}))
            .unwrap();
        let request = socket.sent_envelope().await;
        assert_eq!(request.method, Method::Call("getTime".to_string()));
        assert_eq!(request.payload, json!({"zone": "UTC"}));
        assert_eq!(socket.channel.pending_calls(), 1);

        // Replies for unknown ids are ignored.
        socket.receive_envelope(request.id + 100, Method::Reply, json!([null, 1]));
        socket.receive_envelope(request.id, Method::Reply, json!([null, 42, "x"]));
        assert_eq!(call.await, Ok(vec![json!(42), json!("x")]));
        assert_eq!(socket.channel.pending_calls(), 0);
    }

    #[async_std::test]
    async fn error_reply_fails_call() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut socket = TestSocket::new(Handlers::new(), Config::initiator());

        let call = socket.channel.invoke_async("fail", Value::Null).unwrap();
        let request = socket.sent_envelope().await;
        socket.receive_envelope(
            request.id,
            Method::Reply,
            json!([{"message": "nope", "code": 7, "stack": "at line 1"}]),
        );
        let error = call.await.unwrap_err();
        let remote = error.remote().unwrap();
        assert_eq!(remote.message(), "nope");
        assert_eq!(remote.field("code"), Some(&json!(7)));
        assert_eq!(remote.field("stack"), None);
    }

    #[async_std::test]
    async fn disconnect_without_reconnection_tears_down() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut socket = TestSocket::new(Handlers::new(), Config::initiator());

        let call = socket.channel.invoke_async("slow", Value::Null).unwrap();
        socket.receive(SocketEvent::Disconnect);
        assert_eq!(call.await, Err(CallError::ConnectionClosed));
        assert_eq!(socket.events.next().await, Some(Event::Disconnect));
        assert_eq!(socket.events.next().await, Some(Event::Closed));
        assert_eq!(socket.events.next().await, None);
        assert!(socket.channel.is_destroyed());
    }

    #[async_std::test]
    async fn responder_ignores_reconnect_failure() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut socket = TestSocket::new(Handlers::new(), Config::responder());

        socket.receive(SocketEvent::ReconnectFailed);
        socket.receive_envelope(1, Method::Ping, Value::Null);
        assert_eq!(socket.sent_envelope().await.id, 1);
        assert!(!socket.channel.is_destroyed());
    }

    #[async_std::test]
    async fn initiator_tears_down_on_reconnect_failure() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut socket = TestSocket::new(Handlers::new(), Config::initiator());

        socket.receive(SocketEvent::ReconnectFailed);
        assert_eq!(socket.events.next().await, Some(Event::Closed));
        assert!(socket.channel.is_destroyed());
    }

    #[async_std::test]
    async fn stream_end_tears_down() {
        let _ = tracing_subscriber::fmt::try_init();
        let TestSocket {
            channel,
            events,
            inbound,
            ..
        } = TestSocket::new(Handlers::new(), Config::responder());

        drop(inbound);
        events.closed().await;
        assert!(channel.is_destroyed());
    }
}
