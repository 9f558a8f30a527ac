//! Request/response calls, acknowledged broadcast and ping on top of an
//! event socket that only knows fire-and-forget messages.
//!
//! A [Channel] wraps one socket. Calls are multiplexed over a single control
//! event and correlated with their replies by id. Every call completes exactly
//! once, either with the peer's reply or with [CallError::ConnectionClosed]
//! when the channel is torn down.
//!
//! ```
//! use invoke_channel::{memory, Channel, Config, Handlers};
//! use serde_json::json;
//!
//! # async_std::task::block_on(async {
//! let (client_socket, server_socket) = memory::pair();
//!
//! let mut handlers = Handlers::new();
//! handlers.add("add", |payload, reply| {
//!     let sum = payload[0].as_i64().unwrap_or(0) + payload[1].as_i64().unwrap_or(0);
//!     reply.ok(&sum)
//! });
//! let (_server, _server_events) = Channel::builder(handlers)
//!     .config(Config::responder())
//!     .connect(server_socket.sink, server_socket.stream)?;
//!
//! let (client, _client_events) = Channel::builder(Handlers::new())
//!     .connect(client_socket.sink, client_socket.stream)?;
//! let result = client.invoke_async("add", json!([2, 3]))?.await?;
//! assert_eq!(result, vec![json!(5)]);
//! # Ok::<(), anyhow::Error>(())
//! # }).unwrap();
//! ```
mod binder;
mod channel;
mod config;
mod correlation;
mod dispatcher;
mod envelope;
mod error;
mod handlers;
pub mod memory;
mod socket;

pub use binder::{is_reserved, Socket};
pub use channel::{Call, Channel, ChannelBuilder, Event, Events};
pub use config::{Config, Role};
pub use correlation::Outcome;
pub use envelope::{Envelope, EnvelopeParseError, Method, DEFAULT_CONTROL_EVENT};
pub use error::{BindError, CallError, InvokeError, RemoteError, RoomsError};
pub use handlers::{Handlers, Reply};
pub use socket::{Message, Reconnection, Rooms, SocketEvent};
