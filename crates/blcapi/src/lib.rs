//! blcapi: client for the blivechat message forwarding service.
//!
//! The client keeps one WebSocket connection to a blivechat server, joins a
//! live room and hands every pushed event to a handler. Lost connections are
//! re-established with a capped backoff; only a fatal error from the server
//! stops the client on its own.
//!
//! ## Core Types
//!
//! - [`BlivechatClient`] - Connection lifecycle: start, stop, reconnect, heartbeat
//! - [`RoomKey`] - Room id or (redacted) auth code identifying the room
//! - [`Envelope`] - The `{cmd, data}` wire unit
//!
//! ## Handling messages
//!
//! - [`MessageHandler`] - Typed callbacks with no-op defaults
//! - [`Dispatcher`] - Dispatch table decoding envelopes for a [`MessageHandler`]
//! - [`Handler`] - Raw envelope handler installed on the client
//!
//! ```no_run
//! use blcapi::{BlivechatClient, ClientConfig, Dispatcher, HandlerResult, MessageHandler, RoomKey};
//! use blcapi::models::AddTextMsg;
//!
//! struct Printer;
//!
//! impl MessageHandler for Printer {
//!     fn on_add_text(&self, _client: &BlivechatClient, message: &AddTextMsg) -> HandlerResult {
//!         println!("{}: {}", message.author_name, message.content);
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() {
//! let client = BlivechatClient::new(ClientConfig::new(RoomKey::room_id(92384)));
//! client.set_handler(Dispatcher::new(Printer));
//! client.start();
//! client.await_stopped().await;
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod models;
pub mod protocol;
pub mod transport;

pub use client::{BlivechatClient, ClientState, reconnect_interval};
pub use config::ClientConfig;
pub use error::{BlcError, Result};
pub use handler::{Dispatcher, Handler, HandlerResult, MessageHandler};
pub use models::{FatalErrorType, FromCommand, LiveMessage};
pub use protocol::{Command, Envelope, RoomKey, RoomKeyType};
pub use transport::{Connection, Connector, WsConnector};
