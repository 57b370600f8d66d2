//! Connection factory used by the client.
//!
//! [`Connector`] plays the role of a connection pool: it may be shared by many
//! clients, in which case the caller owns it and is responsible for closing it.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info};

use crate::error::{BlcError, Result};
use crate::protocol::Envelope;

type FrameSink = Pin<Box<dyn Sink<Message, Error = BlcError> + Send>>;
type FrameStream = Pin<Box<dyn Stream<Item = Result<Message>> + Send>>;

/// An open, message oriented connection.
pub struct Connection {
    sink: FrameSink,
    stream: FrameStream,
}

impl Connection {
    /// Wrap a WebSocket stream (or anything shaped like one).
    pub fn new<S, E>(inner: S) -> Self
    where
        S: Sink<Message, Error = E> + Stream<Item = std::result::Result<Message, E>> + Send + 'static,
        E: Into<BlcError> + 'static,
    {
        let (sink, stream) = inner.split();
        Self::from_parts(
            sink.sink_map_err(|e: E| e.into()),
            stream.map(|item| item.map_err(|e: E| e.into())),
        )
    }

    /// Build a connection from separate halves.
    pub fn from_parts<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Message, Error = BlcError> + Send + 'static,
        St: Stream<Item = Result<Message>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Send one envelope as a text frame.
    pub async fn send_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        self.sink.send(envelope.to_message()?).await
    }

    /// Next inbound frame, `None` once the peer is gone.
    pub async fn next_frame(&mut self) -> Option<Result<Message>> {
        self.stream.next().await
    }
}

/// Opens connections to the forwarding service.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection to `url`.
    async fn connect(&self, url: &str) -> Result<Connection>;

    /// Release the connector's resources. Connecting afterwards fails.
    async fn close(&self) {}
}

/// [`Connector`] backed by `tokio-tungstenite`.
#[derive(Debug)]
pub struct WsConnector {
    connect_timeout: Duration,
    closed: AtomicBool,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Connection> {
        if self.is_closed() {
            return Err(BlcError::connection("connector is closed"));
        }

        debug!("Connecting to WebSocket: {}", url);
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| BlcError::Timeout(self.connect_timeout))??;
        info!("Connected to WebSocket: {}", url);

        Ok(Connection::new(ws_stream))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
