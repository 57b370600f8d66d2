//! Connection lifecycle of the forwarding service client.
//!
//! A running client owns one background task that loops through
//! connect -> join -> receive -> teardown -> backoff until it is stopped or
//! the server sends a fatal error. Heartbeats, frame reads and cancellation
//! are all branches of the same `select!`, so only that task ever touches the
//! connection.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{BlcError, Result};
use crate::handler::Handler;
use crate::models::{FatalErrorMsg, FromCommand};
use crate::protocol::{Command, Envelope, RoomKey};
use crate::transport::{Connection, Connector, WsConnector};

/// Upper bound of the reconnect delay in seconds.
const MAX_RECONNECT_INTERVAL_SECS: u32 = 10;

/// Delay before reconnect attempt number `retry_count` (starting at 1).
///
/// Grows by two seconds per consecutive failure and is capped at ten, so a
/// public server is never hammered.
pub fn reconnect_interval(retry_count: u32) -> Duration {
    let secs = retry_count
        .saturating_sub(1)
        .saturating_mul(2)
        .saturating_add(1)
        .min(MAX_RECONNECT_INTERVAL_SECS);
    Duration::from_secs(u64::from(secs))
}

/// Where the background task currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Never started
    Idle,
    Connecting,
    /// Connected, sending the join request
    Joining,
    /// Receiving messages
    Active,
    /// Tearing down the current connection
    Closing,
    /// Waiting before the next attempt
    Backoff,
    /// Task ended, by request or because of a fatal error
    Stopped,
}

/// How a single connection ended without an error.
#[derive(Debug, PartialEq)]
enum SessionEnd {
    Closed,
    Cancelled,
}

#[derive(Debug, PartialEq)]
enum FrameOutcome {
    /// Dispatched, counts as a healthy connection
    Handled,
    /// Control or unsupported frame
    Ignored,
    Closed,
}

struct RunningTask {
    cancel: CancellationToken,
    stopped: watch::Receiver<bool>,
}

struct ClientInner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    /// Whether `connector` was created by this client
    owns_connector: bool,
    handler: RwLock<Option<Arc<dyn Handler>>>,
    task: Mutex<Option<RunningTask>>,
    state: watch::Sender<ClientState>,
    retry_count: AtomicU32,
}

/// Client of the blivechat message forwarding service.
///
/// This is a cheap handle, clones share the same background task.
#[derive(Clone)]
pub struct BlivechatClient {
    inner: Arc<ClientInner>,
}

impl BlivechatClient {
    /// Create a client with its own WebSocket connector, released by
    /// [`release`](Self::release).
    pub fn new(config: ClientConfig) -> Self {
        let connector = Arc::new(WsConnector::new(config.connect_timeout));
        Self::build(config, connector, true)
    }

    /// Create a client using a caller supplied connector.
    ///
    /// The connector may be shared with other clients and is never closed by
    /// this client.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self::build(config, connector, false)
    }

    fn build(config: ClientConfig, connector: Arc<dyn Connector>, owns_connector: bool) -> Self {
        let (state, _) = watch::channel(ClientState::Idle);
        Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                owns_connector,
                handler: RwLock::new(None),
                task: Mutex::new(None),
                state,
                retry_count: AtomicU32::new(0),
            }),
        }
    }

    /// The room this client joins.
    pub fn room_key(&self) -> &RoomKey {
        &self.inner.config.room_key
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Whether the background task exists. Still `true` after [`stop`](Self::stop)
    /// until the task has actually finished.
    pub fn is_running(&self) -> bool {
        self.inner.task.lock().is_some()
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions of the background task.
    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.inner.state.subscribe()
    }

    /// Consecutive failed connection cycles, reset by every handled message.
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count.load(Ordering::SeqCst)
    }

    /// Install or replace the message handler.
    ///
    /// The handler runs on the receive task; see [`Handler`] for what that
    /// implies.
    pub fn set_handler<H: Handler>(&self, handler: H) {
        *self.inner.handler.write() = Some(Arc::new(handler));
    }

    /// Remove the message handler.
    pub fn clear_handler(&self) {
        *self.inner.handler.write() = None;
    }

    /// Start the background task. Must be called within a Tokio runtime.
    pub fn start(&self) {
        let cancel = CancellationToken::new();
        let (stopped_tx, stopped_rx) = watch::channel(false);
        {
            let mut task = self.inner.task.lock();
            if task.is_some() {
                warn!(room = %self.room_key(), "Client is running, cannot start() again");
                return;
            }
            *task = Some(RunningTask {
                cancel: cancel.clone(),
                stopped: stopped_rx,
            });
        }

        let client = self.clone();
        tokio::spawn(async move {
            client.run_task(cancel).await;
            let _ = stopped_tx.send(true);
        });
    }

    /// Request the background task to stop. Does not wait for it.
    pub fn stop(&self) {
        let task = self.inner.task.lock();
        match task.as_ref() {
            Some(task) => task.cancel.cancel(),
            None => warn!(room = %self.room_key(), "Client is stopped, cannot stop() again"),
        }
    }

    /// Wait until the background task has finished.
    pub async fn await_stopped(&self) {
        let stopped = {
            let task = self.inner.task.lock();
            match task.as_ref() {
                Some(task) => task.stopped.clone(),
                None => {
                    warn!(room = %self.room_key(), "Client is stopped, cannot await_stopped()");
                    return;
                }
            }
        };

        let mut stopped = stopped;
        // A dropped sender means the task is gone as well.
        let _ = stopped.wait_for(|done| *done).await;
    }

    /// Stop, wait for the task, then release owned resources. The client is
    /// unusable afterwards.
    pub async fn stop_and_release(&self) {
        if self.is_running() {
            self.stop();
            self.await_stopped().await;
        }
        self.release().await;
    }

    /// Release owned resources. A caller supplied connector is left alone.
    pub async fn release(&self) {
        if self.is_running() {
            warn!(room = %self.room_key(), "Calling release() while the client is running");
        }

        if self.inner.owns_connector {
            self.inner.connector.close().await;
        }
    }

    fn handler(&self) -> Option<Arc<dyn Handler>> {
        self.inner.handler.read().clone()
    }

    fn set_state(&self, state: ClientState) {
        self.inner.state.send_replace(state);
    }

    fn set_retry_count(&self, retry_count: u32) {
        self.inner.retry_count.store(retry_count, Ordering::SeqCst);
    }

    async fn run_task(&self, cancel: CancellationToken) {
        let error = match self.run(&cancel).await {
            Ok(()) => None,
            Err(e) => {
                error!(room = %self.room_key(), "Client stopped with error: {}", e);
                Some(e)
            }
        };
        debug!(room = %self.room_key(), "Network task finished");

        self.set_state(ClientState::Stopped);
        *self.inner.task.lock() = None;

        // Not running anymore, so the handler may start() us again.
        if let Some(handler) = self.handler() {
            let stopped = panic::catch_unwind(AssertUnwindSafe(|| {
                handler.on_client_stopped(self, error.as_ref())
            }));
            if let Err(panic) = stopped {
                error!(
                    room = %self.room_key(),
                    "on_client_stopped() panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
    }

    /// Reconnect loop. `Ok` on cancellation, `Err` only for fatal errors.
    async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let mut retry_count = 0u32;
        self.set_retry_count(0);

        loop {
            match self.run_session(cancel, &mut retry_count).await {
                Ok(SessionEnd::Cancelled) => return Ok(()),
                Ok(SessionEnd::Closed) => {
                    debug!(room = %self.room_key(), "Connection closed");
                }
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    debug!(room = %self.room_key(), "Connection lost: {}", e);
                }
            }

            retry_count += 1;
            self.set_retry_count(retry_count);
            warn!(
                room = %self.room_key(),
                retry_count,
                "Reconnecting"
            );

            self.set_state(ClientState::Backoff);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(reconnect_interval(retry_count)) => {}
            }
        }
    }

    /// One connect -> join -> receive cycle.
    async fn run_session(
        &self,
        cancel: &CancellationToken,
        retry_count: &mut u32,
    ) -> Result<SessionEnd> {
        self.set_state(ClientState::Connecting);
        let mut conn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            conn = self.inner.connector.connect(&self.inner.config.ws_url) => conn?,
        };

        let result = self.drive(&mut conn, cancel, retry_count).await;

        // Heartbeats belong to `drive`, dropping the connection is all that's left.
        self.set_state(ClientState::Closing);
        drop(conn);
        result
    }

    async fn drive(
        &self,
        conn: &mut Connection,
        cancel: &CancellationToken,
        retry_count: &mut u32,
    ) -> Result<SessionEnd> {
        let config = &self.inner.config;

        // Sends are bounded by the read deadline too, a peer that stopped
        // reading must not park us inside a send.
        let read_timeout = config.read_timeout();
        let mut read_deadline = Instant::now() + read_timeout;

        self.set_state(ClientState::Joining);
        let join = Envelope::join_room(&config.room_key, config.auto_translate);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            _ = tokio::time::sleep_until(read_deadline) => {
                return Err(BlcError::Timeout(read_timeout));
            }
            sent = conn.send_envelope(&join) => sent?,
        }

        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + config.heartbeat_interval,
            config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let heartbeat_envelope = Envelope::heartbeat();

        self.set_state(ClientState::Active);
        info!(room = %self.room_key(), "Joined room");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),

                _ = heartbeat.tick() => {
                    let sent = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                        _ = tokio::time::sleep_until(read_deadline) => {
                            return Err(BlcError::Timeout(read_timeout));
                        }
                        sent = conn.send_envelope(&heartbeat_envelope) => sent,
                    };
                    match sent {
                        Ok(()) => trace!(room = %self.room_key(), "Sent heartbeat"),
                        Err(e) => warn!(room = %self.room_key(), "Failed to send heartbeat: {}", e),
                    }
                }

                _ = tokio::time::sleep_until(read_deadline) => {
                    return Err(BlcError::Timeout(read_timeout));
                }

                frame = conn.next_frame() => {
                    let Some(frame) = frame else {
                        return Ok(SessionEnd::Closed);
                    };
                    read_deadline = Instant::now() + read_timeout;

                    match self.on_frame(frame?)? {
                        FrameOutcome::Handled => {
                            // At least one usable message, the connection is healthy.
                            *retry_count = 0;
                            self.set_retry_count(0);
                        }
                        FrameOutcome::Ignored => {}
                        FrameOutcome::Closed => return Ok(SessionEnd::Closed),
                    }
                }
            }
        }
    }

    fn on_frame(&self, message: Message) -> Result<FrameOutcome> {
        match message {
            Message::Text(text) => {
                self.handle_text(text.as_str())?;
                Ok(FrameOutcome::Handled)
            }
            Message::Close(frame) => {
                debug!(room = %self.room_key(), ?frame, "Server closed the connection");
                Ok(FrameOutcome::Closed)
            }
            Message::Ping(_) | Message::Pong(_) => {
                trace!(room = %self.room_key(), "Received ping/pong");
                Ok(FrameOutcome::Ignored)
            }
            other => {
                warn!(
                    room = %self.room_key(),
                    "Unknown websocket message type, data={:?}",
                    other
                );
                Ok(FrameOutcome::Ignored)
            }
        }
    }

    fn handle_text(&self, text: &str) -> Result<()> {
        let result = Envelope::from_text(text).and_then(|envelope| self.handle_command(&envelope));
        if let Err(e) = &result
            && e.is_decode()
        {
            error!(room = %self.room_key(), body = text, "Failed to decode command: {}", e);
        }
        result
    }

    fn handle_command(&self, envelope: &Envelope) -> Result<()> {
        let mut decode_error = None;

        if let Some(handler) = self.handler() {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(self, envelope))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_decode() => decode_error = Some(e),
                Ok(Err(e)) => {
                    error!(room = %self.room_key(), ?envelope, "Handler failed: {}", e);
                }
                Err(panic) => {
                    error!(
                        room = %self.room_key(),
                        ?envelope,
                        "Handler panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        // Stop even if the handler choked on the fatal command itself.
        if envelope.command() == Some(Command::FatalError) {
            return Err(FatalErrorMsg::from_command(&envelope.data)?.into_error());
        }

        match decode_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1)]
    #[case(2, 3)]
    #[case(3, 5)]
    #[case(4, 7)]
    #[case(5, 9)]
    #[case(6, 10)]
    #[case(7, 10)]
    #[case(100, 10)]
    #[case(u32::MAX, 10)]
    fn test_reconnect_interval(#[case] retry_count: u32, #[case] secs: u64) {
        assert_eq!(reconnect_interval(retry_count), Duration::from_secs(secs));
    }

    #[test]
    fn test_reconnect_interval_never_exceeds_cap() {
        assert!((1..1000).all(|n| reconnect_interval(n) <= Duration::from_secs(10)));
    }

    #[test]
    fn test_panic_message() {
        let panic = panic::catch_unwind(|| {
            panic!("boom");
        })
        .unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "boom");

        let panic = panic::catch_unwind(|| {
            panic!("{} {}", "formatted", 1);
        })
        .unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "formatted 1");
    }

    #[test]
    fn test_new_client_is_idle() {
        let client = BlivechatClient::new(ClientConfig::new(RoomKey::auth_code("abcdef123")));
        assert!(!client.is_running());
        assert_eq!(client.state(), ClientState::Idle);
        assert_eq!(client.retry_count(), 0);
        assert_eq!(client.room_key().to_string(), "***123");
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_noop() {
        let client = BlivechatClient::new(ClientConfig::new(RoomKey::room_id(1)));
        client.stop();
        client.stop();
        client.await_stopped().await;
        assert!(!client.is_running());
    }

    #[tokio::test]
    async fn test_release_closes_owned_connector() {
        let client = BlivechatClient::new(ClientConfig::new(RoomKey::room_id(1)));
        client.release().await;

        let err = client
            .inner
            .connector
            .connect("ws://127.0.0.1:1")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BlcError::Connection(_)));
    }
}
