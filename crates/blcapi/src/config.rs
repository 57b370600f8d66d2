//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::RoomKey;

/// Default endpoint of a locally running blivechat server.
pub const DEFAULT_WS_URL: &str = "ws://localhost:12450/api/chat";

/// Default heartbeat interval in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Extra time granted on top of the heartbeat interval before a silent peer
/// is considered dead.
const READ_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Configuration for a [`BlivechatClient`](crate::BlivechatClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint of the forwarding service
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Room to join
    pub room_key: RoomKey,
    /// Interval between heartbeats
    #[serde(default = "default_heartbeat_interval", with = "duration_secs")]
    pub heartbeat_interval: Duration,
    /// Timeout for establishing a connection (only used by the built-in connector)
    #[serde(default = "default_connect_timeout", with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Ask the server to translate messages, server default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_translate: Option<bool>,
}

fn default_ws_url() -> String {
    DEFAULT_WS_URL.to_string()
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)
}

impl ClientConfig {
    /// Config for `room_key` on the default endpoint.
    pub fn new(room_key: RoomKey) -> Self {
        Self {
            ws_url: default_ws_url(),
            room_key,
            heartbeat_interval: default_heartbeat_interval(),
            connect_timeout: default_connect_timeout(),
            auto_translate: None,
        }
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into();
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_auto_translate(mut self, auto_translate: bool) -> Self {
        self.auto_translate = Some(auto_translate);
        self
    }

    /// How long to wait for a frame before dropping the connection.
    pub fn read_timeout(&self) -> Duration {
        self.heartbeat_interval + READ_TIMEOUT_MARGIN
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        use serde::de::Error;

        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
