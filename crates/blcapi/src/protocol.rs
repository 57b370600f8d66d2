//! Wire protocol of the forwarding service.
//!
//! Every frame is a JSON text message carrying a `{cmd, data}` envelope. The
//! shape of `data` is fixed per command and is decoded by [`crate::models`].

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::Result;

/// Command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Heartbeat = 0,
    JoinRoom = 1,
    AddText = 2,
    AddGift = 3,
    AddMember = 4,
    AddSuperChat = 5,
    DelSuperChat = 6,
    UpdateTranslation = 7,
    FatalError = 8,
}

impl Command {
    /// Numeric code on the wire.
    pub fn code(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for Command {
    type Error = i64;

    fn try_from(value: i64) -> std::result::Result<Self, i64> {
        match value {
            0 => Ok(Self::Heartbeat),
            1 => Ok(Self::JoinRoom),
            2 => Ok(Self::AddText),
            3 => Ok(Self::AddGift),
            4 => Ok(Self::AddMember),
            5 => Ok(Self::AddSuperChat),
            6 => Ok(Self::DelSuperChat),
            7 => Ok(Self::UpdateTranslation),
            8 => Ok(Self::FatalError),
            other => Err(other),
        }
    }
}

/// The `{cmd, data}` unit exchanged with the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub cmd: i64,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(cmd: Command, data: Value) -> Self {
        Self {
            cmd: cmd.code(),
            data,
        }
    }

    /// Heartbeat envelope, `data` is an empty object.
    pub fn heartbeat() -> Self {
        Self::new(Command::Heartbeat, json!({}))
    }

    /// Join-room envelope for `room_key`.
    ///
    /// `auto_translate` is only sent when set, the server picks its own
    /// default otherwise.
    pub fn join_room(room_key: &RoomKey, auto_translate: Option<bool>) -> Self {
        let mut data = json!({ "roomKey": room_key });
        if let Some(auto_translate) = auto_translate {
            data["config"] = json!({ "autoTranslate": auto_translate });
        }
        Self::new(Command::JoinRoom, data)
    }

    /// The known command of this envelope, if any.
    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.cmd).ok()
    }

    /// Parse an inbound text frame.
    pub fn from_text(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a WebSocket text frame.
    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::text(serde_json::to_string(self)?))
    }
}

/// How a room is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RoomKeyType {
    RoomId = 1,
    AuthCode = 2,
}

impl TryFrom<u8> for RoomKeyType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            1 => Ok(Self::RoomId),
            2 => Ok(Self::AuthCode),
            other => Err(other),
        }
    }
}

/// Identifies the room to join.
///
/// Auth codes are credentials, so both `Display` and `Debug` only reveal the
/// last three characters.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    /// Numeric live room id
    RoomId(u64),
    /// Streamer identity code
    AuthCode(String),
}

impl RoomKey {
    pub fn room_id(id: u64) -> Self {
        Self::RoomId(id)
    }

    pub fn auth_code(code: impl Into<String>) -> Self {
        Self::AuthCode(code.into())
    }

    pub fn kind(&self) -> RoomKeyType {
        match self {
            Self::RoomId(_) => RoomKeyType::RoomId,
            Self::AuthCode(_) => RoomKeyType::AuthCode,
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoomId(id) => write!(f, "{id}"),
            Self::AuthCode(code) => {
                let skip = code.chars().count().saturating_sub(3);
                let tail: String = code.chars().skip(skip).collect();
                write!(f, "***{tail}")
            }
        }
    }
}

impl fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Serialize, Deserialize)]
struct RawRoomKey {
    #[serde(rename = "type")]
    kind: u8,
    value: Value,
}

impl Serialize for RoomKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let value = match self {
            Self::RoomId(id) => json!(id),
            Self::AuthCode(code) => json!(code),
        };
        RawRoomKey {
            kind: self.kind() as u8,
            value,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RoomKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error;

        let raw = RawRoomKey::deserialize(deserializer)?;
        let kind = RoomKeyType::try_from(raw.kind)
            .map_err(|t| D::Error::custom(format!("unknown room key type {t}")))?;
        match (kind, raw.value) {
            (RoomKeyType::RoomId, Value::Number(n)) => n
                .as_u64()
                .map(Self::RoomId)
                .ok_or_else(|| D::Error::custom(format!("invalid room id {n}"))),
            (RoomKeyType::RoomId, Value::String(s)) => s
                .trim()
                .parse()
                .map(Self::RoomId)
                .map_err(|_| D::Error::custom(format!("invalid room id {s:?}"))),
            (RoomKeyType::AuthCode, Value::String(s)) => Ok(Self::AuthCode(s)),
            (RoomKeyType::AuthCode, Value::Number(n)) => Ok(Self::AuthCode(n.to_string())),
            (_, other) => Err(D::Error::custom(format!(
                "room key value must be a number or string, got {other}"
            ))),
        }
    }
}
