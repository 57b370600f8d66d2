//! Typed messages decoded from command payloads.
//!
//! Each message is decoded from the `data` field of one [`Envelope`] by
//! [`FromCommand::from_command`]. Keyed payloads go through serde directly,
//! positional payloads (`ADD_TEXT`, `UPDATE_TRANSLATION`) are read by index.
//!
//! [`Envelope`]: crate::protocol::Envelope

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BlcError, Result};
use crate::protocol::{Command, RoomKey};

/// Decode a message from the `data` field of its command.
pub trait FromCommand: Sized {
    fn from_command(data: &Value) -> Result<Self>;
}

fn keyed<T: DeserializeOwned>(what: &str, data: &Value) -> Result<T> {
    T::deserialize(data).map_err(|e| BlcError::decode(format!("{what}: {e}")))
}

/// Index-based reader for array payloads.
struct Positional<'a> {
    what: &'static str,
    items: &'a [Value],
}

impl<'a> Positional<'a> {
    fn new(what: &'static str, data: &'a Value, min_len: usize) -> Result<Self> {
        let items = data
            .as_array()
            .ok_or_else(|| BlcError::decode(format!("{what}: expected an array, got {data}")))?;
        if items.len() < min_len {
            return Err(BlcError::decode(format!(
                "{what}: expected at least {min_len} fields, got {}",
                items.len()
            )));
        }
        Ok(Self { what, items })
    }

    fn get<T: DeserializeOwned>(&self, idx: usize) -> Result<T> {
        T::deserialize(&self.items[idx])
            .map_err(|e| BlcError::decode(format!("{}[{idx}]: {e}", self.what)))
    }

    /// Flags arrive as 0/1 from most servers, booleans from some.
    fn flag(&self, idx: usize) -> Result<bool> {
        match &self.items[idx] {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
            other => Err(BlcError::decode(format!(
                "{}[{idx}]: expected a flag, got {other}",
                self.what
            ))),
        }
    }
}

fn time_of(timestamp: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
}

/// Integer code enum. Codes added by newer servers decode to `Unknown`
/// instead of failing the whole frame.
macro_rules! int_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "u8", into = "u8")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            Unknown(u8),
        }

        impl From<u8> for $name {
            fn from(value: u8) -> Self {
                match value {
                    $($value => Self::$variant,)+
                    other => Self::Unknown(other),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                match value {
                    $($name::$variant => $value,)+
                    $name::Unknown(other) => other,
                }
            }
        }
    };
}

int_enum! {
    /// Role of the message author in the room.
    AuthorType {
        Normal = 0,
        /// Guard member
        Guard = 1,
        /// Room moderator
        Admin = 2,
        /// The streamer
        RoomOwner = 3,
    }
}

int_enum! {
    /// Guard (paid membership) level.
    GuardLevel {
        None = 0,
        /// 总督
        Lv3 = 1,
        /// 提督
        Lv2 = 2,
        /// 舰长
        Lv1 = 3,
    }
}

impl GuardLevel {
    /// Display name used by the platform.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Lv3 => "总督",
            Self::Lv2 => "提督",
            Self::Lv1 => "舰长",
            Self::Unknown(_) => "",
        }
    }
}

int_enum! {
    /// Kind of content carried by a danmaku.
    ContentType {
        Text = 0,
        Emoticon = 1,
    }
}

/// Heartbeat reply from the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeartbeatMsg;

impl FromCommand for HeartbeatMsg {
    fn from_command(_data: &Value) -> Result<Self> {
        Ok(Self)
    }
}

/// Parameters that depend on [`ContentType`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContentTypeParams {
    /// Emoticon image
    Emoticon { url: String },
    /// Anything else, kept as sent
    Other(Value),
}

impl ContentTypeParams {
    pub fn emoticon_url(&self) -> Option<&str> {
        match self {
            Self::Emoticon { url } => Some(url),
            Self::Other(_) => None,
        }
    }
}

/// A danmaku (chat message).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddTextMsg {
    pub avatar_url: String,
    /// Seconds since the epoch
    pub timestamp: i64,
    pub author_name: String,
    pub author_type: AuthorType,
    pub content: String,
    pub privilege_type: GuardLevel,
    pub is_gift_danmaku: bool,
    pub author_level: i64,
    /// Not yet a full member
    pub is_newbie: bool,
    pub is_mobile_verified: bool,
    /// 0 when the author doesn't wear this room's medal
    pub medal_level: i64,
    pub id: String,
    pub translation: String,
    pub content_type: ContentType,
    pub content_type_params: ContentTypeParams,
}

impl AddTextMsg {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        time_of(self.timestamp)
    }
}

impl FromCommand for AddTextMsg {
    fn from_command(data: &Value) -> Result<Self> {
        let p = Positional::new("ADD_TEXT", data, 15)?;

        let content_type: ContentType = p.get(13)?;
        let content_type_params = match content_type {
            ContentType::Emoticon => {
                let params: Vec<String> = p.get(14)?;
                let Some(url) = params.into_iter().next() else {
                    return Err(BlcError::decode("ADD_TEXT[14]: empty emoticon parameters"));
                };
                ContentTypeParams::Emoticon { url }
            }
            ContentType::Text | ContentType::Unknown(_) => {
                ContentTypeParams::Other(p.items[14].clone())
            }
        };

        Ok(Self {
            avatar_url: p.get(0)?,
            timestamp: p.get(1)?,
            author_name: p.get(2)?,
            author_type: p.get(3)?,
            content: p.get(4)?,
            privilege_type: p.get(5)?,
            is_gift_danmaku: p.flag(6)?,
            author_level: p.get(7)?,
            is_newbie: p.flag(8)?,
            is_mobile_verified: p.flag(9)?,
            medal_level: p.get(10)?,
            id: p.get(11)?,
            translation: p.get(12)?,
            content_type,
            content_type_params,
        })
    }
}

/// A gift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddGiftMsg {
    pub id: String,
    pub avatar_url: String,
    pub timestamp: i64,
    pub author_name: String,
    /// Total price in gold seeds, 1000 = 1 CNY
    pub total_coin: i64,
    pub gift_name: String,
    pub num: i64,
}

impl AddGiftMsg {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        time_of(self.timestamp)
    }
}

impl FromCommand for AddGiftMsg {
    fn from_command(data: &Value) -> Result<Self> {
        keyed("ADD_GIFT", data)
    }
}

/// Someone bought a guard membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberMsg {
    pub id: String,
    pub avatar_url: String,
    pub timestamp: i64,
    pub author_name: String,
    pub privilege_type: GuardLevel,
}

impl AddMemberMsg {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        time_of(self.timestamp)
    }
}

impl FromCommand for AddMemberMsg {
    fn from_command(data: &Value) -> Result<Self> {
        keyed("ADD_MEMBER", data)
    }
}

/// A super chat (paid, pinned message).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSuperChatMsg {
    pub id: String,
    pub avatar_url: String,
    pub timestamp: i64,
    pub author_name: String,
    /// Price in CNY
    pub price: i64,
    pub content: String,
    pub translation: String,
}

impl AddSuperChatMsg {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        time_of(self.timestamp)
    }
}

impl FromCommand for AddSuperChatMsg {
    fn from_command(data: &Value) -> Result<Self> {
        keyed("ADD_SUPER_CHAT", data)
    }
}

/// Super chats to remove.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelSuperChatMsg {
    pub ids: Vec<String>,
}

impl FromCommand for DelSuperChatMsg {
    fn from_command(data: &Value) -> Result<Self> {
        keyed("DEL_SUPER_CHAT", data)
    }
}

/// Late translation of an earlier message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateTranslationMsg {
    pub id: String,
    pub translation: String,
}

impl FromCommand for UpdateTranslationMsg {
    fn from_command(data: &Value) -> Result<Self> {
        let p = Positional::new("UPDATE_TRANSLATION", data, 2)?;
        Ok(Self {
            id: p.get(0)?,
            translation: p.get(1)?,
        })
    }
}

/// Kind of a fatal error.
///
/// Codes this client doesn't know are kept, a fatal signal must never be
/// dropped because of its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum FatalErrorType {
    AuthCodeError,
    Other(i64),
}

impl From<i64> for FatalErrorType {
    fn from(value: i64) -> Self {
        match value {
            1 => Self::AuthCodeError,
            other => Self::Other(other),
        }
    }
}

impl From<FatalErrorType> for i64 {
    fn from(value: FatalErrorType) -> i64 {
        match value {
            FatalErrorType::AuthCodeError => 1,
            FatalErrorType::Other(code) => code,
        }
    }
}

impl fmt::Display for FatalErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthCodeError => f.write_str("AUTH_CODE_ERROR"),
            Self::Other(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}

/// The server refuses to serve this client any further.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatalErrorMsg {
    #[serde(rename = "type")]
    pub kind: FatalErrorType,
    pub msg: String,
}

impl FatalErrorMsg {
    pub fn into_error(self) -> BlcError {
        BlcError::Fatal {
            kind: self.kind,
            message: self.msg,
        }
    }
}

impl FromCommand for FatalErrorMsg {
    fn from_command(data: &Value) -> Result<Self> {
        keyed("FATAL_ERROR", data)
    }
}

/// Join request sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomMsg {
    pub room_key: RoomKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<JoinRoomConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomConfig {
    pub auto_translate: bool,
}

impl FromCommand for JoinRoomMsg {
    fn from_command(data: &Value) -> Result<Self> {
        keyed("JOIN_ROOM", data)
    }
}

/// One decoded message of any kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LiveMessage {
    Heartbeat(HeartbeatMsg),
    JoinRoom(JoinRoomMsg),
    AddText(AddTextMsg),
    AddGift(AddGiftMsg),
    AddMember(AddMemberMsg),
    AddSuperChat(AddSuperChatMsg),
    DelSuperChat(DelSuperChatMsg),
    UpdateTranslation(UpdateTranslationMsg),
    FatalError(FatalErrorMsg),
}

impl LiveMessage {
    /// Decode the payload of a known command.
    pub fn decode(cmd: Command, data: &Value) -> Result<Self> {
        Ok(match cmd {
            Command::Heartbeat => Self::Heartbeat(HeartbeatMsg::from_command(data)?),
            Command::JoinRoom => Self::JoinRoom(JoinRoomMsg::from_command(data)?),
            Command::AddText => Self::AddText(AddTextMsg::from_command(data)?),
            Command::AddGift => Self::AddGift(AddGiftMsg::from_command(data)?),
            Command::AddMember => Self::AddMember(AddMemberMsg::from_command(data)?),
            Command::AddSuperChat => Self::AddSuperChat(AddSuperChatMsg::from_command(data)?),
            Command::DelSuperChat => Self::DelSuperChat(DelSuperChatMsg::from_command(data)?),
            Command::UpdateTranslation => {
                Self::UpdateTranslation(UpdateTranslationMsg::from_command(data)?)
            }
            Command::FatalError => Self::FatalError(FatalErrorMsg::from_command(data)?),
        })
    }

    pub fn command(&self) -> Command {
        match self {
            Self::Heartbeat(_) => Command::Heartbeat,
            Self::JoinRoom(_) => Command::JoinRoom,
            Self::AddText(_) => Command::AddText,
            Self::AddGift(_) => Command::AddGift,
            Self::AddMember(_) => Command::AddMember,
            Self::AddSuperChat(_) => Command::AddSuperChat,
            Self::DelSuperChat(_) => Command::DelSuperChat,
            Self::UpdateTranslation(_) => Command::UpdateTranslation,
            Self::FatalError(_) => Command::FatalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Envelope;
    use serde_json::json;

    fn text_payload() -> Value {
        json!([
            "url", 1000, "alice", 0, "hi", 0, 0, 1, 0, 1, 0, "m1", "", 1, ["emo.png"]
        ])
    }

    #[test]
    fn test_add_text_emoticon() {
        let msg = AddTextMsg::from_command(&text_payload()).unwrap();

        assert_eq!(msg.avatar_url, "url");
        assert_eq!(msg.timestamp, 1000);
        assert_eq!(msg.author_name, "alice");
        assert_eq!(msg.author_type, AuthorType::Normal);
        assert_eq!(msg.content, "hi");
        assert_eq!(msg.privilege_type, GuardLevel::None);
        assert!(!msg.is_gift_danmaku);
        assert_eq!(msg.author_level, 1);
        assert!(!msg.is_newbie);
        assert!(msg.is_mobile_verified);
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.content_type, ContentType::Emoticon);
        assert_eq!(msg.content_type_params.emoticon_url(), Some("emo.png"));
        assert_eq!(
            serde_json::to_value(&msg.content_type_params).unwrap(),
            json!({ "url": "emo.png" })
        );
    }

    #[test]
    fn test_add_text_plain_keeps_params() {
        let payload = json!([
            "url", 1000, "bob", 3, "hello", 3, true, 20, false, true, 12, "m2", "你好", 0, {}
        ]);
        let msg = AddTextMsg::from_command(&payload).unwrap();

        assert_eq!(msg.author_type, AuthorType::RoomOwner);
        assert_eq!(msg.privilege_type, GuardLevel::Lv1);
        assert!(msg.is_gift_danmaku);
        assert_eq!(msg.medal_level, 12);
        assert_eq!(msg.translation, "你好");
        assert_eq!(msg.content_type_params, ContentTypeParams::Other(json!({})));
        assert_eq!(msg.time().unwrap().timestamp(), 1000);
    }

    #[test]
    fn test_add_text_ignores_trailing_fields() {
        let mut payload = text_payload();
        payload.as_array_mut().unwrap().push(json!("future"));
        assert!(AddTextMsg::from_command(&payload).is_ok());
    }

    #[test]
    fn test_add_text_short_array_fails() {
        let payload = json!(["url", 1000, "alice"]);
        let err = AddTextMsg::from_command(&payload).unwrap_err();
        assert!(err.is_decode());
        assert!(err.to_string().contains("at least 15"));
    }

    #[test]
    fn test_add_text_empty_emoticon_fails() {
        let mut payload = text_payload();
        payload[14] = json!([]);
        assert!(AddTextMsg::from_command(&payload).unwrap_err().is_decode());
    }

    #[test]
    fn test_add_text_unknown_codes_are_kept() {
        let mut payload = text_payload();
        payload[3] = json!(7);
        payload[5] = json!(4);
        payload[13] = json!(9);
        let msg = AddTextMsg::from_command(&payload).unwrap();

        assert_eq!(msg.author_type, AuthorType::Unknown(7));
        assert_eq!(msg.privilege_type, GuardLevel::Unknown(4));
        assert_eq!(msg.content_type, ContentType::Unknown(9));
        assert_eq!(msg.content_type_params, ContentTypeParams::Other(json!(["emo.png"])));
        assert_eq!(u8::from(msg.author_type), 7);
    }

    #[test]
    fn test_add_text_wrong_code_type_fails() {
        let mut payload = text_payload();
        payload[3] = json!("owner");
        assert!(AddTextMsg::from_command(&payload).unwrap_err().is_decode());
    }

    #[test]
    fn test_add_gift() {
        let data = json!({
            "id": "g1",
            "avatarUrl": "a.png",
            "timestamp": 1700000000,
            "authorName": "carol",
            "totalCoin": 5000,
            "giftName": "小心心",
            "num": 5,
        });
        let msg = AddGiftMsg::from_command(&data).unwrap();
        assert_eq!(msg.total_coin, 5000);
        assert_eq!(msg.gift_name, "小心心");
        assert_eq!(msg.num, 5);
    }

    #[test]
    fn test_add_gift_missing_key_fails() {
        let data = json!({ "id": "g1", "avatarUrl": "a.png" });
        let err = AddGiftMsg::from_command(&data).unwrap_err();
        assert!(err.is_decode());
        assert!(err.to_string().starts_with("Decode error: ADD_GIFT"));
    }

    #[test]
    fn test_add_member() {
        let data = json!({
            "id": "m1",
            "avatarUrl": "a.png",
            "timestamp": 1,
            "authorName": "dave",
            "privilegeType": 1,
        });
        let msg = AddMemberMsg::from_command(&data).unwrap();
        assert_eq!(msg.privilege_type, GuardLevel::Lv3);
        assert_eq!(msg.privilege_type.name(), "总督");
    }

    #[test]
    fn test_add_member_unknown_guard_level() {
        let data = json!({
            "id": "m2",
            "avatarUrl": "a.png",
            "timestamp": 1,
            "authorName": "frank",
            "privilegeType": 4,
        });
        let msg = AddMemberMsg::from_command(&data).unwrap();
        assert_eq!(msg.privilege_type, GuardLevel::Unknown(4));
        assert_eq!(msg.privilege_type.name(), "");
    }

    #[test]
    fn test_super_chat_messages() {
        let data = json!({
            "id": "sc1",
            "avatarUrl": "a.png",
            "timestamp": 1,
            "authorName": "erin",
            "price": 30,
            "content": "hello",
            "translation": "",
        });
        let msg = AddSuperChatMsg::from_command(&data).unwrap();
        assert_eq!(msg.price, 30);

        let del = DelSuperChatMsg::from_command(&json!({ "ids": ["sc1", "sc2"] })).unwrap();
        assert_eq!(del.ids, vec!["sc1", "sc2"]);
    }

    #[test]
    fn test_update_translation() {
        let msg = UpdateTranslationMsg::from_command(&json!(["m1", "hello"])).unwrap();
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.translation, "hello");

        assert!(UpdateTranslationMsg::from_command(&json!(["m1"])).is_err());
        assert!(UpdateTranslationMsg::from_command(&json!({ "id": "m1" })).is_err());
    }

    #[test]
    fn test_fatal_error() {
        let msg = FatalErrorMsg::from_command(&json!({ "type": 1, "msg": "bad" })).unwrap();
        assert_eq!(msg.kind, FatalErrorType::AuthCodeError);

        let msg = FatalErrorMsg::from_command(&json!({ "type": 5, "msg": "?" })).unwrap();
        assert_eq!(msg.kind, FatalErrorType::Other(5));
        assert!(msg.into_error().is_fatal());
    }

    #[test]
    fn test_join_room_round_trip() {
        for key in [RoomKey::room_id(92384), RoomKey::auth_code("abcdef123")] {
            let envelope = Envelope::join_room(&key, None);
            let Ok(tokio_tungstenite::tungstenite::Message::Text(text)) = envelope.to_message()
            else {
                panic!("expected a text frame");
            };

            let decoded = Envelope::from_text(text.as_str()).unwrap();
            assert_eq!(decoded.command(), Some(Command::JoinRoom));

            let LiveMessage::JoinRoom(join) =
                LiveMessage::decode(Command::JoinRoom, &decoded.data).unwrap()
            else {
                panic!("expected a join message");
            };
            assert_eq!(join.room_key.kind(), key.kind());
            assert_eq!(join.room_key, key);
            assert!(join.config.is_none());
        }
    }

    #[test]
    fn test_live_message_command() {
        let msg = LiveMessage::decode(Command::Heartbeat, &json!({})).unwrap();
        assert_eq!(msg.command(), Command::Heartbeat);
    }
}
