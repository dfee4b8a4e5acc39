// OPQ bot message model (outbound requests + inbound packets)

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::error::ValidationError;

/// Category of outbound message content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SendKind {
    TextMessage,
    ImageByUrl,
    ImageByLocalPath,
    ImageByHash,
    VoiceByUrl,
    VoiceByLocalPath,
    XmlPayload,
    JsonPayload,
    ForwardedPayload,
    ReplyPayload,
}

impl SendKind {
    pub const ALL: [SendKind; 10] = [
        SendKind::TextMessage,
        SendKind::ImageByUrl,
        SendKind::ImageByLocalPath,
        SendKind::ImageByHash,
        SendKind::VoiceByUrl,
        SendKind::VoiceByLocalPath,
        SendKind::XmlPayload,
        SendKind::JsonPayload,
        SendKind::ForwardedPayload,
        SendKind::ReplyPayload,
    ];

    /// `SendMsgType` value expected by SendMsgV2
    pub fn wire_type(&self) -> &'static str {
        match self {
            SendKind::TextMessage => "TextMsg",
            SendKind::ImageByUrl | SendKind::ImageByLocalPath | SendKind::ImageByHash => "PicMsg",
            SendKind::VoiceByUrl | SendKind::VoiceByLocalPath => "VoiceMsg",
            SendKind::XmlPayload => "XmlMsg",
            SendKind::JsonPayload => "JsonMsg",
            SendKind::ForwardedPayload => "ForwordMsg",
            SendKind::ReplyPayload => "ReplayMsg",
        }
    }
}

impl fmt::Display for SendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Message destination. `Private` is a temporary session opened through a
/// group, so its payloads carry the originating group id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    Friend,
    Group,
    Private,
}

impl Destination {
    /// `SendToType` value expected by SendMsgV2
    pub fn wire_code(&self) -> u8 {
        match self {
            Destination::Friend => 1,
            Destination::Group => 2,
            Destination::Private => 3,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Picture reference by content hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PicMd5 {
    #[serde(rename = "PicMd5")]
    pub pic_md5: String,
}

impl PicMd5 {
    pub fn new(md5: impl Into<String>) -> Self {
        Self { pic_md5: md5.into() }
    }
}

/// Quoted message metadata for a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyInfo {
    #[serde(rename = "MsgSeq")]
    pub msg_seq: i64,
    #[serde(rename = "MsgTime")]
    pub msg_time: i64,
    #[serde(rename = "UserID")]
    pub user_id: i64,
    #[serde(rename = "RawContent")]
    pub raw_content: String,
}

/// Kind-specific message body, shared by every destination
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text { content: String },
    ImageUrl { pic_url: String, content: String, flash: bool },
    ImageLocal { path: String, content: String, flash: bool },
    ImageHash { md5s: Vec<PicMd5>, content: String, flash: bool },
    VoiceUrl { voice_url: String },
    VoiceLocal { path: String },
    Xml { content: String },
    Json { content: String },
    Forward { buf: String, field: i64 },
    Reply { info: ReplyInfo },
}

impl Payload {
    pub fn text(content: impl Into<String>) -> Self {
        Payload::Text { content: content.into() }
    }

    pub fn image_url(pic_url: impl Into<String>, content: impl Into<String>) -> Self {
        Payload::ImageUrl {
            pic_url: pic_url.into(),
            content: content.into(),
            flash: false,
        }
    }

    pub fn kind(&self) -> SendKind {
        match self {
            Payload::Text { .. } => SendKind::TextMessage,
            Payload::ImageUrl { .. } => SendKind::ImageByUrl,
            Payload::ImageLocal { .. } => SendKind::ImageByLocalPath,
            Payload::ImageHash { .. } => SendKind::ImageByHash,
            Payload::VoiceUrl { .. } => SendKind::VoiceByUrl,
            Payload::VoiceLocal { .. } => SendKind::VoiceByLocalPath,
            Payload::Xml { .. } => SendKind::XmlPayload,
            Payload::Json { .. } => SendKind::JsonPayload,
            Payload::Forward { .. } => SendKind::ForwardedPayload,
            Payload::Reply { .. } => SendKind::ReplyPayload,
        }
    }

    fn write_fields(&self, fields: &mut Map<String, Value>) {
        match self {
            Payload::Text { content } | Payload::Xml { content } | Payload::Json { content } => {
                fields.insert("Content".into(), json!(content));
            }
            Payload::ImageUrl { pic_url, content, flash } => {
                fields.insert("PicUrl".into(), json!(pic_url));
                fields.insert("Content".into(), json!(content));
                fields.insert("FlashPic".into(), json!(flash));
            }
            Payload::ImageLocal { path, content, flash } => {
                fields.insert("PicPath".into(), json!(path));
                fields.insert("Content".into(), json!(content));
                fields.insert("FlashPic".into(), json!(flash));
            }
            Payload::ImageHash { md5s, content, flash } => {
                fields.insert("PicMd5s".into(), json!(md5s));
                fields.insert("Content".into(), json!(content));
                fields.insert("FlashPic".into(), json!(flash));
            }
            // The backend takes local voice paths through VoiceUrl as well
            Payload::VoiceUrl { voice_url: path } | Payload::VoiceLocal { path } => {
                fields.insert("VoiceUrl".into(), json!(path));
            }
            Payload::Forward { buf, field } => {
                fields.insert("ForwordBuf".into(), json!(buf));
                fields.insert("ForwordField".into(), json!(field));
            }
            Payload::Reply { info } => {
                fields.insert("ReplayInfo".into(), json!(info));
            }
        }
    }
}

/// Destination-dependent content shape
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Group and friend messages
    Shared(Payload),
    /// Temporary session, carries the group the session was opened from
    Private { group: i64, payload: Payload },
}

impl Content {
    pub fn payload(&self) -> &Payload {
        match self {
            Content::Shared(payload) | Content::Private { payload, .. } => payload,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Content::Private { .. })
    }

    fn shape(&self) -> &'static str {
        if self.is_private() {
            "private"
        } else {
            "shared"
        }
    }
}

/// Outbound message request consumed by the send pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub target: i64,
    pub kind: SendKind,
    pub destination: Destination,
    pub content: Content,
}

impl SendRequest {
    /// Field-level constructor for dynamically assembled requests.
    /// Consistency is only checked when the request is converted to wire fields.
    pub fn new(target: i64, kind: SendKind, destination: Destination, content: Content) -> Self {
        Self {
            target,
            kind,
            destination,
            content,
        }
    }

    pub fn group(group_id: i64, payload: Payload) -> Self {
        Self {
            target: group_id,
            kind: payload.kind(),
            destination: Destination::Group,
            content: Content::Shared(payload),
        }
    }

    pub fn friend(user_id: i64, payload: Payload) -> Self {
        Self {
            target: user_id,
            kind: payload.kind(),
            destination: Destination::Friend,
            content: Content::Shared(payload),
        }
    }

    pub fn private(user_id: i64, group: i64, payload: Payload) -> Self {
        Self {
            target: user_id,
            kind: payload.kind(),
            destination: Destination::Private,
            content: Content::Private { group, payload },
        }
    }

    /// Check that the content variant matches `(kind, destination)`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let payload = self.content.payload();
        let shape_ok = self.content.is_private() == (self.destination == Destination::Private);
        if payload.kind() != self.kind || !shape_ok {
            return Err(ValidationError {
                kind: self.kind,
                destination: self.destination,
                content_kind: payload.kind(),
                content_shape: self.content.shape(),
            });
        }
        Ok(())
    }

    /// Flat SendMsgV2 body for this request.
    pub fn to_wire_fields(&self) -> Result<Map<String, Value>, ValidationError> {
        self.validate()?;

        let mut fields = Map::new();
        fields.insert("ToUserUid".into(), json!(self.target));
        fields.insert("SendMsgType".into(), json!(self.kind.wire_type()));
        fields.insert("SendToType".into(), json!(self.destination.wire_code()));
        self.content.payload().write_fields(&mut fields);
        if let Content::Private { group, .. } = &self.content {
            fields.insert("GroupID".into(), json!(group));
        }
        Ok(fields)
    }
}

// ===== Inbound =====

/// Socket.io event names the backend pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    GroupMessage,
    FriendMessage,
    GenericEvent,
}

impl EventName {
    pub fn wire_name(&self) -> &'static str {
        match self {
            EventName::GroupMessage => "OnGroupMsgs",
            EventName::FriendMessage => "OnFriendMsgs",
            EventName::GenericEvent => "OnEvents",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "OnGroupMsgs" => Some(EventName::GroupMessage),
            "OnFriendMsgs" => Some(EventName::FriendMessage),
            "OnEvents" => Some(EventName::GenericEvent),
            _ => None,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Compile-time binding of an event name to its payload type
pub trait InboundEvent: 'static {
    const NAME: EventName;
    type Payload: DeserializeOwned + Send + 'static;
}

pub struct GroupMessage;
pub struct FriendMessage;
pub struct GenericEvent;

impl InboundEvent for GroupMessage {
    const NAME: EventName = EventName::GroupMessage;
    type Payload = GroupMsg;
}

impl InboundEvent for FriendMessage {
    const NAME: EventName = EventName::FriendMessage;
    type Payload = FriendMsg;
}

impl InboundEvent for GenericEvent {
    const NAME: EventName = EventName::GenericEvent;
    type Payload = EventMsg;
}

/// Group chat message (`OnGroupMsgs` Data)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GroupMsg {
    pub from_group_id: i64,
    pub from_group_name: String,
    pub from_user_id: i64,
    pub from_nick_name: String,
    pub content: String,
    pub msg_type: String,
    pub msg_time: i64,
    pub msg_seq: i64,
    pub msg_random: i64,
    #[serde(rename = "RedBaginfo")]
    pub red_bag_info: Option<Value>,
}

/// Friend / temporary session message (`OnFriendMsgs` Data)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FriendMsg {
    pub from_uin: i64,
    pub to_uin: i64,
    pub msg_type: String,
    pub msg_seq: i64,
    pub content: String,
    #[serde(rename = "RedBaginfo")]
    pub red_bag_info: Option<Value>,
}

/// Backend notice such as member joins or recalls (`OnEvents` Data)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EventMsg {
    pub event_name: String,
    pub event_data: Value,
    pub event_msg: Value,
}

/// Wrapper around `Data` inside an event argument
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CurrentPacket {
    #[serde(rename = "WebConnId", default)]
    pub web_conn_id: String,
    #[serde(rename = "Data", default)]
    pub data: Value,
}

/// First argument of every socket.io event the backend emits
#[derive(Debug, Clone, Deserialize)]
pub struct ReturnPack {
    #[serde(rename = "CurrentPacket", default)]
    pub current_packet: CurrentPacket,
    #[serde(rename = "CurrentQQ")]
    pub current_qq: i64,
}

/// Typed inbound notification handed to the event router
#[derive(Debug, Clone, PartialEq)]
pub struct InboundNotification {
    pub account_id: i64,
    pub event: EventName,
    pub payload: Value,
}

impl InboundNotification {
    pub fn from_return_pack(event: EventName, pack: ReturnPack) -> Self {
        Self {
            account_id: pack.current_qq,
            event,
            payload: pack.current_packet.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_info() -> ReplyInfo {
        ReplyInfo {
            msg_seq: 77,
            msg_time: 1_600_000_000,
            user_id: 42,
            raw_content: "original".to_string(),
        }
    }

    fn payload_for(kind: SendKind) -> Payload {
        match kind {
            SendKind::TextMessage => Payload::text("hi"),
            SendKind::ImageByUrl => Payload::ImageUrl {
                pic_url: "http://img/1.png".into(),
                content: "look".into(),
                flash: true,
            },
            SendKind::ImageByLocalPath => Payload::ImageLocal {
                path: "/tmp/1.png".into(),
                content: "look".into(),
                flash: false,
            },
            SendKind::ImageByHash => Payload::ImageHash {
                md5s: vec![PicMd5::new("abc")],
                content: "look".into(),
                flash: false,
            },
            SendKind::VoiceByUrl => Payload::VoiceUrl { voice_url: "http://v/1.amr".into() },
            SendKind::VoiceByLocalPath => Payload::VoiceLocal { path: "/tmp/1.amr".into() },
            SendKind::XmlPayload => Payload::Xml { content: "<msg/>".into() },
            SendKind::JsonPayload => Payload::Json { content: "{}".into() },
            SendKind::ForwardedPayload => Payload::Forward { buf: "buf".into(), field: 5 },
            SendKind::ReplyPayload => Payload::Reply { info: reply_info() },
        }
    }

    fn expected_kind_fields(kind: SendKind) -> Value {
        match kind {
            SendKind::TextMessage => json!({ "Content": "hi" }),
            SendKind::ImageByUrl => {
                json!({ "PicUrl": "http://img/1.png", "Content": "look", "FlashPic": true })
            }
            SendKind::ImageByLocalPath => {
                json!({ "PicPath": "/tmp/1.png", "Content": "look", "FlashPic": false })
            }
            SendKind::ImageByHash => {
                json!({ "PicMd5s": [{ "PicMd5": "abc" }], "Content": "look", "FlashPic": false })
            }
            SendKind::VoiceByUrl => json!({ "VoiceUrl": "http://v/1.amr" }),
            SendKind::VoiceByLocalPath => json!({ "VoiceUrl": "/tmp/1.amr" }),
            SendKind::XmlPayload => json!({ "Content": "<msg/>" }),
            SendKind::JsonPayload => json!({ "Content": "{}" }),
            SendKind::ForwardedPayload => json!({ "ForwordBuf": "buf", "ForwordField": 5 }),
            SendKind::ReplyPayload => json!({
                "ReplayInfo": { "MsgSeq": 77, "MsgTime": 1_600_000_000, "UserID": 42, "RawContent": "original" }
            }),
        }
    }

    fn merged(base: Value, extra: Value) -> Value {
        let mut base = base;
        if let (Some(b), Some(e)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in e {
                b.insert(k.clone(), v.clone());
            }
        }
        base
    }

    #[test]
    fn test_group_wire_fields_for_every_kind() {
        for kind in SendKind::ALL {
            let req = SendRequest::group(10001, payload_for(kind));
            let fields = Value::Object(req.to_wire_fields().unwrap());
            let expected = merged(
                json!({ "ToUserUid": 10001, "SendMsgType": kind.wire_type(), "SendToType": 2 }),
                expected_kind_fields(kind),
            );
            assert_eq!(fields, expected, "group {}", kind);
            assert!(fields.get("GroupID").is_none());
        }
    }

    #[test]
    fn test_private_wire_fields_for_every_kind() {
        for kind in SendKind::ALL {
            let req = SendRequest::private(555, 10001, payload_for(kind));
            let fields = Value::Object(req.to_wire_fields().unwrap());
            let expected = merged(
                json!({
                    "ToUserUid": 555,
                    "SendMsgType": kind.wire_type(),
                    "SendToType": 3,
                    "GroupID": 10001
                }),
                expected_kind_fields(kind),
            );
            assert_eq!(fields, expected, "private {}", kind);
        }
    }

    #[test]
    fn test_friend_uses_shared_shape() {
        let req = SendRequest::friend(42, Payload::text("yo"));
        let fields = Value::Object(req.to_wire_fields().unwrap());
        assert_eq!(
            fields,
            json!({ "ToUserUid": 42, "SendMsgType": "TextMsg", "SendToType": 1, "Content": "yo" })
        );
    }

    #[test]
    fn test_group_text_to_group() {
        let req = SendRequest::new(
            10001,
            SendKind::TextMessage,
            Destination::Group,
            Content::Shared(Payload::text("hi")),
        );
        let fields = Value::Object(req.to_wire_fields().unwrap());
        assert_eq!(
            fields,
            json!({ "ToUserUid": 10001, "SendMsgType": "TextMsg", "SendToType": 2, "Content": "hi" })
        );
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let req = SendRequest::new(
            1,
            SendKind::ImageByUrl,
            Destination::Group,
            Content::Shared(Payload::text("hi")),
        );
        let err = req.to_wire_fields().unwrap_err();
        assert_eq!(err.kind, SendKind::ImageByUrl);
        assert_eq!(err.content_kind, SendKind::TextMessage);
        assert!(err.to_string().contains("type mismatch"));
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        // private shape for a group target
        let req = SendRequest::new(
            1,
            SendKind::TextMessage,
            Destination::Group,
            Content::Private { group: 2, payload: Payload::text("hi") },
        );
        assert!(req.to_wire_fields().is_err());

        // shared shape for a private target
        let req = SendRequest::new(
            1,
            SendKind::TextMessage,
            Destination::Private,
            Content::Shared(Payload::text("hi")),
        );
        let err = req.validate().unwrap_err();
        assert_eq!(err.content_shape, "shared");
    }

    #[test]
    fn test_event_name_round_trip() {
        for name in [EventName::GroupMessage, EventName::FriendMessage, EventName::GenericEvent] {
            assert_eq!(EventName::from_wire(name.wire_name()), Some(name));
        }
        assert_eq!(EventName::from_wire("OnSomethingElse"), None);
    }

    #[test]
    fn test_return_pack_into_notification() {
        let raw = json!({
            "CurrentPacket": {
                "WebConnId": "abc",
                "Data": { "FromGroupId": 10001, "FromUserId": 42, "Content": "hello", "MsgSeq": 9 }
            },
            "CurrentQQ": 123456
        });
        let pack: ReturnPack = serde_json::from_value(raw).unwrap();
        assert_eq!(pack.current_packet.web_conn_id, "abc");

        let note = InboundNotification::from_return_pack(EventName::GroupMessage, pack);
        assert_eq!(note.account_id, 123456);
        let msg: GroupMsg = serde_json::from_value(note.payload).unwrap();
        assert_eq!(msg.from_group_id, 10001);
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.msg_seq, 9);
        assert!(msg.red_bag_info.is_none());
    }
}
