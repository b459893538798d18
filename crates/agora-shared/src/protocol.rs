use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::message::ChatMessage;
use crate::types::RoomId;

/// Frames pushed by the server over the chat transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum InboundFrame {
    /// Sent once right after connecting: room settings plus recent history
    Init(InitData),

    /// A message broadcast to the room (including our own, echoed back)
    Message(MessageData),

    /// Banner text, replaces the previous one
    Announcement(AnnouncementData),

    /// In-band error; the connection itself stays healthy
    Error(ErrorData),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitData {
    #[serde(default)]
    pub room: RoomId,
    #[serde(default)]
    pub config: RoomConfig,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Room settings as announced by the server in the `init` frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub message_limit: i64,
    #[serde(default)]
    pub max_message_length: i64,
    #[serde(default)]
    pub ws_path: String,
    #[serde(default)]
    pub image_enabled: bool,
    #[serde(default)]
    pub announcement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageData {
    pub message: ChatMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnnouncementData {
    #[serde(default)]
    pub announcement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorData {
    #[serde(default)]
    pub message: String,
}

/// Frames the client sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum OutboundFrame {
    Send(Envelope),
}

/// Outbound payload: message text plus resolved attachment URLs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub content: String,
    pub room: RoomId,
    #[serde(rename = "image_urls")]
    pub attachments: Vec<String>,
}

impl InboundFrame {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl OutboundFrame {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageId;

    #[test]
    fn test_parse_message_frame() {
        let raw = r#"{"type":"message","data":{"message":{"id":5,"username":"bob","content":"yo","created_at":10}}}"#;
        match InboundFrame::from_json(raw).unwrap() {
            InboundFrame::Message(data) => {
                assert_eq!(data.message.id, MessageId(5));
                assert_eq!(data.message.content, "yo");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_parse_init_frame() {
        let raw = r#"{"type":"init","data":{"room":"global","config":{"enabled":true,"message_limit":200,"max_message_length":8000,"ws_path":"/api/chat/ws","image_enabled":true,"announcement":"welcome"},"messages":[{"id":1,"created_at":1},{"id":2,"created_at":2}]}}"#;
        match InboundFrame::from_json(raw).unwrap() {
            InboundFrame::Init(init) => {
                assert_eq!(init.config.message_limit, 200);
                assert_eq!(init.config.announcement, "welcome");
                assert_eq!(init.messages.len(), 2);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_parse_announcement_and_error() {
        let ann = InboundFrame::from_json(r#"{"type":"announcement","data":{"announcement":"maintenance"}}"#)
            .unwrap();
        assert_eq!(
            ann,
            InboundFrame::Announcement(AnnouncementData {
                announcement: "maintenance".into()
            })
        );

        let err = InboundFrame::from_json(r#"{"type":"error","data":{"message":"too long"}}"#).unwrap();
        assert_eq!(
            err,
            InboundFrame::Error(ErrorData {
                message: "too long".into()
            })
        );
    }

    #[test]
    fn test_unknown_frame_is_an_error() {
        assert!(InboundFrame::from_json(r#"{"type":"typing","data":{}}"#).is_err());
        assert!(InboundFrame::from_json("not json").is_err());
    }

    #[test]
    fn test_send_frame_wire_shape() {
        let frame = OutboundFrame::Send(Envelope {
            content: "hello".into(),
            room: RoomId::new("global"),
            attachments: vec!["/img/1.png".into()],
        });
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "send");
        assert_eq!(value["data"]["content"], "hello");
        assert_eq!(value["data"]["room"], "global");
        assert_eq!(value["data"]["image_urls"][0], "/img/1.png");
    }
}
