//! Chat message data model as delivered by the server.
//!
//! A [`ChatMessage`] is immutable once received. Its wire form is flat JSON;
//! author and metadata fields are grouped here with `#[serde(flatten)]`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_AVATAR;
use crate::types::{MessageId, RoomId};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "svg"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    #[serde(default)]
    pub room: RoomId,
    #[serde(flatten)]
    pub author: Author,
    #[serde(default)]
    pub content: String,
    /// Attachment URLs in send order.
    #[serde(rename = "image_urls", default)]
    pub attachments: Vec<String>,
    /// Server timestamp (Unix seconds).
    #[serde(default)]
    pub created_at: i64,
    #[serde(flatten)]
    pub metadata: MessageMetadata,
}

impl ChatMessage {
    /// Ordering key used by the Message Window.
    pub fn sort_key(&self) -> (i64, MessageId) {
        (self.created_at, self.id)
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.created_at, 0)
    }

    pub fn image_attachments(&self) -> impl Iterator<Item = &str> {
        self.attachments
            .iter()
            .map(String::as_str)
            .filter(|url| is_image_url(url))
    }

    pub fn text_attachments(&self) -> impl Iterator<Item = &str> {
        self.attachments
            .iter()
            .map(String::as_str)
            .filter(|url| url_extension(url).as_deref() == Some("txt"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Author {
    /// Name to render: display name when set, username otherwise.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.username
        } else {
            &self.display_name
        }
    }

    /// Avatar URL, or `None` when the user only has the server placeholder.
    pub fn avatar_url(&self) -> Option<&str> {
        self.avatar
            .as_deref()
            .filter(|a| !a.is_empty() && *a != DEFAULT_AVATAR)
    }

    /// Fallback shown in place of a missing avatar.
    pub fn initial(&self) -> Option<char> {
        self.username.chars().next().and_then(|c| c.to_uppercase().next())
    }
}

/// Ranking and quota annotations. Passed through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_quota: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_rank: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_rank: Option<i64>,
}

pub fn is_image_url(url: &str) -> bool {
    url_extension(url).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Lower-cased extension of the URL path, ignoring query and fragment.
fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "id": 42,
            "room": "global",
            "user_id": 7,
            "username": "alice",
            "display_name": "Alice",
            "avatar": "/avatar.png",
            "content": "hi",
            "image_urls": ["/api/chat/images/2025/a.PNG?x=1", "/api/chat/images/2025/b.txt"],
            "created_at": 1700000000,
            "quota": 500000,
            "usage_rank": 3
        }"#
    }

    #[test]
    fn test_parse_flat_wire_message() {
        let msg: ChatMessage = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(msg.id, MessageId(42));
        assert_eq!(msg.author.username, "alice");
        assert_eq!(msg.author.label(), "Alice");
        assert_eq!(msg.metadata.quota, Some(500000));
        assert_eq!(msg.metadata.usage_rank, Some(3));
        assert_eq!(msg.metadata.balance_rank, None);
        assert_eq!(msg.sort_key(), (1700000000, MessageId(42)));
    }

    #[test]
    fn test_placeholder_avatar_falls_back_to_initial() {
        let msg: ChatMessage = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(msg.author.avatar_url(), None);
        assert_eq!(msg.author.initial(), Some('A'));
    }

    #[test]
    fn test_attachment_classification() {
        let msg: ChatMessage = serde_json::from_str(sample_json()).unwrap();
        let images: Vec<_> = msg.image_attachments().collect();
        let texts: Vec<_> = msg.text_attachments().collect();
        assert_eq!(images, vec!["/api/chat/images/2025/a.PNG?x=1"]);
        assert_eq!(texts, vec!["/api/chat/images/2025/b.txt"]);
    }

    #[test]
    fn test_minimal_message_uses_defaults() {
        let msg: ChatMessage = serde_json::from_str(r#"{"id": 1}"#).unwrap();
        assert_eq!(msg.room, RoomId::default());
        assert!(msg.attachments.is_empty());
        assert_eq!(msg.author.initial(), None);
    }
}
