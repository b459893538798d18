use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ROOM, MAX_ROOM_LEN};

/// Server-assigned message identity, unique within a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical chat channel.
///
/// Always normalised: trimmed, never empty, at most [`MAX_ROOM_LEN`] characters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self(DEFAULT_ROOM.to_string());
        }
        Self(trimmed.chars().take(MAX_ROOM_LEN).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self(DEFAULT_ROOM.to_string())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Externally observable state of the live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    TextFile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_normalisation() {
        assert_eq!(RoomId::new("  lobby ").as_str(), "lobby");
        assert_eq!(RoomId::new("   ").as_str(), DEFAULT_ROOM);
        assert_eq!(RoomId::new(&"x".repeat(100)).as_str().len(), MAX_ROOM_LEN);
    }

    #[test]
    fn test_room_deserialises_normalised() {
        let room: RoomId = serde_json::from_str("\"\"").unwrap();
        assert_eq!(room, RoomId::default());
    }
}
