//! Chat room configuration supplied by the embedding application.
//!
//! Values originate from server-side settings; they are normalised the same
//! way the server clamps them so client and server agree on the limits.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_INLINE_TEXT_LIMIT, DEFAULT_MAX_IMAGE_BYTES, DEFAULT_MAX_MESSAGE_LENGTH,
    DEFAULT_MESSAGE_LIMIT, MAX_MESSAGE_LENGTH_CEILING, MAX_MESSAGE_LIMIT,
};
use crate::protocol::RoomConfig;
use crate::types::RoomId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Whether the session should be live.
    pub enabled: bool,

    /// Message Window capacity.
    pub message_limit: usize,

    /// Maximum accepted message length in characters.
    pub max_message_length: usize,

    pub room: RoomId,

    /// Largest image accepted for upload, in bytes.
    pub max_image_bytes: u64,

    /// Pasted text above this many characters becomes a file attachment.
    pub inline_text_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            message_limit: DEFAULT_MESSAGE_LIMIT,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            room: RoomId::default(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            inline_text_limit: DEFAULT_INLINE_TEXT_LIMIT,
        }
    }
}

impl ChatConfig {
    /// Clamp every limit into the range the server accepts.
    pub fn normalized(mut self) -> Self {
        self.message_limit = normalize_message_limit(self.message_limit as i64);
        self.max_message_length = normalize_max_message_length(self.max_message_length as i64);
        if self.max_image_bytes == 0 {
            self.max_image_bytes = DEFAULT_MAX_IMAGE_BYTES;
        }
        if self.inline_text_limit == 0 {
            self.inline_text_limit = DEFAULT_INLINE_TEXT_LIMIT;
        }
        self
    }

    /// Adopt the limits the server announced for the room.
    pub fn apply_room_config(&mut self, remote: &RoomConfig) {
        self.message_limit = normalize_message_limit(remote.message_limit);
        self.max_message_length = normalize_max_message_length(remote.max_message_length);
    }
}

pub fn normalize_message_limit(value: i64) -> usize {
    if value <= 0 {
        return DEFAULT_MESSAGE_LIMIT;
    }
    (value as usize).min(MAX_MESSAGE_LIMIT)
}

pub fn normalize_max_message_length(value: i64) -> usize {
    if value <= 0 {
        return DEFAULT_MAX_MESSAGE_LENGTH;
    }
    (value as usize).min(MAX_MESSAGE_LENGTH_CEILING)
}
