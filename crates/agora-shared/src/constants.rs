/// Room joined when none is configured
pub const DEFAULT_ROOM: &str = "global";

/// Maximum room identifier length in characters
pub const MAX_ROOM_LEN: usize = 64;

/// Default Message Window capacity
pub const DEFAULT_MESSAGE_LIMIT: usize = 1000;

/// Upper bound the server enforces on the message limit
pub const MAX_MESSAGE_LIMIT: usize = 5000;

/// Default maximum message length in characters
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 8000;

/// Upper bound the server enforces on the message length setting
pub const MAX_MESSAGE_LENGTH_CEILING: usize = 50_000;

/// Pasted text longer than this (in characters) is promoted to a file attachment
pub const DEFAULT_INLINE_TEXT_LIMIT: usize = 500;

/// Maximum image upload size in bytes (10 MiB)
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum promoted text file size in bytes (1 MiB)
pub const MAX_TEXT_FILE_BYTES: u64 = 1024 * 1024;

/// Image MIME types accepted by the upload endpoint
pub const ALLOWED_IMAGE_MIMES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// File name used for the multipart part of promoted text
pub const PROMOTED_TEXT_UPLOAD_NAME: &str = "message.txt";

/// Display name of a promoted text attachment in the draft
pub const PROMOTED_TEXT_DISPLAY_NAME: &str = "long-text.txt";

/// Placeholder avatar the server assigns to users without one
pub const DEFAULT_AVATAR: &str = "/avatar.png";

/// WebSocket endpoint path
pub const WS_PATH: &str = "/api/chat/ws";

/// WebSocket subprotocol
pub const WS_SUBPROTOCOL: &str = "chat";

/// Image upload endpoint path
pub const IMAGE_UPLOAD_PATH: &str = "/api/chat/images";

/// Promoted text upload endpoint path
pub const FILE_UPLOAD_PATH: &str = "/api/chat/files";

/// First reconnect delay in milliseconds
pub const RECONNECT_INITIAL_MS: u64 = 1_000;

/// Reconnect delay ceiling in milliseconds
pub const RECONNECT_MAX_MS: u64 = 30_000;

/// Connection attempts taking longer than this are treated as failures
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// A connection silent for this long (no frames, no pings) is considered dead
pub const IDLE_TIMEOUT_SECS: u64 = 60;
