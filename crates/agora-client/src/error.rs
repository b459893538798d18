use thiserror::Error;

use agora_net::{SessionClosed, UploadError};
use agora_shared::ConnectionState;

/// An attachment refused before any upload was attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("File too large: {size} bytes (limit {max} bytes)")]
    TooLarge { size: u64, max: u64 },
}

/// Why a message was not handed to the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Not connected (state: {0})")]
    NotConnected(ConnectionState),

    #[error("Message is empty")]
    Empty,

    #[error("Message too long: {len} characters (limit {max})")]
    TooLong { len: usize, max: usize },

    #[error("Attachment still uploading: {name}")]
    AttachmentPending { name: String },

    /// Long draft text could not be turned into a file attachment.
    #[error("Failed to attach long text: {0}")]
    Promotion(#[from] AttachError),

    #[error("Chat session has shut down")]
    SessionClosed,
}

impl From<SessionClosed> for SendError {
    fn from(_: SessionClosed) -> Self {
        SendError::SessionClosed
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    /// The draft was sent or discarded while the upload was in flight.
    #[error("Draft changed before the upload finished")]
    DraftDiscarded,
}
