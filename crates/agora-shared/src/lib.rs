//! # agora-shared
//!
//! Types shared by the chat transport and the session manager: message data
//! model, wire frames, configuration and protocol constants.

pub mod config;
pub mod constants;
pub mod error;
pub mod message;
pub mod protocol;
pub mod types;

pub use config::ChatConfig;
pub use error::ProtocolError;
pub use message::{Author, ChatMessage, MessageMetadata};
pub use protocol::{Envelope, InboundFrame, OutboundFrame, RoomConfig};
pub use types::{AttachmentKind, ConnectionState, MessageId, RoomId};
