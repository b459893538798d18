//! Session state owned by a single [`ChatSessionManager`].
//!
//! The [`SessionState`] struct is wrapped in `Arc<Mutex<>>` and shared
//! between the manager's public methods and its dispatcher task. The lock is
//! only ever held for short, non-async sections.
//!
//! [`ChatSessionManager`]: crate::manager::ChatSessionManager

use std::time::Duration;

use serde::Serialize;

use agora_shared::{ChatConfig, ChatMessage, ConnectionState};

use crate::window::MessageWindow;

/// Next scheduled reconnect, for a "reconnecting in N ms" indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryInfo {
    /// 1-based count of consecutive failures.
    pub attempt: u32,

    #[serde(rename = "delay_ms", serialize_with = "serialize_millis")]
    pub delay: Duration,
}

impl RetryInfo {
    pub fn label(&self) -> String {
        format!("Reconnecting (retry in {} ms)", self.delay.as_millis())
    }
}

fn serialize_millis<S: serde::Serializer>(delay: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(delay.as_millis() as u64)
}

/// Central session state.
pub struct SessionState {
    /// Externally observable connection state.
    pub connection: ConnectionState,

    /// Last transport-reported or in-band error.
    /// Cleared on a successful connect and on disable.
    pub last_error: Option<String>,

    /// Server-pushed banner. `None` when the server sent an empty one.
    pub announcement: Option<String>,

    /// Bounded transcript of the current room.
    pub window: MessageWindow,

    /// Effective limits, possibly adjusted by the server's `init` frame.
    pub config: ChatConfig,

    /// Pending reconnect, while `connection` is `Reconnecting`.
    pub retry: Option<RetryInfo>,
}

impl SessionState {
    /// Create a disconnected state with an empty window sized for `config`.
    pub fn new(config: ChatConfig) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            last_error: None,
            announcement: None,
            window: MessageWindow::new(config.message_limit),
            config,
            retry: None,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection,
            last_error: self.last_error.clone(),
            announcement: self.announcement.clone(),
            messages: self.window.snapshot(),
            config: self.config.clone(),
            retry: self.retry,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(ChatConfig::default())
    }
}

/// Point-in-time copy of [`SessionState`], safe to hand to a UI.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub last_error: Option<String>,
    pub announcement: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub config: ChatConfig,
    pub retry: Option<RetryInfo>,
}
