use serde::Serialize;
use tokio::sync::broadcast;

use agora_shared::{ChatMessage, ConnectionState};

use crate::state::RetryInfo;

pub const EVENT_NEW_MESSAGE: &str = "new-message";
pub const EVENT_HISTORY_LOADED: &str = "history-loaded";
pub const EVENT_CONNECTION_CHANGED: &str = "connection-changed";
pub const EVENT_RETRY_SCHEDULED: &str = "retry-scheduled";
pub const EVENT_ANNOUNCEMENT: &str = "announcement";
pub const EVENT_ERROR: &str = "error";

/// Notifications for UI consumers, in the order the session observed them.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ChatEvent {
    /// A message was added to the window.
    NewMessage(ChatMessage),
    /// The `init` frame was applied.
    HistoryLoaded(HistoryPayload),
    ConnectionChanged(ConnectionPayload),
    RetryScheduled(RetryInfo),
    Announcement(AnnouncementPayload),
    Error(ErrorPayload),
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => EVENT_NEW_MESSAGE,
            Self::HistoryLoaded(_) => EVENT_HISTORY_LOADED,
            Self::ConnectionChanged(_) => EVENT_CONNECTION_CHANGED,
            Self::RetryScheduled(_) => EVENT_RETRY_SCHEDULED,
            Self::Announcement(_) => EVENT_ANNOUNCEMENT,
            Self::Error(_) => EVENT_ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPayload {
    pub room: String,
    pub inserted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionPayload {
    pub state: ConnectionState,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnouncementPayload {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

pub fn emit_event(tx: &broadcast::Sender<ChatEvent>, event: ChatEvent) {
    let name = event.name();
    if tx.send(event).is_err() {
        tracing::trace!(event = name, "No subscribers for event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = ChatEvent::ConnectionChanged(ConnectionPayload {
            state: ConnectionState::Reconnecting,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], EVENT_CONNECTION_CHANGED);
        assert_eq!(json["payload"]["state"], "reconnecting");
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        emit_event(
            &tx,
            ChatEvent::Error(ErrorPayload {
                message: "x".into(),
            }),
        );
    }
}
