//! Chat Session Manager: the façade a UI talks to.
//!
//! One manager owns one transport session, one [`MessageWindow`] and the
//! [`SessionState`] around it. Session events are consumed in order by a
//! single dispatcher task; every state change bumps a revision counter that
//! UIs can watch, and user-facing notifications are broadcast as
//! [`ChatEvent`]s.
//!
//! [`MessageWindow`]: crate::window::MessageWindow

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use agora_net::{
    spawn_session, Connector, SessionClosed, SessionEvent, SessionHandle, SessionOptions, Uploader,
};
use agora_shared::protocol::InitData;
use agora_shared::{
    ChatConfig, ChatMessage, ConnectionState, Envelope, InboundFrame, OutboundFrame,
};

use crate::attachment::{PendingAttachment, PreviewRegistry};
use crate::composer::Composer;
use crate::error::SendError;
use crate::events::{
    emit_event, AnnouncementPayload, ChatEvent, ConnectionPayload, ErrorPayload, HistoryPayload,
};
use crate::state::{RetryInfo, SessionSnapshot, SessionState};
use crate::window::InsertOutcome;

const EVENT_BUFFER: usize = 256;

/// State shared between the manager, its dispatcher task and composers.
pub(crate) struct Shared {
    state: Mutex<SessionState>,
    revision: watch::Sender<u64>,
    events: broadcast::Sender<ChatEvent>,
}

impl Shared {
    fn new(config: ChatConfig) -> Self {
        let (revision, _) = watch::channel(0);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Mutex::new(SessionState::new(config)),
            revision,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    fn publish(&self, events: Vec<ChatEvent>) {
        self.touch();
        for event in events {
            emit_event(&self.events, event);
        }
    }

    pub(crate) fn config(&self) -> ChatConfig {
        self.lock().config.clone()
    }

    /// Apply one session event. Events arriving while disabled are leftovers
    /// from the torn-down connection and are dropped.
    fn apply(&self, event: SessionEvent) {
        let mut out = Vec::new();
        {
            let mut state = self.lock();
            if !state.config.enabled {
                debug!(?event, "Ignoring session event while disabled");
                return;
            }

            match event {
                SessionEvent::StateChanged(next) => {
                    state.connection = next;
                    match next {
                        ConnectionState::Connected => {
                            state.last_error = None;
                            state.retry = None;
                        }
                        ConnectionState::Connecting | ConnectionState::Disconnected => {
                            state.retry = None;
                        }
                        ConnectionState::Reconnecting => {}
                    }
                    out.push(ChatEvent::ConnectionChanged(ConnectionPayload { state: next }));
                }
                SessionEvent::RetryScheduled { attempt, delay } => {
                    let retry = RetryInfo { attempt, delay };
                    state.retry = Some(retry);
                    out.push(ChatEvent::RetryScheduled(retry));
                }
                SessionEvent::TransportError(message) => {
                    state.last_error = Some(message.clone());
                    out.push(ChatEvent::Error(ErrorPayload { message }));
                }
                SessionEvent::Frame(frame) => apply_frame(&mut state, frame, &mut out),
            }
        }
        self.publish(out);
    }
}

fn apply_frame(state: &mut SessionState, frame: InboundFrame, out: &mut Vec<ChatEvent>) {
    match frame {
        InboundFrame::Init(init) => apply_init(state, init, out),
        InboundFrame::Message(data) => {
            let message = data.message;
            if message.room != state.config.room {
                debug!(room = %message.room, id = %message.id, "Dropping message for another room");
                return;
            }
            if let InsertOutcome::Inserted { .. } = state.window.insert(message.clone()) {
                out.push(ChatEvent::NewMessage(message));
            }
        }
        InboundFrame::Announcement(data) => {
            state.announcement = non_empty(data.announcement);
            out.push(ChatEvent::Announcement(AnnouncementPayload {
                text: state.announcement.clone(),
            }));
        }
        InboundFrame::Error(data) => {
            warn!(error = %data.message, "Server reported an error");
            state.last_error = Some(data.message.clone());
            out.push(ChatEvent::Error(ErrorPayload {
                message: data.message,
            }));
        }
    }
}

fn apply_init(state: &mut SessionState, init: InitData, out: &mut Vec<ChatEvent>) {
    if init.room != state.config.room {
        debug!(room = %init.room, "Dropping init frame for another room");
        return;
    }

    state.config.apply_room_config(&init.config);
    let evicted = state.window.set_capacity(state.config.message_limit);
    state.announcement = non_empty(init.config.announcement);

    let mut inserted = 0;
    for message in init.messages {
        if message.room != init.room {
            continue;
        }
        if let InsertOutcome::Inserted { .. } = state.window.insert(message) {
            inserted += 1;
        }
    }

    info!(
        room = %init.room,
        inserted,
        evicted,
        message_limit = state.config.message_limit,
        max_message_length = state.config.max_message_length,
        "Room initialised"
    );

    out.push(ChatEvent::HistoryLoaded(HistoryPayload {
        room: init.room.to_string(),
        inserted,
    }));
    out.push(ChatEvent::Announcement(AnnouncementPayload {
        text: state.announcement.clone(),
    }));
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

async fn dispatch(shared: Arc<Shared>, mut events: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        shared.apply(event);
    }
    debug!("Session event stream closed");
}

/// Client-side façade for one chat room.
///
/// Must be created inside a tokio runtime. Dropping the manager stops the
/// dispatcher and closes the connection.
pub struct ChatSessionManager {
    shared: Arc<Shared>,
    session: SessionHandle,
    uploader: Arc<dyn Uploader>,
    previews: PreviewRegistry,
    /// Config as last requested by the caller, before server adjustments.
    requested: Mutex<ChatConfig>,
    dispatcher: JoinHandle<()>,
}

impl ChatSessionManager {
    pub fn new(connector: Arc<dyn Connector>, uploader: Arc<dyn Uploader>, config: ChatConfig) -> Self {
        Self::with_options(connector, uploader, config, SessionOptions::default())
    }

    pub fn with_options(
        connector: Arc<dyn Connector>,
        uploader: Arc<dyn Uploader>,
        config: ChatConfig,
        options: SessionOptions,
    ) -> Self {
        let config = config.normalized();
        let options = SessionOptions {
            autostart: config.enabled,
            ..options
        };

        info!(room = %config.room, enabled = config.enabled, "Creating chat session manager");

        let (session, events) = spawn_session(connector, config.room.clone(), options);
        let shared = Arc::new(Shared::new(config.clone()));
        let dispatcher = tokio::spawn(dispatch(shared.clone(), events));

        Self {
            shared,
            session,
            uploader,
            previews: PreviewRegistry::new(),
            requested: Mutex::new(config),
            dispatcher,
        }
    }

    /// Apply a new configuration. Calling it again with the same value is a
    /// no-op.
    ///
    /// Limits the server announced in its `init` frame are kept unless the
    /// caller changes that particular limit.
    pub async fn configure(&self, config: ChatConfig) -> Result<(), SessionClosed> {
        let next = config.normalized();
        let previous = {
            let mut requested = self.requested.lock().unwrap_or_else(PoisonError::into_inner);
            if *requested == next {
                return Ok(());
            }
            std::mem::replace(&mut *requested, next.clone())
        };

        let room_changed = previous.room != next.room;
        let mut out = Vec::new();
        {
            let mut state = self.shared.lock();
            if previous.message_limit != next.message_limit {
                state.config.message_limit = next.message_limit;
                let evicted = state.window.set_capacity(next.message_limit);
                debug!(limit = next.message_limit, evicted, "Message limit changed");
            }
            if previous.max_message_length != next.max_message_length {
                state.config.max_message_length = next.max_message_length;
            }
            state.config.max_image_bytes = next.max_image_bytes;
            state.config.inline_text_limit = next.inline_text_limit;

            if room_changed {
                info!(from = %previous.room, to = %next.room, "Switching chat room");
                state.config.room = next.room.clone();
                state.window.clear();
                state.announcement = None;
            }

            state.config.enabled = next.enabled;
            if !next.enabled && state.connection != ConnectionState::Disconnected {
                state.connection = ConnectionState::Disconnected;
                out.push(ChatEvent::ConnectionChanged(ConnectionPayload {
                    state: ConnectionState::Disconnected,
                }));
            }
            if !next.enabled {
                state.last_error = None;
                state.retry = None;
            }
        }
        self.shared.publish(out);

        if room_changed {
            self.session.set_room(next.room.clone()).await?;
        }
        match (previous.enabled, next.enabled) {
            (false, true) => {
                info!(room = %next.room, "Chat enabled");
                self.session.enable().await
            }
            (true, false) => {
                info!(room = %next.room, "Chat disabled");
                self.session.disable().await
            }
            _ => Ok(()),
        }
    }

    /// Tear the connection down and stay disconnected. The transcript is kept.
    pub async fn disable(&self) -> Result<(), SessionClosed> {
        let config = ChatConfig {
            enabled: false,
            ..self.requested_config()
        };
        self.configure(config).await
    }

    /// Validate and hand a message to the transport.
    ///
    /// Nothing is added to the window here; the message shows up once the
    /// server broadcasts it back.
    pub async fn send_message(
        &self,
        text: &str,
        attachments: &[PendingAttachment],
    ) -> Result<(), SendError> {
        let (room, max_len) = {
            let state = self.shared.lock();
            if state.connection != ConnectionState::Connected {
                return Err(SendError::NotConnected(state.connection));
            }
            (state.config.room.clone(), state.config.max_message_length)
        };

        let content = text.trim();
        if content.is_empty() && attachments.is_empty() {
            return Err(SendError::Empty);
        }

        let len = content.chars().count();
        if len > max_len {
            return Err(SendError::TooLong { len, max: max_len });
        }

        let urls = attachments
            .iter()
            .map(|a| {
                a.remote_url()
                    .map(str::to_owned)
                    .ok_or_else(|| SendError::AttachmentPending {
                        name: a.name().to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(room = %room, len, attachments = urls.len(), "Sending message");
        self.session
            .send(OutboundFrame::Send(Envelope {
                content: content.to_string(),
                room,
                attachments: urls,
            }))
            .await?;
        Ok(())
    }

    /// Skip a pending backoff timer, or drop and re-open a live connection.
    pub async fn reconnect(&self) -> Result<(), SessionClosed> {
        info!("Manual reconnect requested");
        self.session.reconnect_now().await
    }

    /// A new, empty draft bound to this manager's uploader and limits.
    pub fn composer(&self) -> Composer {
        Composer::new(self.shared.clone(), self.uploader.clone(), self.previews.clone())
    }

    pub fn previews(&self) -> &PreviewRegistry {
        &self.previews
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared.lock().window.snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().connection
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    pub fn announcement(&self) -> Option<String> {
        self.shared.lock().announcement.clone()
    }

    pub fn retry(&self) -> Option<RetryInfo> {
        self.shared.lock().retry
    }

    /// Effective configuration, including limits set by the server.
    pub fn config(&self) -> ChatConfig {
        self.shared.config()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.lock().snapshot()
    }

    /// Revision counter bumped on every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<ChatEvent> {
        self.shared.events.subscribe()
    }

    /// Close the connection and stop the session task.
    pub async fn shutdown(&self) {
        if self.session.shutdown().await.is_err() {
            debug!("Session already stopped");
        }
    }

    fn requested_config(&self) -> ChatConfig {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for ChatSessionManager {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}
