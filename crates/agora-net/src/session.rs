//! Transport session: connection lifecycle in a dedicated tokio task.
//!
//! The task owns the live [`Connection`], the reconnect timer and the backoff
//! schedule. Callers drive it through [`SessionHandle`] commands and observe it
//! through a single ordered stream of [`SessionEvent`]s. Dropping every handle
//! closes the connection and ends the task.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use agora_shared::constants::CONNECT_TIMEOUT_SECS;
use agora_shared::{ConnectionState, InboundFrame, OutboundFrame, RoomId};

use crate::backoff::Backoff;
use crate::transport::{Connection, Connector, TransportError};

// ---------------------------------------------------------------------------
// Command / event types
// ---------------------------------------------------------------------------

/// Commands sent *into* the session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Start connecting (no-op if already enabled).
    Enable,
    /// Cancel any pending retry, close the connection, stay disconnected.
    Disable,
    /// Skip the backoff timer and connect now.
    ReconnectNow,
    /// Deliver a frame on the open connection.
    Send(OutboundFrame),
    /// Switch rooms; reconnects when currently connected.
    SetRoom(RoomId),
    /// Close everything and end the task.
    Shutdown,
}

/// Events sent *from* the session task, in the order they happened.
#[derive(Debug)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    /// A frame received on the open connection.
    Frame(InboundFrame),
    /// A reconnect attempt is scheduled after `delay`.
    RetryScheduled { attempt: u32, delay: Duration },
    /// The transport failed; the session is already recovering.
    TransportError(String),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub connect_timeout: Duration,
    pub backoff: Backoff,
    pub channel_capacity: usize,
    /// Start connecting right away instead of waiting for `Enable`.
    pub autostart: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            backoff: Backoff::default(),
            channel_capacity: 256,
            autostart: false,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Transport session has shut down")]
pub struct SessionClosed;

/// Cloneable sender half for controlling a session task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn command(&self, cmd: SessionCommand) -> Result<(), SessionClosed> {
        self.cmd_tx.send(cmd).await.map_err(|_| SessionClosed)
    }

    pub async fn enable(&self) -> Result<(), SessionClosed> {
        self.command(SessionCommand::Enable).await
    }

    pub async fn disable(&self) -> Result<(), SessionClosed> {
        self.command(SessionCommand::Disable).await
    }

    pub async fn reconnect_now(&self) -> Result<(), SessionClosed> {
        self.command(SessionCommand::ReconnectNow).await
    }

    /// Fire-and-forget; delivery is observed when the server echoes the message.
    pub async fn send(&self, frame: OutboundFrame) -> Result<(), SessionClosed> {
        self.command(SessionCommand::Send(frame)).await
    }

    pub async fn set_room(&self, room: RoomId) -> Result<(), SessionClosed> {
        self.command(SessionCommand::SetRoom(room)).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionClosed> {
        self.command(SessionCommand::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Spawn the session task.
///
/// Returns the command handle and the event receiver. Unless
/// [`SessionOptions::autostart`] is set the task stays disconnected until it
/// receives [`SessionCommand::Enable`].
pub fn spawn_session(
    connector: Arc<dyn Connector>,
    room: RoomId,
    options: SessionOptions,
) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(options.channel_capacity);
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(options.channel_capacity);

    let autostart = options.autostart;
    let task = SessionTask {
        connector,
        room,
        connect_timeout: options.connect_timeout,
        backoff: options.backoff,
        cmd_rx,
        event_tx,
        state: ConnectionState::Disconnected,
    };
    tokio::spawn(task.run(autostart));

    (SessionHandle { cmd_tx }, event_rx)
}

// ---------------------------------------------------------------------------
// Task internals
// ---------------------------------------------------------------------------

enum Phase {
    Idle,
    Connect,
    Open(Box<dyn Connection>),
    Wait(Duration),
    Exit,
}

struct SessionTask {
    connector: Arc<dyn Connector>,
    room: RoomId,
    connect_timeout: Duration,
    backoff: Backoff,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: mpsc::Sender<SessionEvent>,
    state: ConnectionState,
}

impl SessionTask {
    async fn run(mut self, autostart: bool) {
        info!(room = %self.room, autostart, "Transport session started");

        let mut phase = if autostart { Phase::Connect } else { Phase::Idle };
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connect => self.connect().await,
                Phase::Open(conn) => self.open(conn).await,
                Phase::Wait(delay) => self.wait(delay).await,
                Phase::Exit => break,
            };
        }

        self.transition(ConnectionState::Disconnected).await;
        info!(room = %self.room, "Transport session terminated");
    }

    async fn emit(&self, event: SessionEvent) {
        // Receiver gone means the owner is shutting down; the closed command
        // channel will end the loop.
        let _ = self.event_tx.send(event).await;
    }

    async fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug!(from = %self.state, to = %next, "Session state transition");
        self.state = next;
        self.emit(SessionEvent::StateChanged(next)).await;
    }

    /// Disabled: wait for `Enable`.
    async fn idle(&mut self) -> Phase {
        self.transition(ConnectionState::Disconnected).await;
        self.backoff.reset();

        loop {
            match self.cmd_rx.recv().await {
                None | Some(SessionCommand::Shutdown) => return Phase::Exit,
                Some(SessionCommand::Enable) => return Phase::Connect,
                Some(SessionCommand::Disable) => {}
                Some(SessionCommand::ReconnectNow) => {
                    debug!("Reconnect requested while disabled, ignoring");
                }
                Some(SessionCommand::Send(_)) => {
                    warn!("Dropping outbound frame: session is disabled");
                }
                Some(SessionCommand::SetRoom(room)) => self.room = room,
            }
        }
    }

    async fn connect(&mut self) -> Phase {
        self.transition(ConnectionState::Connecting).await;

        let connector = self.connector.clone();
        let room = self.room.clone();
        let limit = self.connect_timeout;
        let attempt = async move { tokio::time::timeout(limit, connector.connect(&room)).await };
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    return match result {
                        Ok(Ok(conn)) => {
                            self.backoff.reset();
                            Phase::Open(conn)
                        }
                        Ok(Err(e)) => self.schedule_retry(e).await,
                        Err(_) => self.schedule_retry(TransportError::ConnectTimeout(limit)).await,
                    };
                }

                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(SessionCommand::Shutdown) => return Phase::Exit,
                    Some(SessionCommand::Disable) => {
                        info!(room = %self.room, "Session disabled while connecting");
                        return Phase::Idle;
                    }
                    // Already connecting; a second attempt would race the first.
                    Some(SessionCommand::Enable) | Some(SessionCommand::ReconnectNow) => {}
                    Some(SessionCommand::Send(_)) => {
                        warn!("Dropping outbound frame: not connected yet");
                    }
                    Some(SessionCommand::SetRoom(room)) => {
                        if room != self.room {
                            self.room = room;
                            return Phase::Connect;
                        }
                    }
                },
            }
        }
    }

    async fn open(&mut self, mut conn: Box<dyn Connection>) -> Phase {
        self.transition(ConnectionState::Connected).await;
        info!(room = %self.room, "Connected to chat room");

        loop {
            tokio::select! {
                inbound = conn.recv() => match inbound {
                    Some(Ok(frame)) => self.emit(SessionEvent::Frame(frame)).await,
                    Some(Err(e)) if !e.is_fatal() => {
                        warn!(error = %e, "Skipping malformed frame");
                    }
                    Some(Err(e)) => {
                        conn.close().await;
                        return self.schedule_retry(e).await;
                    }
                    None => {
                        return self
                            .schedule_retry(TransportError::Connect("connection closed by server".into()))
                            .await;
                    }
                },

                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(SessionCommand::Shutdown) => {
                        conn.close().await;
                        return Phase::Exit;
                    }
                    Some(SessionCommand::Disable) => {
                        info!(room = %self.room, "Session disabled, closing connection");
                        conn.close().await;
                        return Phase::Idle;
                    }
                    Some(SessionCommand::Enable) => {}
                    Some(SessionCommand::ReconnectNow) => {
                        info!(room = %self.room, "Manual reconnect requested");
                        conn.close().await;
                        return Phase::Connect;
                    }
                    Some(SessionCommand::SetRoom(room)) => {
                        if room != self.room {
                            info!(from = %self.room, to = %room, "Switching rooms");
                            self.room = room;
                            conn.close().await;
                            return Phase::Connect;
                        }
                    }
                    Some(SessionCommand::Send(frame)) => {
                        if let Err(e) = conn.send(&frame).await {
                            if e.is_fatal() {
                                conn.close().await;
                                return self.schedule_retry(e).await;
                            }
                            warn!(error = %e, "Failed to encode outbound frame");
                        }
                    }
                },
            }
        }
    }

    /// Backoff timer pending.
    async fn wait(&mut self, delay: Duration) -> Phase {
        self.transition(ConnectionState::Reconnecting).await;

        let timer = tokio::time::sleep(delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = &mut timer => return Phase::Connect,

                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(SessionCommand::Shutdown) => return Phase::Exit,
                    Some(SessionCommand::Disable) => {
                        info!(room = %self.room, "Session disabled, reconnect cancelled");
                        return Phase::Idle;
                    }
                    Some(SessionCommand::ReconnectNow) => {
                        debug!("Manual reconnect, skipping backoff");
                        return Phase::Connect;
                    }
                    Some(SessionCommand::Enable) => {}
                    Some(SessionCommand::Send(_)) => {
                        warn!("Dropping outbound frame: reconnecting");
                    }
                    Some(SessionCommand::SetRoom(room)) => self.room = room,
                },
            }
        }
    }

    async fn schedule_retry(&mut self, error: TransportError) -> Phase {
        let delay = self.backoff.next_delay();
        let attempt = self.backoff.attempt();
        warn!(
            room = %self.room,
            error = %error,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Transport failure, scheduling reconnect"
        );
        self.emit(SessionEvent::TransportError(error.to_string())).await;
        self.emit(SessionEvent::RetryScheduled { attempt, delay }).await;
        Phase::Wait(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConnector;
    use agora_shared::protocol::{AnnouncementData, Envelope};
    use tokio::time::Instant;

    fn announcement(text: &str) -> InboundFrame {
        InboundFrame::Announcement(AnnouncementData {
            announcement: text.into(),
        })
    }

    async fn next_state(rx: &mut mpsc::Receiver<SessionEvent>) -> ConnectionState {
        loop {
            match rx.recv().await.expect("session ended") {
                SessionEvent::StateChanged(state) => return state,
                _ => continue,
            }
        }
    }

    async fn next_retry(rx: &mut mpsc::Receiver<SessionEvent>) -> Duration {
        loop {
            match rx.recv().await.expect("session ended") {
                SessionEvent::RetryScheduled { delay, .. } => return delay,
                _ => continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_forwards_frames_in_order() {
        let connector = FakeConnector::new();
        let mut remote = connector.accept();
        let (handle, mut events) =
            spawn_session(connector.clone(), RoomId::new("global"), SessionOptions::default());

        handle.enable().await.unwrap();
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);

        remote.push(announcement("one"));
        remote.push(announcement("two"));
        for expected in ["one", "two"] {
            match events.recv().await.unwrap() {
                SessionEvent::Frame(frame) => assert_eq!(frame, announcement(expected)),
                other => panic!("unexpected event: {other:?}"),
            }
        }

        let frame = OutboundFrame::Send(Envelope {
            content: "hi".into(),
            room: RoomId::new("global"),
            attachments: vec![],
        });
        handle.send(frame.clone()).await.unwrap();
        assert_eq!(remote.sent().await, Some(frame));
        assert_eq!(connector.rooms(), vec![RoomId::new("global")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_successful_connect() {
        let connector = FakeConnector::new();
        connector.refuse("refused");
        connector.refuse("refused");
        connector.refuse("refused");
        let remote = connector.accept();

        let (handle, mut events) =
            spawn_session(connector.clone(), RoomId::default(), SessionOptions::default());
        handle.enable().await.unwrap();

        assert_eq!(next_retry(&mut events).await, Duration::from_secs(1));
        assert_eq!(next_retry(&mut events).await, Duration::from_secs(2));
        assert_eq!(next_retry(&mut events).await, Duration::from_secs(4));
        assert_eq!(next_state(&mut events).await, ConnectionState::Reconnecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);

        // Server goes away; the next failure starts over at the initial delay.
        drop(remote);
        assert_eq!(next_retry(&mut events).await, Duration::from_secs(1));
        assert_eq!(connector.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_cancels_pending_reconnect() {
        let connector = FakeConnector::new();
        connector.refuse("refused");
        let (handle, mut events) =
            spawn_session(connector.clone(), RoomId::default(), SessionOptions::default());

        handle.enable().await.unwrap();
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Reconnecting);

        handle.disable().await.unwrap();
        assert_eq!(next_state(&mut events).await, ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_now_skips_backoff_timer() {
        let connector = FakeConnector::new();
        connector.refuse("refused");
        connector.refuse("refused");
        let _remote = connector.accept();
        let (handle, mut events) =
            spawn_session(connector.clone(), RoomId::default(), SessionOptions::default());

        handle.enable().await.unwrap();
        assert_eq!(next_retry(&mut events).await, Duration::from_secs(1));
        assert_eq!(next_retry(&mut events).await, Duration::from_secs(2));
        assert_eq!(next_state(&mut events).await, ConnectionState::Reconnecting);

        let started = Instant::now();
        handle.reconnect_now().await.unwrap();
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_schedules_retry() {
        let connector = FakeConnector::new();
        connector.hang();
        let (handle, mut events) =
            spawn_session(connector.clone(), RoomId::default(), SessionOptions::default());

        handle.enable().await.unwrap();
        let started = Instant::now();
        loop {
            match events.recv().await.unwrap() {
                SessionEvent::TransportError(reason) => {
                    assert!(reason.contains("timed out"));
                    break;
                }
                _ => continue,
            }
        }
        assert!(started.elapsed() >= Duration::from_secs(CONNECT_TIMEOUT_SECS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_keeps_connection() {
        let connector = FakeConnector::new();
        let remote = connector.accept();
        let (handle, mut events) =
            spawn_session(connector.clone(), RoomId::default(), SessionOptions::default());

        handle.enable().await.unwrap();
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);

        remote.push_malformed();
        remote.push(announcement("still here"));
        match events.recv().await.unwrap() {
            SessionEvent::Frame(frame) => assert_eq!(frame, announcement("still here")),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!remote.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_room_reconnects_to_new_room() {
        let connector = FakeConnector::new();
        let first = connector.accept();
        let _second = connector.accept();
        let (handle, mut events) =
            spawn_session(connector.clone(), RoomId::new("a"), SessionOptions::default());

        handle.enable().await.unwrap();
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);

        handle.set_room(RoomId::new("b")).await.unwrap();
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);
        assert_eq!(connector.rooms(), vec![RoomId::new("a"), RoomId::new("b")]);
        assert!(first.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_autostart_connects_without_enable() {
        let connector = FakeConnector::new();
        let _remote = connector.accept();
        let options = SessionOptions {
            autostart: true,
            ..SessionOptions::default()
        };
        let (_handle, mut events) = spawn_session(connector.clone(), RoomId::default(), options);

        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_closes_connection() {
        let connector = FakeConnector::new();
        let remote = connector.accept();
        let (handle, mut events) =
            spawn_session(connector.clone(), RoomId::default(), SessionOptions::default());

        handle.enable().await.unwrap();
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);

        drop(handle);
        assert_eq!(next_state(&mut events).await, ConnectionState::Disconnected);
        assert!(events.recv().await.is_none());
        assert!(remote.is_closed());
    }
}
