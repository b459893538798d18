//! In-memory transport and uploader doubles.
//!
//! Compiled for this crate's tests and for dependents enabling the
//! `test-util` feature.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use agora_shared::{AttachmentKind, InboundFrame, OutboundFrame, ProtocolError, RoomId};

use crate::transport::{Connection, Connector, TransportError};
use crate::upload::{UploadBlob, UploadError, UploadedFile, Uploader};

enum Outcome {
    Refuse(String),
    Accept(FakeConnection),
    Hang,
}

/// Connector whose attempts follow a queued script.
///
/// Attempts beyond the script are refused.
#[derive(Default)]
pub struct FakeConnector {
    script: Mutex<VecDeque<Outcome>>,
    attempts: AtomicUsize,
    rooms: Mutex<Vec<RoomId>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse(&self, reason: &str) {
        self.push(Outcome::Refuse(reason.to_string()));
    }

    /// Queue a successful attempt and return the server side of it.
    pub fn accept(&self) -> FakeRemote {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        self.push(Outcome::Accept(FakeConnection {
            inbound: inbound_rx,
            sent: sent_tx,
            closed: closed.clone(),
        }));
        FakeRemote {
            inbound: inbound_tx,
            sent: sent_rx,
            closed,
        }
    }

    /// Queue an attempt that never completes.
    pub fn hang(&self) {
        self.push(Outcome::Hang);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Room of every attempt so far.
    pub fn rooms(&self) -> Vec<RoomId> {
        self.rooms.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn push(&self, outcome: Outcome) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, room: &RoomId) -> Result<Box<dyn Connection>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut rooms) = self.rooms.lock() {
            rooms.push(room.clone());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Outcome::Accept(conn)) => Ok(Box::new(conn)),
            Some(Outcome::Refuse(reason)) => Err(TransportError::Connect(reason)),
            Some(Outcome::Hang) => std::future::pending().await,
            None => Err(TransportError::Connect("connection refused".into())),
        }
    }
}

pub struct FakeConnection {
    inbound: mpsc::UnboundedReceiver<Result<InboundFrame, TransportError>>,
    sent: mpsc::UnboundedSender<OutboundFrame>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn send(&mut self, frame: &OutboundFrame) -> Result<(), TransportError> {
        self.sent
            .send(frame.clone())
            .map_err(|_| TransportError::Connect("peer gone".into()))
    }

    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Server end of a [`FakeConnection`]. Dropping it closes the connection.
pub struct FakeRemote {
    inbound: mpsc::UnboundedSender<Result<InboundFrame, TransportError>>,
    sent: mpsc::UnboundedReceiver<OutboundFrame>,
    closed: Arc<AtomicBool>,
}

impl FakeRemote {
    pub fn push(&self, frame: InboundFrame) {
        let _ = self.inbound.send(Ok(frame));
    }

    pub fn push_malformed(&self) {
        let _ = self.inbound.send(Err(ProtocolError::Unexpected("garbage".into()).into()));
    }

    /// Next frame the client sent.
    pub async fn sent(&mut self) -> Option<OutboundFrame> {
        self.sent.recv().await
    }

    pub fn try_sent(&mut self) -> Option<OutboundFrame> {
        self.sent.try_recv().ok()
    }

    /// Whether the client closed its side.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Uploader that records calls and answers from a queue.
///
/// With an empty queue every upload succeeds with a URL derived from the
/// file name.
#[derive(Default)]
pub struct FakeUploader {
    results: Mutex<VecDeque<Result<UploadedFile, UploadError>>>,
    calls: Mutex<Vec<(String, AttachmentKind, u64)>>,
    paused: AtomicBool,
    release: Notify,
}

impl FakeUploader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, error: UploadError) {
        if let Ok(mut results) = self.results.lock() {
            results.push_back(Err(error));
        }
    }

    /// Hold uploads in flight until [`FakeUploader::resume`].
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    /// `(name, kind, size)` of every upload attempted.
    pub fn calls(&self) -> Vec<(String, AttachmentKind, u64)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(
        &self,
        blob: UploadBlob,
        kind: AttachmentKind,
    ) -> Result<UploadedFile, UploadError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((blob.name.clone(), kind, blob.size()));
        }
        if self.paused.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        let scripted = self.results.lock().ok().and_then(|mut r| r.pop_front());
        scripted.unwrap_or_else(|| {
            Ok(UploadedFile {
                url: format!("/api/chat/images/test/{}", blob.name),
                bytes: blob.size(),
                content_type: blob.mime.clone(),
                file_name: Some(blob.name.clone()),
            })
        })
    }
}
