//! Message draft: text plus attachments being uploaded.
//!
//! A [`Composer`] is cheap to clone; clones share the same draft. Uploads run
//! without blocking other draft edits, and an upload that finishes after the
//! draft was sent or discarded is thrown away.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use agora_net::{UploadBlob, Uploader};
use agora_shared::constants::{PROMOTED_TEXT_DISPLAY_NAME, PROMOTED_TEXT_UPLOAD_NAME};
use agora_shared::{AttachmentKind, ConnectionState};

use crate::attachment::{validate_image, validate_text_file, PendingAttachment, PreviewRegistry};
use crate::error::{AttachError, SendError};
use crate::manager::{ChatSessionManager, Shared};

/// Identity of the current draft. Rotated whenever the draft is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DraftToken(Uuid);

impl DraftToken {
    fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

/// What a UI needs to render one pending attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentSummary {
    pub id: Uuid,
    pub kind: AttachmentKind,
    pub name: String,
    pub size_bytes: u64,
    pub url: Option<String>,
}

impl From<&PendingAttachment> for AttachmentSummary {
    fn from(a: &PendingAttachment) -> Self {
        Self {
            id: a.id(),
            kind: a.kind(),
            name: a.name().to_string(),
            size_bytes: a.size_bytes(),
            url: a.remote_url().map(str::to_owned),
        }
    }
}

struct Draft {
    token: DraftToken,
    text: String,
    attachments: Vec<PendingAttachment>,
}

impl Draft {
    fn clear(&mut self) {
        self.token = DraftToken::fresh();
        self.text.clear();
        // Dropping the entries releases their previews.
        self.attachments.clear();
    }
}

#[derive(Clone)]
pub struct Composer {
    shared: Arc<Shared>,
    uploader: Arc<dyn Uploader>,
    previews: PreviewRegistry,
    draft: Arc<Mutex<Draft>>,
}

impl Composer {
    pub(crate) fn new(
        shared: Arc<Shared>,
        uploader: Arc<dyn Uploader>,
        previews: PreviewRegistry,
    ) -> Self {
        Self {
            shared,
            uploader,
            previews,
            draft: Arc::new(Mutex::new(Draft {
                token: DraftToken::fresh(),
                text: String::new(),
                attachments: Vec::new(),
            })),
        }
    }

    pub async fn token(&self) -> DraftToken {
        self.draft.lock().await.token
    }

    pub async fn text(&self) -> String {
        self.draft.lock().await.text.clone()
    }

    pub async fn set_text(&self, text: impl Into<String>) {
        self.draft.lock().await.text = text.into();
    }

    pub async fn attachments(&self) -> Vec<AttachmentSummary> {
        self.draft
            .lock()
            .await
            .attachments
            .iter()
            .map(AttachmentSummary::from)
            .collect()
    }

    /// Drop one attachment from the draft. Returns whether it was present.
    pub async fn remove_attachment(&self, id: Uuid) -> bool {
        let mut draft = self.draft.lock().await;
        let before = draft.attachments.len();
        draft.attachments.retain(|a| a.id() != id);
        draft.attachments.len() != before
    }

    /// Insert pasted text.
    ///
    /// The paste is appended to the draft while the whole draft stays within
    /// the inline limit. Otherwise the paste is uploaded as a plain-text file
    /// and `Some(id)` of the new attachment is returned.
    pub async fn paste_text(&self, text: &str) -> Result<Option<Uuid>, AttachError> {
        let limit = self.shared.config().inline_text_limit;
        let chars = text.chars().count();
        {
            let mut draft = self.draft.lock().await;
            let existing = draft.text.chars().count();
            if existing + chars <= limit {
                draft.text.push_str(text);
                return Ok(None);
            }
        }

        let (pending, blob) = self.promoted_text(text)?;
        debug!(chars, limit, "Promoting pasted text to a file attachment");
        self.upload(pending, blob).await.map(Some)
    }

    fn promoted_text(&self, text: &str) -> Result<(PendingAttachment, UploadBlob), AttachError> {
        let blob = UploadBlob::text(PROMOTED_TEXT_UPLOAD_NAME, text);
        validate_text_file(blob.size())?;
        let pending = PendingAttachment::new(
            AttachmentKind::TextFile,
            PROMOTED_TEXT_DISPLAY_NAME,
            blob.size(),
        )
        .with_preview(self.previews.acquire(blob.data.clone()));
        Ok((pending, blob))
    }

    /// Validate, upload and attach an image.
    ///
    /// Nothing is uploaded and the draft is untouched if validation fails.
    pub async fn attach_image(&self, blob: UploadBlob) -> Result<Uuid, AttachError> {
        let max = self.shared.config().max_image_bytes;
        validate_image(&blob.mime, blob.size(), max)?;

        let pending = PendingAttachment::new(AttachmentKind::Image, blob.name.clone(), blob.size())
            .with_preview(self.previews.acquire(blob.data.clone()));
        self.upload(pending, blob).await
    }

    async fn upload(&self, pending: PendingAttachment, blob: UploadBlob) -> Result<Uuid, AttachError> {
        let id = pending.id();
        let kind = pending.kind();
        let token = {
            let mut draft = self.draft.lock().await;
            draft.attachments.push(pending);
            draft.token
        };

        let result = self.uploader.upload(blob, kind).await;

        let mut draft = self.draft.lock().await;
        let position = draft.attachments.iter().position(|a| a.id() == id);
        let position = match position {
            Some(pos) if draft.token == token => pos,
            _ => {
                debug!(attachment = %id, "Draft changed during upload, discarding result");
                return Err(AttachError::DraftDiscarded);
            }
        };

        match result {
            Ok(file) => {
                info!(attachment = %id, url = %file.url, "Attachment ready");
                draft.attachments[position].set_remote(file);
                Ok(id)
            }
            Err(e) => {
                warn!(attachment = %id, error = %e, "Attachment upload failed");
                draft.attachments.remove(position);
                Err(AttachError::Upload(e))
            }
        }
    }

    /// Send the draft through `manager`. The draft is cleared only when the
    /// message was accepted.
    ///
    /// Draft text over the inline limit is uploaded as a plain-text file
    /// first and sent as an attachment with empty content.
    pub async fn submit(&self, manager: &ChatSessionManager) -> Result<(), SendError> {
        let mut draft = self.draft.lock().await;
        let limit = self.shared.config().inline_text_limit;
        let chars = draft.text.trim().chars().count();
        if chars > limit {
            let state = manager.connection_state();
            if state != ConnectionState::Connected {
                return Err(SendError::NotConnected(state));
            }

            let (mut pending, blob) = self.promoted_text(draft.text.trim())?;
            debug!(chars, limit, "Promoting draft text to a file attachment");
            let file = self
                .uploader
                .upload(blob, AttachmentKind::TextFile)
                .await
                .map_err(AttachError::Upload)?;
            info!(attachment = %pending.id(), url = %file.url, "Attachment ready");
            pending.set_remote(file);
            draft.attachments.push(pending);
            draft.text.clear();
        }

        manager.send_message(&draft.text, &draft.attachments).await?;
        draft.clear();
        Ok(())
    }

    /// Throw the draft away, releasing every preview.
    pub async fn discard(&self) {
        self.draft.lock().await.clear();
    }
}
