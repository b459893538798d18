//! Pending attachments and their local preview resources.
//!
//! A [`PendingAttachment`] lives in a draft until it is sent or removed. Its
//! [`PreviewHandle`] is registered with a [`PreviewRegistry`] for as long as
//! the attachment exists and is released when it is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use agora_net::UploadedFile;
use agora_shared::constants::{ALLOWED_IMAGE_MIMES, MAX_TEXT_FILE_BYTES};
use agora_shared::AttachmentKind;

use crate::error::ValidationError;

/// Tracks live preview resources so leaks are observable.
#[derive(Debug, Clone, Default)]
pub struct PreviewRegistry {
    live: Arc<Mutex<HashMap<Uuid, usize>>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register preview bytes; released when the returned handle is dropped.
    pub fn acquire(&self, data: Bytes) -> PreviewHandle {
        let id = Uuid::new_v4();
        match self.live.lock() {
            Ok(mut live) => {
                live.insert(id, data.len());
            }
            Err(e) => warn!(error = %e, "Preview registry lock poisoned"),
        }
        PreviewHandle {
            id,
            data,
            registry: self.clone(),
        }
    }

    /// Number of previews not yet released.
    pub fn live(&self) -> usize {
        self.live.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Total bytes held by live previews.
    pub fn live_bytes(&self) -> usize {
        self.live.lock().map(|l| l.values().sum()).unwrap_or(0)
    }

    fn release(&self, id: Uuid) {
        if let Ok(mut live) = self.live.lock() {
            if live.remove(&id).is_some() {
                debug!(preview = %id, "Released attachment preview");
            }
        }
    }
}

/// Locally owned preview of an attachment (e.g. thumbnail source bytes).
#[derive(Debug)]
pub struct PreviewHandle {
    id: Uuid,
    data: Bytes,
    registry: PreviewRegistry,
}

impl PreviewHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

#[derive(Debug)]
pub struct PendingAttachment {
    id: Uuid,
    kind: AttachmentKind,
    name: String,
    size_bytes: u64,
    preview: Option<PreviewHandle>,
    remote: Option<UploadedFile>,
}

impl PendingAttachment {
    pub fn new(kind: AttachmentKind, name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            name: name.into(),
            size_bytes,
            preview: None,
            remote: None,
        }
    }

    /// An attachment that already lives on the server.
    pub fn uploaded(kind: AttachmentKind, file: UploadedFile) -> Self {
        let name = file
            .file_name
            .clone()
            .unwrap_or_else(|| file.url.rsplit('/').next().unwrap_or_default().to_string());
        let mut attachment = Self::new(kind, name, file.bytes);
        attachment.remote = Some(file);
        attachment
    }

    pub fn with_preview(mut self, preview: PreviewHandle) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> AttachmentKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn preview(&self) -> Option<&PreviewHandle> {
        self.preview.as_ref()
    }

    /// Server URL, once the upload finished.
    pub fn remote_url(&self) -> Option<&str> {
        self.remote
            .as_ref()
            .map(|f| f.url.as_str())
            .filter(|url| !url.is_empty())
    }

    pub fn is_uploaded(&self) -> bool {
        self.remote_url().is_some()
    }

    pub fn set_remote(&mut self, file: UploadedFile) {
        self.size_bytes = file.bytes.max(self.size_bytes);
        self.remote = Some(file);
    }
}

/// Check an image against the upload rules before any network call.
pub fn validate_image(mime: &str, size: u64, max_bytes: u64) -> Result<(), ValidationError> {
    if !ALLOWED_IMAGE_MIMES.contains(&mime) {
        return Err(ValidationError::UnsupportedType(mime.to_string()));
    }
    if size > max_bytes {
        return Err(ValidationError::TooLarge {
            size,
            max: max_bytes,
        });
    }
    Ok(())
}

pub fn validate_text_file(size: u64) -> Result<(), ValidationError> {
    if size > MAX_TEXT_FILE_BYTES {
        return Err(ValidationError::TooLarge {
            size,
            max: MAX_TEXT_FILE_BYTES,
        });
    }
    Ok(())
}

/// Human-readable size, e.g. `1.5 MB`.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
