//! Attachment upload client.
//!
//! Images and promoted long text are uploaded out-of-band over HTTP before a
//! message can reference them. Each call performs exactly one multipart
//! request; retrying is left to the caller since re-sending a large image is
//! expensive.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use agora_shared::constants::{FILE_UPLOAD_PATH, IMAGE_UPLOAD_PATH};
use agora_shared::AttachmentKind;

use crate::transport::join_endpoint;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// The server answered but refused the file; message is surfaced verbatim.
    #[error("{0}")]
    Rejected(String),

    #[error("Upload request failed: {0}")]
    Http(String),

    #[error("Invalid upload response: {0}")]
    InvalidResponse(String),

    #[error("Failed to read file: {0}")]
    Read(String),
}

/// Raw file contents awaiting upload.
#[derive(Debug, Clone)]
pub struct UploadBlob {
    pub name: String,
    pub mime: String,
    pub data: Bytes,
}

impl UploadBlob {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            data: data.into(),
        }
    }

    /// Plain-text blob, used when long pasted text is promoted to a file.
    pub fn text(name: impl Into<String>, content: &str) -> Self {
        Self::new(name, "text/plain", content.to_owned())
    }

    /// Read a file from disk, inferring the MIME type from its extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, UploadError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| UploadError::Read(format!("{}: {e}", path.display())))?;
        let mime = mime_from_name(&name).to_string();
        Ok(Self::new(name, mime, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Where an uploaded file now lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub url: String,
    pub bytes: u64,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[async_trait]
pub trait Uploader: Send + Sync + 'static {
    async fn upload(
        &self,
        blob: UploadBlob,
        kind: AttachmentKind,
    ) -> Result<UploadedFile, UploadError>;
}

/// Console API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

/// Multipart uploader against the console's chat endpoints.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpUploader {
    pub fn new(base_url: Url, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            auth_token,
        }
    }

    pub fn endpoint(&self, kind: AttachmentKind) -> Url {
        let path = match kind {
            AttachmentKind::Image => IMAGE_UPLOAD_PATH,
            AttachmentKind::TextFile => FILE_UPLOAD_PATH,
        };
        join_endpoint(&self.base_url, path)
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(
        &self,
        blob: UploadBlob,
        kind: AttachmentKind,
    ) -> Result<UploadedFile, UploadError> {
        let url = self.endpoint(kind);
        let size = blob.size();
        let name = blob.name.clone();

        let part = reqwest::multipart::Part::bytes(blob.data.to_vec())
            .file_name(blob.name)
            .mime_str(&blob.mime)
            .map_err(|e| UploadError::Http(format!("invalid MIME type: {e}")))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut request = self.client.post(url.clone()).multipart(form);
        if let Some(ref token) = self.auth_token {
            request = request.bearer_auth(token);
        }

        debug!(url = %url, name = %name, size, "Uploading attachment");

        let response = request
            .send()
            .await
            .map_err(|e| UploadError::Http(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Http(e.to_string()))?;

        let result = parse_upload_response(&body);
        if !status.is_success() {
            warn!(status = %status, "Attachment upload failed");
            return Err(UploadError::Http(match result {
                Err(e) => format!("HTTP {status}: {e}"),
                Ok(_) => format!("HTTP {status}"),
            }));
        }
        match &result {
            Ok(file) => info!(url = %file.url, bytes = file.bytes, "Attachment uploaded"),
            Err(e) => warn!(error = %e, "Attachment upload rejected"),
        }
        result
    }
}

fn parse_upload_response(body: &str) -> Result<UploadedFile, UploadError> {
    let envelope: ApiResponse<UploadedFile> =
        serde_json::from_str(body).map_err(|e| UploadError::InvalidResponse(e.to_string()))?;
    if !envelope.success {
        return Err(UploadError::Rejected(if envelope.message.is_empty() {
            "Upload failed".to_string()
        } else {
            envelope.message
        }));
    }
    let file = envelope
        .data
        .ok_or_else(|| UploadError::InvalidResponse("missing data".into()))?;
    if file.url.is_empty() {
        return Err(UploadError::InvalidResponse("empty url".into()));
    }
    Ok(file)
}

/// MIME type for a file name, by extension.
pub fn mime_from_name(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "txt" | "md" | "log" => "text/plain",
        _ => "application/octet-stream",
    }
}
