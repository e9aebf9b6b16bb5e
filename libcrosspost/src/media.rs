//! Media reference resolution
//!
//! Turns a [`MediaRef`] (remote URL or local path) into the bytes and MIME
//! type the upload state machines need.

use std::sync::Arc;

use tracing::debug;

use crate::error::{PlatformError, Result};
use crate::transport::{ApiRequest, HttpTransport};
use crate::types::{MediaMimeType, MediaRef};

/// A media item loaded into memory
#[derive(Clone, PartialEq)]
pub struct MediaBlob {
    pub source: MediaRef,
    pub bytes: Vec<u8>,
    pub mime: MediaMimeType,
}

impl MediaBlob {
    pub fn new(source: MediaRef, bytes: Vec<u8>, mime: MediaMimeType) -> Self {
        Self {
            source,
            bytes,
            mime,
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_video(&self) -> bool {
        self.mime.is_video()
    }
}

impl std::fmt::Debug for MediaBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaBlob")
            .field("source", &self.source)
            .field("bytes", &self.bytes.len())
            .field("mime", &self.mime)
            .finish()
    }
}

/// MIME type implied by the reference's extension, without any I/O
pub fn guess_mime(media: &MediaRef) -> Option<MediaMimeType> {
    media
        .extension()
        .and_then(|ext| MediaMimeType::from_extension(&ext))
}

/// Loads media bytes from URLs (through the transport) or local files
#[derive(Clone)]
pub struct MediaLoader {
    transport: Arc<dyn HttpTransport>,
}

impl MediaLoader {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub async fn load(&self, media: &MediaRef) -> Result<MediaBlob> {
        let blob = if media.is_remote() {
            self.load_remote(media).await?
        } else {
            self.load_local(media).await?
        };

        if blob.is_empty() {
            return Err(PlatformError::Validation(vec![format!("Media {} is empty", media)]).into());
        }
        debug!("Loaded media {} ({} bytes, {})", media, blob.len(), blob.mime);
        Ok(blob)
    }

    async fn load_remote(&self, media: &MediaRef) -> Result<MediaBlob> {
        let response = self.transport.execute(ApiRequest::get(media.as_str())).await?;

        if !response.is_success() {
            let message = format!("Failed to fetch media {}: HTTP {}", media, response.status);
            return Err(match response.status {
                400..=499 if response.status != 429 => PlatformError::Validation(vec![message]),
                _ => PlatformError::MediaUpload(message),
            }
            .into());
        }

        let mime = response
            .header("content-type")
            .and_then(MediaMimeType::from_mime_str)
            .or_else(|| guess_mime(media))
            .ok_or_else(|| unsupported(media))?;

        Ok(MediaBlob::new(media.clone(), response.body, mime))
    }

    async fn load_local(&self, media: &MediaRef) -> Result<MediaBlob> {
        let mime = guess_mime(media).ok_or_else(|| unsupported(media))?;
        let path = shellexpand::tilde(media.as_str()).to_string();
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            PlatformError::Validation(vec![format!("Failed to read media file {}: {}", path, e)])
        })?;
        Ok(MediaBlob::new(media.clone(), bytes, mime))
    }
}

fn unsupported(media: &MediaRef) -> PlatformError {
    PlatformError::Validation(vec![format!(
        "Unsupported media type for {}. Supported: jpg, png, gif, webp, mp4, mov",
        media
    )])
}
