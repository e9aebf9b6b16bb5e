//! X/Twitter media upload (v1.1 `media/upload`)
//!
//! Images up to 5 MB go up in a single request. Video and GIF use the chunked
//! protocol:
//!
//! 1. `INIT` with total size, MIME type and media category
//! 2. `APPEND` each 4 MiB segment as base64 `media_data` with its `segment_index`
//! 3. `FINALIZE`, which may return `processing_info`
//! 4. `STATUS` polling honoring `check_after_secs` until `succeeded` or `failed`

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use tracing::{debug, info};

use super::{chunk_ranges, poll_until_ready, PollPolicy, ProcessingStatus, UploadSession};
use crate::error::{PlatformError, Result};
use crate::media::MediaBlob;
use crate::transport::{expect_success, ApiRequest, ApiResponse, HttpTransport};
use crate::types::MediaMimeType;

pub const UPLOAD_URL: &str = "https://upload.twitter.com/1.1/media/upload.json";

/// Segment size for chunked `APPEND` calls
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Largest image accepted by the single-request upload
pub const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

/// Media items allowed on one tweet
pub const MAX_MEDIA_PER_TWEET: usize = 4;

const SERVICE: &str = "X";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    media_id_string: String,
    #[serde(default)]
    processing_info: Option<ProcessingInfo>,
}

#[derive(Debug, Deserialize)]
struct ProcessingInfo {
    state: String,
    #[serde(default)]
    check_after_secs: Option<u64>,
    #[serde(default)]
    error: Option<ProcessingError>,
}

#[derive(Debug, Deserialize)]
struct ProcessingError {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ProcessingInfo {
    fn status(&self) -> ProcessingStatus {
        match self.state.as_str() {
            "succeeded" => ProcessingStatus::Ready,
            "failed" => {
                let reason = self
                    .error
                    .as_ref()
                    .and_then(|e| e.message.clone().or_else(|| e.name.clone()))
                    .unwrap_or_else(|| "unknown error".to_string());
                ProcessingStatus::Failed(reason)
            }
            _ => ProcessingStatus::Pending {
                check_after: self.check_after_secs.map(Duration::from_secs),
            },
        }
    }
}

fn media_category(mime: MediaMimeType) -> &'static str {
    match mime {
        MediaMimeType::Gif => "tweet_gif",
        m if m.is_video() => "tweet_video",
        _ => "tweet_image",
    }
}

/// Uploads media for attachment to tweets
pub struct TwitterUploader {
    transport: Arc<dyn HttpTransport>,
    poll: PollPolicy,
}

impl TwitterUploader {
    pub fn new(transport: Arc<dyn HttpTransport>, poll: PollPolicy) -> Self {
        Self { transport, poll }
    }

    /// Upload one media item and return its `media_id_string` once usable
    pub async fn upload(&self, blob: &MediaBlob, access_token: &str) -> Result<String> {
        if blob.mime.is_video() || blob.mime == MediaMimeType::Gif {
            self.upload_chunked(blob, access_token).await
        } else {
            self.upload_simple(blob, access_token).await
        }
    }

    async fn upload_simple(&self, blob: &MediaBlob, access_token: &str) -> Result<String> {
        if blob.len() > MAX_IMAGE_BYTES {
            return Err(PlatformError::Validation(vec![format!(
                "Image {} is {} bytes; X accepts images up to {} bytes",
                blob.source,
                blob.len(),
                MAX_IMAGE_BYTES
            )])
            .into());
        }

        let request = ApiRequest::post(UPLOAD_URL)
            .bearer(access_token)
            .form_field("media_category", media_category(blob.mime))
            .form_field("media_data", STANDARD.encode(&blob.bytes));
        let response = self.send(request, "upload image").await?;
        let uploaded: UploadResponse = response.json()?;
        debug!("Uploaded image {} as media {}", blob.source, uploaded.media_id_string);
        Ok(uploaded.media_id_string)
    }

    async fn upload_chunked(&self, blob: &MediaBlob, access_token: &str) -> Result<String> {
        let mut session = UploadSession::new(blob.len());

        let init = ApiRequest::post(UPLOAD_URL)
            .bearer(access_token)
            .form_field("command", "INIT")
            .form_field("total_bytes", blob.len().to_string())
            .form_field("media_type", blob.mime.as_str())
            .form_field("media_category", media_category(blob.mime));
        let initialized: UploadResponse = self.send(init, "INIT").await?.json()?;
        let media_id = initialized.media_id_string;
        session.begin_transfer(media_id.clone())?;
        debug!("INIT media {} ({} bytes)", media_id, blob.len());

        for range in chunk_ranges(blob.bytes.len(), CHUNK_SIZE) {
            let len = range.len() as u64;
            let append = ApiRequest::post(UPLOAD_URL)
                .bearer(access_token)
                .form_field("command", "APPEND")
                .form_field("media_id", media_id.as_str())
                .form_field("segment_index", session.segment_index.to_string())
                .form_field("media_data", STANDARD.encode(&blob.bytes[range]));
            if let Err(e) = self.send(append, "APPEND").await {
                session.fail();
                return Err(e);
            }
            session.record_chunk(len)?;
        }

        session.finalize()?;
        let finalize = ApiRequest::post(UPLOAD_URL)
            .bearer(access_token)
            .form_field("command", "FINALIZE")
            .form_field("media_id", media_id.as_str());
        let finalized: UploadResponse = self.send(finalize, "FINALIZE").await?.json()?;

        if let Some(info) = finalized.processing_info {
            session.start_processing()?;
            let first = info.status();
            let label = format!("X media {}", media_id);
            let result = poll_until_ready(&self.poll, &label, |attempt| {
                let first = first.clone();
                let media_id = media_id.clone();
                async move {
                    // FINALIZE already reported the first status
                    if attempt == 1 {
                        return Ok(first);
                    }
                    self.status(&media_id, access_token).await
                }
            })
            .await;
            if let Err(e) = result {
                session.fail();
                return Err(e);
            }
        }

        let media_id = session.complete()?;
        info!("Uploaded {} to X as media {}", blob.source, media_id);
        Ok(media_id)
    }

    async fn status(&self, media_id: &str, access_token: &str) -> Result<ProcessingStatus> {
        let request = ApiRequest::get(UPLOAD_URL)
            .bearer(access_token)
            .query("command", "STATUS")
            .query("media_id", media_id);
        let response: UploadResponse = self.send(request, "STATUS").await?.json()?;
        Ok(response
            .processing_info
            .map(|info| info.status())
            .unwrap_or(ProcessingStatus::Ready))
    }

    async fn send(&self, request: ApiRequest, context: &str) -> Result<ApiResponse> {
        let response = self.transport.execute(request).await?;
        expect_success(SERVICE, context, response)
    }
}
