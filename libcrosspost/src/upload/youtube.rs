//! YouTube resumable video upload
//!
//! A session is opened with the video metadata, the bytes are `PUT` in 5 MiB
//! chunks tagged with `Content-Range` (`308` means "send the next chunk"), and
//! the created video is then polled until processing succeeds.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{chunk_ranges, poll_until_ready, PollPolicy, ProcessingStatus, UploadSession};
use crate::error::{PlatformError, Result};
use crate::media::MediaBlob;
use crate::transport::{error_for_status, expect_success, ApiRequest, HttpTransport};

pub const UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
pub const VIDEOS_URL: &str = "https://www.googleapis.com/youtube/v3/videos";

/// Chunk size for resumable uploads; must be a multiple of 256 KiB
pub const CHUNK_SIZE: usize = 5 * 1024 * 1024;

const SERVICE: &str = "YouTube";

/// Snippet and status sent when the upload session is opened
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDetails {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: Option<String>,
    pub privacy: String,
}

impl VideoDetails {
    fn to_resource(&self) -> serde_json::Value {
        let mut snippet = json!({
            "title": self.title,
            "description": self.description,
            "tags": self.tags,
        });
        if let Some(category) = &self.category_id {
            snippet["categoryId"] = json!(category);
        }
        json!({
            "snippet": snippet,
            "status": { "privacyStatus": self.privacy },
        })
    }
}

#[derive(Debug, Deserialize)]
struct VideoResource {
    id: String,
}

#[derive(Debug, Deserialize)]
struct VideoList {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    #[serde(default)]
    processing_details: Option<ProcessingDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessingDetails {
    processing_status: String,
    #[serde(default)]
    processing_failure_reason: Option<String>,
}

/// Uploads videos through the resumable protocol
pub struct YoutubeUploader {
    transport: Arc<dyn HttpTransport>,
    poll: PollPolicy,
}

impl YoutubeUploader {
    pub fn new(transport: Arc<dyn HttpTransport>, poll: PollPolicy) -> Self {
        Self { transport, poll }
    }

    /// Upload the video and return its id once processing has succeeded
    pub async fn upload(
        &self,
        blob: &MediaBlob,
        details: &VideoDetails,
        access_token: &str,
    ) -> Result<String> {
        let video_id = self.insert(blob, details, access_token).await?;
        self.wait_until_processed(&video_id, access_token).await?;
        Ok(video_id)
    }

    /// Open a session and transfer every chunk; the video exists once this returns
    pub async fn insert(
        &self,
        blob: &MediaBlob,
        details: &VideoDetails,
        access_token: &str,
    ) -> Result<String> {
        if !blob.is_video() {
            return Err(PlatformError::Validation(vec![format!(
                "YouTube only accepts video uploads, got {} for {}",
                blob.mime, blob.source
            )])
            .into());
        }

        let mut session = UploadSession::new(blob.len());
        let session_url = self.open_session(blob, details, access_token).await?;
        let video_id = self.transfer(&mut session, &session_url, blob, access_token).await?;
        session.complete()?;
        info!("Uploaded {} to YouTube as video {}", blob.source, video_id);
        Ok(video_id)
    }

    /// Poll processing until YouTube reports success or failure
    pub async fn wait_until_processed(&self, video_id: &str, access_token: &str) -> Result<()> {
        let label = format!("YouTube video {}", video_id);
        poll_until_ready(&self.poll, &label, |_| {
            self.processing_status(video_id, access_token)
        })
        .await?;
        debug!("YouTube finished processing {}", video_id);
        Ok(())
    }

    async fn open_session(
        &self,
        blob: &MediaBlob,
        details: &VideoDetails,
        access_token: &str,
    ) -> Result<String> {
        let request = ApiRequest::post(UPLOAD_URL)
            .bearer(access_token)
            .query("uploadType", "resumable")
            .query("part", "snippet,status")
            .header("X-Upload-Content-Length", blob.len().to_string())
            .header("X-Upload-Content-Type", blob.mime.as_str())
            .json(details.to_resource());
        let response = self.transport.execute(request).await?;
        let response = expect_success(SERVICE, "open upload session", response)?;

        response
            .header("location")
            .map(str::to_string)
            .ok_or_else(|| {
                PlatformError::api(
                    Some(response.status),
                    None,
                    "YouTube did not return a resumable session URL",
                )
                .into()
            })
    }

    async fn transfer(
        &self,
        session: &mut UploadSession,
        session_url: &str,
        blob: &MediaBlob,
        access_token: &str,
    ) -> Result<String> {
        let total = blob.bytes.len();
        session.begin_transfer(session_url)?;

        let mut created: Option<VideoResource> = None;
        for range in chunk_ranges(total, CHUNK_SIZE) {
            let content_range = format!("bytes {}-{}/{}", range.start, range.end - 1, total);
            let len = range.len() as u64;
            let request = ApiRequest::put(session_url)
                .bearer(access_token)
                .header("Content-Range", content_range.as_str())
                .bytes(blob.bytes[range].to_vec(), blob.mime.as_str());
            let response = self.transport.execute(request).await?;

            match response.status {
                308 => debug!("YouTube accepted {}", content_range),
                200 | 201 => created = Some(response.json()?),
                _ => {
                    session.fail();
                    return Err(error_for_status(SERVICE, "upload chunk", &response).into());
                }
            }
            session.record_chunk(len)?;
        }

        session.finalize()?;
        let video = created.ok_or_else(|| {
            PlatformError::MediaUpload(
                "YouTube did not confirm the upload after the final chunk".to_string(),
            )
        })?;
        // Processing is tracked under the video id from here on
        session.media_id = Some(video.id.clone());
        Ok(video.id)
    }

    async fn processing_status(&self, video_id: &str, access_token: &str) -> Result<ProcessingStatus> {
        let request = ApiRequest::get(VIDEOS_URL)
            .bearer(access_token)
            .query("part", "processingDetails,status")
            .query("id", video_id);
        let response = self.transport.execute(request).await?;
        let list: VideoList = expect_success(SERVICE, "check processing", response)?.json()?;

        let details = list.items.into_iter().next().and_then(|item| item.processing_details);
        Ok(match details {
            Some(d) => match d.processing_status.as_str() {
                "succeeded" => ProcessingStatus::Ready,
                "failed" | "terminated" => ProcessingStatus::Failed(
                    d.processing_failure_reason.unwrap_or(d.processing_status),
                ),
                _ => ProcessingStatus::pending(),
            },
            None => ProcessingStatus::pending(),
        })
    }
}
