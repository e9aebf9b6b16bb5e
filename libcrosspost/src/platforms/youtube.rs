//! YouTube publisher
//!
//! A YouTube post is a single video uploaded through the resumable protocol.
//! Text-only posts are not supported. An upload costs 1600 quota units, so
//! the YouTube bucket is debited accordingly.

use async_trait::async_trait;
use tracing::warn;

use super::{finish, PipelineContext, Publisher, StepFailure, StepResult};
use crate::error::{CrosspostError, PlatformError};
use crate::formatting::{ContentFormatter, ValidationReport, YoutubeFormatter};
use crate::media::guess_mime;
use crate::types::{Connection, Delivery, Platform, Post, PublishResult};
use crate::upload::youtube::{VideoDetails, YoutubeUploader};

/// Quota units charged for one `videos.insert`
pub const UPLOAD_QUOTA_COST: u32 = 1600;

const QUOTA_REASONS: &[&str] = &["quota", "rateLimitExceeded", "userRateLimitExceeded"];

/// YouTube reports quota exhaustion as a 403; treat it as a rate limit
fn classify_quota(error: CrosspostError) -> CrosspostError {
    match error {
        CrosspostError::Platform(PlatformError::Api {
            status: Some(403),
            message,
            ..
        }) if QUOTA_REASONS.iter().any(|r| message.contains(r)) => {
            PlatformError::rate_limited(message, None).into()
        }
        other => other,
    }
}

pub struct YoutubePublisher {
    ctx: PipelineContext,
    formatter: YoutubeFormatter,
    uploader: YoutubeUploader,
    default_privacy: String,
}

impl YoutubePublisher {
    pub fn new(ctx: PipelineContext, default_privacy: impl Into<String>) -> Self {
        let uploader = YoutubeUploader::new(ctx.transport.clone(), ctx.poll.clone());
        Self {
            ctx,
            formatter: YoutubeFormatter::new(),
            uploader,
            default_privacy: default_privacy.into(),
        }
    }

    pub fn watch_url(video_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={}", video_id)
    }

    fn details(&self, post: &Post) -> VideoDetails {
        let formatted = self.formatter.format(&post.content);
        VideoDetails {
            title: self.formatter.title(post.metadata.title.as_deref(), &post.content),
            tags: self.formatter.tags(&formatted, &post.metadata.tags),
            description: formatted.text,
            category_id: post.metadata.category_id.clone(),
            privacy: post
                .metadata
                .privacy
                .clone()
                .unwrap_or_else(|| self.default_privacy.clone()),
        }
    }

    async fn run(&self, post: &Post, connection: Connection) -> StepResult<Delivery> {
        if !post.has_media() {
            return Err(PlatformError::NotSupported(
                "YouTube posts must carry a video; text-only posts are not supported".to_string(),
            )
            .into());
        }

        let report = self.validate(post);
        let details = self.details(post);
        let connection = self
            .ctx
            .admit(Platform::Youtube, report, connection, UPLOAD_QUOTA_COST)
            .await?;
        let token = connection.access_token.as_str();

        let blob = self.ctx.media.load(&post.media[0]).await?;
        let label = format!("YouTube upload of post {}", post.id);
        let (blob, details) = (&blob, &details);
        let inserted = self
            .ctx
            .create(&label, |_| async move {
                self.uploader
                    .insert(blob, details, token)
                    .await
                    .map_err(classify_quota)
            })
            .await?;
        let video_id = inserted.value;

        // The video exists from here on; re-uploading would duplicate it
        match self.uploader.wait_until_processed(&video_id, token).await {
            Ok(()) => {}
            Err(CrosspostError::Platform(PlatformError::MediaTimeout(reason))) => {
                warn!("YouTube video {} is still processing: {}", video_id, reason);
            }
            Err(error) => {
                return Err(StepFailure::new(error, inserted.attempts))
            }
        }

        let url = Self::watch_url(&video_id);
        Ok(Delivery::new(video_id, Some(url), inserted.attempts))
    }
}

#[async_trait]
impl Publisher for YoutubePublisher {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    fn character_limit(&self) -> usize {
        self.formatter.character_limit()
    }

    fn validate(&self, post: &Post) -> ValidationReport {
        let mut errors = Vec::new();
        match post.media.as_slice() {
            [] => errors.push("YouTube posts need exactly one video".to_string()),
            [video] => {
                if guess_mime(video).is_some_and(|m| !m.is_video()) {
                    errors.push(format!("YouTube only accepts video files, got {}", video));
                }
            }
            more => errors.push(format!(
                "YouTube posts carry exactly one video, got {} media items",
                more.len()
            )),
        }

        let details = self.details(post);
        if details.title.is_empty() {
            errors.push("YouTube videos need a title or non-empty content".to_string());
        }
        self.formatter
            .validate(&details.description)
            .merge(ValidationReport::new(errors, Vec::new()))
    }

    async fn publish(&self, post: &Post, connection: Connection) -> PublishResult {
        let outcome = self.run(post, connection).await;
        finish(Platform::Youtube, post, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ErrorKind;
    use crate::repository::InMemoryRepository;
    use crate::transport::mock::MockTransport;
    use crate::transport::{ApiResponse, Method};
    use crate::upload::PollPolicy;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn publisher(mock: &MockTransport) -> YoutubePublisher {
        let ctx = PipelineContext::from_config(
            &Config::default_config(),
            Arc::new(mock.clone()),
            Arc::new(InMemoryRepository::new()),
        )
        .with_poll_policy(PollPolicy {
            interval: Duration::from_secs(1),
            max_attempts: 2,
        });
        YoutubePublisher::new(ctx, "private")
    }

    fn connection() -> Connection {
        Connection::new("team", Platform::Youtube, "yt-token")
    }

    fn script_upload(mock: &MockTransport) {
        mock.on(
            Method::Get,
            "cdn.example.com",
            ApiResponse::new(200)
                .with_header("content-type", "video/mp4")
                .with_body(vec![5; 64]),
        );
        mock.on(
            Method::Post,
            "upload/youtube/v3/videos",
            ApiResponse::new(200).with_header("Location", "https://upload.example/session/1"),
        );
        mock.on(
            Method::Put,
            "session/1",
            ApiResponse::json_response(200, json!({ "id": "vid123" })),
        );
    }

    fn post() -> Post {
        let mut post = Post::new("team", "Launch talk\nAll about #rust").with_media(["https://cdn.example.com/talk.mp4"]);
        post.metadata.tags = vec!["conference".to_string()];
        post
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_upload_and_processing() {
        let mock = MockTransport::new();
        script_upload(&mock);
        mock.on(
            Method::Get,
            "youtube/v3/videos",
            ApiResponse::json_response(
                200,
                json!({ "items": [{ "processingDetails": { "processingStatus": "succeeded" } }] }),
            ),
        );

        let result = publisher(&mock).publish(&post(), connection()).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.url.as_deref(), Some("https://www.youtube.com/watch?v=vid123"));

        let session = &mock.requests_to("upload/youtube/v3/videos")[0];
        let body = session.json_body().unwrap();
        assert_eq!(body["snippet"]["title"], "Launch talk");
        assert_eq!(body["snippet"]["tags"], json!(["conference", "rust"]));
        assert_eq!(body["status"]["privacyStatus"], "private");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_processing_still_reports_the_video() {
        let mock = MockTransport::new();
        script_upload(&mock);
        mock.on(
            Method::Get,
            "youtube/v3/videos",
            ApiResponse::json_response(
                200,
                json!({ "items": [{ "processingDetails": { "processingStatus": "processing" } }] }),
            ),
        );

        let result = publisher(&mock).publish(&post(), connection()).await;

        assert!(result.success);
        assert_eq!(result.external_id.as_deref(), Some("vid123"));
        assert_eq!(mock.requests_to("upload/youtube/v3/videos").len(), 1);
    }

    #[tokio::test]
    async fn test_text_only_post_not_supported() {
        let mock = MockTransport::new();
        let result = publisher(&mock)
            .publish(&Post::new("team", "just words"), connection())
            .await;

        let failure = result.error.unwrap();
        assert_eq!(failure.kind, ErrorKind::NotSupported);
        assert!(!failure.retryable);
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhaustion_is_rate_limit() {
        let mock = MockTransport::new();
        mock.on(
            Method::Get,
            "cdn.example.com",
            ApiResponse::new(200)
                .with_header("content-type", "video/mp4")
                .with_body(vec![5; 64]),
        );
        mock.on(
            Method::Post,
            "upload/youtube/v3/videos",
            ApiResponse::json_response(
                403,
                json!({ "error": { "code": 403, "message": "You have exceeded your quota." } }),
            ),
        );

        let result = publisher(&mock).publish(&post(), connection()).await;

        let failure = result.error.unwrap();
        assert_eq!(failure.kind, ErrorKind::RateLimitExceeded);
        assert!(failure.retryable);
        assert_eq!(result.attempts, 3);
    }

    #[test]
    fn test_upload_cost_fits_default_quota() {
        let table = Config::default_config().rate_limit_table();
        assert!(table[&Platform::Youtube].capacity >= UPLOAD_QUOTA_COST);
    }
}
