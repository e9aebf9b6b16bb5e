//! Facebook page publisher
//!
//! Text and link posts go to the page `feed`. Photos are first uploaded
//! unpublished through the `photos` edge and then attached to the feed post
//! with `attached_media`; a single video is posted through the `videos` edge
//! with `file_url`. Facebook fetches the media itself, so every item must be
//! a public URL.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{finish, require_remote, PipelineContext, Publisher, StepResult};
use crate::error::Result;
use crate::formatting::{ContentFormatter, FacebookFormatter, ValidationReport};
use crate::media::guess_mime;
use crate::transport::graph::{expect_graph_success, graph_url};
use crate::transport::ApiRequest;
use crate::types::{Connection, Delivery, MediaRef, Platform, Post, PublishResult};

const SERVICE: &str = "Facebook";

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

fn is_video(media: &MediaRef) -> bool {
    guess_mime(media).is_some_and(|m| m.is_video())
}

pub struct FacebookPublisher {
    ctx: PipelineContext,
    formatter: FacebookFormatter,
    graph_version: String,
}

impl FacebookPublisher {
    pub fn new(ctx: PipelineContext, graph_version: impl Into<String>) -> Self {
        Self {
            ctx,
            formatter: FacebookFormatter::new(),
            graph_version: graph_version.into(),
        }
    }

    async fn run(&self, post: &Post, connection: Connection) -> StepResult<Delivery> {
        let report = self.validate(post);
        let message = self.formatter.format(&post.content).text;

        // One call for the post plus one per unpublished photo
        let photos = post.media.iter().filter(|m| !is_video(m)).count() as u32;
        let connection = self
            .ctx
            .admit(Platform::Facebook, report, connection, 1 + photos)
            .await?;
        let page_id = connection.account_id("page_id")?;
        let token = connection.access_token.as_str();
        let label = format!("Facebook post {}", post.id);

        if let [video] = post.media.as_slice() {
            if is_video(video) {
                let created = self
                    .ctx
                    .create(&label, |_| self.post_video(page_id, video, &message, token))
                    .await?;
                let url = format!("https://www.facebook.com/{}/videos/{}", page_id, created.value);
                return Ok(Delivery::new(created.value, Some(url), created.attempts));
            }
        }

        let mut photo_ids = Vec::with_capacity(post.media.len());
        for photo in &post.media {
            photo_ids.push(self.upload_photo(page_id, photo, token).await?);
        }

        let link = post.metadata.link.as_deref();
        let created = self
            .ctx
            .create(&label, |_| {
                self.post_feed(page_id, &message, link, &photo_ids, token)
            })
            .await?;
        let url = format!("https://www.facebook.com/{}", created.value);
        Ok(Delivery::new(created.value, Some(url), created.attempts))
    }

    /// Upload a photo without publishing it; the id is attached to the feed post
    async fn upload_photo(&self, page_id: &str, photo: &MediaRef, token: &str) -> Result<String> {
        let request = ApiRequest::post(graph_url(&self.graph_version, &format!("{}/photos", page_id)))
            .bearer(token)
            .form_field("url", photo.as_str())
            .form_field("published", "false");
        let response = self.ctx.transport.execute(request).await?;
        let uploaded: IdResponse = expect_graph_success(SERVICE, "upload photo", response)?.json()?;
        debug!("Uploaded unpublished photo {} as {}", photo, uploaded.id);
        Ok(uploaded.id)
    }

    async fn post_feed(
        &self,
        page_id: &str,
        message: &str,
        link: Option<&str>,
        photo_ids: &[String],
        token: &str,
    ) -> Result<String> {
        let mut request = ApiRequest::post(graph_url(&self.graph_version, &format!("{}/feed", page_id)))
            .bearer(token)
            .form_field("message", message);
        if let Some(link) = link {
            request = request.form_field("link", link);
        }
        for (index, id) in photo_ids.iter().enumerate() {
            request = request.form_field(
                &format!("attached_media[{}]", index),
                json!({ "media_fbid": id }).to_string(),
            );
        }

        let response = self.ctx.transport.execute(request).await?;
        let created: IdResponse = expect_graph_success(SERVICE, "create post", response)?.json()?;
        Ok(created.id)
    }

    async fn post_video(&self, page_id: &str, video: &MediaRef, description: &str, token: &str) -> Result<String> {
        let request = ApiRequest::post(graph_url(&self.graph_version, &format!("{}/videos", page_id)))
            .bearer(token)
            .form_field("file_url", video.as_str())
            .form_field("description", description);
        let response = self.ctx.transport.execute(request).await?;
        let created: IdResponse = expect_graph_success(SERVICE, "post video", response)?.json()?;
        Ok(created.id)
    }
}

#[async_trait]
impl Publisher for FacebookPublisher {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    fn character_limit(&self) -> usize {
        self.formatter.character_limit()
    }

    fn validate(&self, post: &Post) -> ValidationReport {
        let mut errors = require_remote(Platform::Facebook, post);
        if post.content.trim().is_empty() && !post.has_media() && post.metadata.link.is_none() {
            errors.push("Facebook posts need text, a link or media".to_string());
        }
        if post.media.len() > 1 && post.media.iter().any(is_video) {
            errors.push("A Facebook video must be the only media item of a post".to_string());
        }
        self.formatter
            .validate(&post.content)
            .merge(ValidationReport::new(errors, Vec::new()))
    }

    async fn publish(&self, post: &Post, connection: Connection) -> PublishResult {
        let outcome = self.run(post, connection).await;
        finish(Platform::Facebook, post, outcome)
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
    use std::sync::Arc;

    fn publisher(mock: &MockTransport) -> FacebookPublisher {
        let ctx = PipelineContext::from_config(
            &Config::default_config(),
            Arc::new(mock.clone()),
            Arc::new(InMemoryRepository::new()),
        );
        FacebookPublisher::new(ctx, "v19.0")
    }

    fn connection() -> Connection {
        let mut connection = Connection::new("team", Platform::Facebook, "page-token");
        connection.metadata.insert("page_id".to_string(), "42".to_string());
        connection
    }

    #[tokio::test]
    async fn test_text_post_with_link() {
        let mock = MockTransport::new();
        mock.on(
            Method::Post,
            "42/feed",
            ApiResponse::json_response(200, json!({ "id": "42_1001" })),
        );
        let mut post = Post::new("team", "Read the announcement");
        post.metadata.link = Some("https://example.com/news".to_string());

        let result = publisher(&mock).publish(&post, connection()).await;

        assert!(result.success);
        assert_eq!(result.url.as_deref(), Some("https://www.facebook.com/42_1001"));
        let request = &mock.requests_to("42/feed")[0];
        assert_eq!(request.url, "https://graph.facebook.com/v19.0/42/feed");
        assert_eq!(request.form_value("message"), Some("Read the announcement"));
        assert_eq!(request.form_value("link"), Some("https://example.com/news"));
    }

    #[tokio::test]
    async fn test_photos_uploaded_unpublished_then_attached() {
        let mock = MockTransport::new();
        mock.on(Method::Post, "42/photos", ApiResponse::json_response(200, json!({ "id": "p1" })))
            .on(Method::Post, "42/photos", ApiResponse::json_response(200, json!({ "id": "p2" })));
        mock.on(Method::Post, "42/feed", ApiResponse::json_response(200, json!({ "id": "42_7" })));
        let post = Post::new("team", "Album").with_media([
            "https://cdn.example.com/a.jpg",
            "https://cdn.example.com/b.jpg",
        ]);

        let result = publisher(&mock).publish(&post, connection()).await;

        assert!(result.success);
        let photos = mock.requests_to("42/photos");
        assert_eq!(photos.len(), 2);
        assert_eq!(photos[0].form_value("published"), Some("false"));
        assert_eq!(photos[1].form_value("url"), Some("https://cdn.example.com/b.jpg"));

        let feed = &mock.requests_to("42/feed")[0];
        assert_eq!(feed.form_value("attached_media[0]"), Some(r#"{"media_fbid":"p1"}"#));
        assert_eq!(feed.form_value("attached_media[1]"), Some(r#"{"media_fbid":"p2"}"#));
    }

    #[tokio::test]
    async fn test_single_video_uses_videos_edge() {
        let mock = MockTransport::new();
        mock.on(Method::Post, "42/videos", ApiResponse::json_response(200, json!({ "id": "v9" })));
        let post = Post::new("team", "Watch this").with_media(["https://cdn.example.com/clip.mp4"]);

        let result = publisher(&mock).publish(&post, connection()).await;

        assert!(result.success);
        assert_eq!(result.url.as_deref(), Some("https://www.facebook.com/42/videos/v9"));
        let request = &mock.requests_to("42/videos")[0];
        assert_eq!(request.form_value("file_url"), Some("https://cdn.example.com/clip.mp4"));
        assert_eq!(request.form_value("description"), Some("Watch this"));
        assert!(mock.requests_to("42/feed").is_empty());
    }

    #[tokio::test]
    async fn test_expired_page_token_is_fatal() {
        let mock = MockTransport::new();
        mock.on(
            Method::Post,
            "42/feed",
            ApiResponse::json_response(
                400,
                json!({ "error": { "message": "Session has expired", "code": 190 } }),
            ),
        );

        let result = publisher(&mock).publish(&Post::new("team", "hi"), connection()).await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, ErrorKind::AuthenticationFailed);
        assert_eq!(mock.requests_to("42/feed").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_page_id_is_authentication_error() {
        let mock = MockTransport::new();
        let connection = Connection::new("team", Platform::Facebook, "page-token");

        let result = publisher(&mock).publish(&Post::new("team", "hi"), connection).await;

        assert_eq!(result.error.unwrap().kind, ErrorKind::AuthenticationFailed);
        assert_eq!(mock.request_count(), 0);
    }

    #[test]
    fn test_local_media_and_mixed_video_rejected() {
        let publisher = publisher(&MockTransport::new());
        let local = Post::new("team", "x").with_media(["./photo.jpg"]);
        assert!(!publisher.validate(&local).valid);

        let mixed = Post::new("team", "x").with_media([
            "https://cdn.example.com/clip.mp4",
            "https://cdn.example.com/a.jpg",
        ]);
        assert!(!publisher.validate(&mixed).valid);

        assert!(!publisher.validate(&Post::new("team", "  ")).valid);
    }
}
