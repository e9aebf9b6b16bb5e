//! LinkedIn publisher
//!
//! Shares are created through `ugcPosts`. Media is uploaded as assets first
//! and referenced by URN; an article link without media becomes an
//! `ARTICLE` share.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{finish, PipelineContext, Publisher, StepResult};
use crate::error::{PlatformError, Result};
use crate::formatting::{ContentFormatter, LinkedinFormatter, ValidationReport};
use crate::media::guess_mime;
use crate::transport::{expect_success, ApiRequest};
use crate::types::{Connection, Delivery, Platform, Post, PublishResult};
use crate::upload::linkedin::{LinkedinAsset, LinkedinUploader, API_BASE_URL};

/// Images a single share can carry
pub const MAX_IMAGES: usize = 9;

const SERVICE: &str = "LinkedIn";

#[derive(Debug, Deserialize)]
struct CreatedShare {
    #[serde(default)]
    id: Option<String>,
}

/// `shareMediaCategory` of a share
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareCategory {
    None,
    Article,
    Image,
    Video,
}

impl ShareCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareCategory::None => "NONE",
            ShareCategory::Article => "ARTICLE",
            ShareCategory::Image => "IMAGE",
            ShareCategory::Video => "VIDEO",
        }
    }

    fn for_share(assets: &[LinkedinAsset], link: Option<&str>) -> Self {
        match assets.first() {
            Some(asset) if asset.is_video => ShareCategory::Video,
            Some(_) => ShareCategory::Image,
            None if link.is_some() => ShareCategory::Article,
            None => ShareCategory::None,
        }
    }
}

pub struct LinkedinPublisher {
    ctx: PipelineContext,
    formatter: LinkedinFormatter,
    uploader: LinkedinUploader,
}

impl LinkedinPublisher {
    pub fn new(ctx: PipelineContext) -> Self {
        let uploader = LinkedinUploader::new(ctx.transport.clone(), ctx.poll.clone());
        Self {
            ctx,
            formatter: LinkedinFormatter::new(),
            uploader,
        }
    }

    pub fn share_url(urn: &str) -> String {
        format!("https://www.linkedin.com/feed/update/{}", urn)
    }

    async fn run(&self, post: &Post, connection: Connection) -> StepResult<Delivery> {
        let report = self.validate(post);
        let commentary = self.formatter.format(&post.content).text;
        let cost = 1 + post.media.len() as u32;
        let connection = self.ctx.admit(Platform::Linkedin, report, connection, cost).await?;
        let author = connection.account_id("author_urn")?;
        let token = connection.access_token.as_str();

        let mut assets = Vec::with_capacity(post.media.len());
        for media in &post.media {
            let blob = self.ctx.media.load(media).await?;
            assets.push(self.uploader.upload(&blob, author, token).await?);
        }

        let body = share_body(author, &commentary, &assets, post.metadata.link.as_deref());
        let label = format!("LinkedIn share of post {}", post.id);
        let created = self
            .ctx
            .create(&label, |_| self.create_share(body.clone(), token))
            .await?;

        let url = Self::share_url(&created.value);
        Ok(Delivery::new(created.value, Some(url), created.attempts))
    }

    async fn create_share(&self, body: serde_json::Value, token: &str) -> Result<String> {
        let request = ApiRequest::post(format!("{}/ugcPosts", API_BASE_URL))
            .bearer(token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(body);
        let response = self.ctx.transport.execute(request).await?;
        let response = expect_success(SERVICE, "create share", response)?;

        if let Some(id) = response.header("x-restli-id") {
            return Ok(id.to_string());
        }
        response.json::<CreatedShare>()?.id.ok_or_else(|| {
            PlatformError::api(
                Some(response.status),
                None,
                "LinkedIn did not return the id of the created share",
            )
            .into()
        })
    }
}

fn share_body(author: &str, commentary: &str, assets: &[LinkedinAsset], link: Option<&str>) -> serde_json::Value {
    let category = ShareCategory::for_share(assets, link);
    let mut content = json!({
        "shareCommentary": { "text": commentary },
        "shareMediaCategory": category.as_str(),
    });
    match category {
        ShareCategory::Image | ShareCategory::Video => {
            let media: Vec<serde_json::Value> = assets
                .iter()
                .map(|a| json!({ "status": "READY", "media": a.urn }))
                .collect();
            content["media"] = json!(media);
        }
        ShareCategory::Article => {
            content["media"] = json!([{ "status": "READY", "originalUrl": link }]);
        }
        ShareCategory::None => {}
    }

    json!({
        "author": author,
        "lifecycleState": "PUBLISHED",
        "specificContent": { "com.linkedin.ugc.ShareContent": content },
        "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" },
    })
}

#[async_trait]
impl Publisher for LinkedinPublisher {
    fn platform(&self) -> Platform {
        Platform::Linkedin
    }

    fn character_limit(&self) -> usize {
        self.formatter.character_limit()
    }

    fn validate(&self, post: &Post) -> ValidationReport {
        let mut errors = Vec::new();
        let videos = post
            .media
            .iter()
            .filter(|m| guess_mime(m).is_some_and(|mime| mime.is_video()))
            .count();
        if videos > 0 && post.media.len() > 1 {
            errors.push("A LinkedIn video must be the only media item of a share".to_string());
        }
        if post.media.len() > MAX_IMAGES {
            errors.push(format!(
                "LinkedIn shares carry at most {} images, got {}",
                MAX_IMAGES,
                post.media.len()
            ));
        }
        let commentary = self.formatter.format(&post.content).text;
        self.formatter
            .validate(&commentary)
            .merge(ValidationReport::new(errors, Vec::new()))
    }

    async fn publish(&self, post: &Post, connection: Connection) -> PublishResult {
        let outcome = self.run(post, connection).await;
        finish(Platform::Linkedin, post, outcome)
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
    use std::sync::Arc;
    use std::time::Duration;

    fn publisher(mock: &MockTransport) -> LinkedinPublisher {
        let ctx = PipelineContext::from_config(
            &Config::default_config(),
            Arc::new(mock.clone()),
            Arc::new(InMemoryRepository::new()),
        )
        .with_poll_policy(PollPolicy {
            interval: Duration::from_secs(1),
            max_attempts: 3,
        });
        LinkedinPublisher::new(ctx)
    }

    fn connection() -> Connection {
        let mut connection = Connection::new("team", Platform::Linkedin, "li-token");
        connection
            .metadata
            .insert("author_urn".to_string(), "urn:li:organization:77".to_string());
        connection
    }

    fn created() -> ApiResponse {
        ApiResponse::new(201).with_header("X-RestLi-Id", "urn:li:share:555")
    }

    #[tokio::test]
    async fn test_text_share() {
        let mock = MockTransport::new();
        mock.on(Method::Post, "ugcPosts", created());

        let result = publisher(&mock)
            .publish(&Post::new("team", "We're **hiring** btw"), connection())
            .await;

        assert!(result.success);
        assert_eq!(result.external_id.as_deref(), Some("urn:li:share:555"));
        assert_eq!(
            result.url.as_deref(),
            Some("https://www.linkedin.com/feed/update/urn:li:share:555")
        );

        let request = &mock.requests_to("ugcPosts")[0];
        assert_eq!(request.header_value("X-Restli-Protocol-Version"), Some("2.0.0"));
        let body = request.json_body().unwrap();
        assert_eq!(body["author"], "urn:li:organization:77");
        let content = &body["specificContent"]["com.linkedin.ugc.ShareContent"];
        assert_eq!(content["shareMediaCategory"], "NONE");
        assert_eq!(content["shareCommentary"]["text"], "We're hiring by the way");
    }

    #[tokio::test]
    async fn test_article_share() {
        let mock = MockTransport::new();
        mock.on(Method::Post, "ugcPosts", created());
        let mut post = Post::new("team", "Our latest write-up");
        post.metadata.link = Some("https://blog.example.com/post".to_string());

        publisher(&mock).publish(&post, connection()).await;

        let body = mock.requests_to("ugcPosts")[0].json_body().cloned().unwrap();
        let content = &body["specificContent"]["com.linkedin.ugc.ShareContent"];
        assert_eq!(content["shareMediaCategory"], "ARTICLE");
        assert_eq!(content["media"][0]["originalUrl"], "https://blog.example.com/post");
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_share_references_uploaded_asset() {
        let mock = MockTransport::new();
        mock.on(
            Method::Get,
            "cdn.example.com",
            ApiResponse::new(200)
                .with_header("content-type", "image/jpeg")
                .with_body(vec![7; 16]),
        );
        mock.on(
            Method::Post,
            "/v2/assets",
            ApiResponse::json_response(
                200,
                json!({
                    "value": {
                        "asset": "urn:li:digitalmediaAsset:D1",
                        "uploadMechanism": {
                            "com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest": {
                                "uploadUrl": "https://upload.linkedin.example/put/D1"
                            }
                        }
                    }
                }),
            ),
        );
        mock.on(Method::Put, "put/D1", ApiResponse::new(201));
        mock.on(
            Method::Get,
            "assets/D1",
            ApiResponse::json_response(200, json!({ "recipes": [{ "status": "AVAILABLE" }] })),
        );
        mock.on(Method::Post, "ugcPosts", created());

        let post = Post::new("team", "Team offsite").with_media(["https://cdn.example.com/team.jpg"]);
        let result = publisher(&mock).publish(&post, connection()).await;

        assert!(result.success, "{:?}", result.error);
        let body = mock.requests_to("ugcPosts")[0].json_body().cloned().unwrap();
        let content = &body["specificContent"]["com.linkedin.ugc.ShareContent"];
        assert_eq!(content["shareMediaCategory"], "IMAGE");
        assert_eq!(content["media"][0]["media"], "urn:li:digitalmediaAsset:D1");
    }

    #[tokio::test]
    async fn test_expired_token_response_is_fatal() {
        let mock = MockTransport::new();
        mock.on(
            Method::Post,
            "ugcPosts",
            ApiResponse::json_response(401, json!({ "message": "Invalid access token" })),
        );

        let result = publisher(&mock).publish(&Post::new("team", "hello"), connection()).await;

        assert_eq!(result.error.unwrap().kind, ErrorKind::AuthenticationFailed);
        assert_eq!(mock.requests_to("ugcPosts").len(), 1);
    }

    #[test]
    fn test_video_must_be_alone() {
        let post = Post::new("team", "mixed").with_media([
            "https://cdn.example.com/a.mp4",
            "https://cdn.example.com/b.jpg",
        ]);
        assert!(!publisher(&MockTransport::new()).validate(&post).valid);
    }
}
