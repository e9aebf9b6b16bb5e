//! X/Twitter publisher
//!
//! Posts through the v2 `tweets` endpoint. Content that does not fit one
//! tweet goes out as a thread: tweets are created strictly in order, each
//! replying to the previous one, with any media attached to the first.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{finish, PipelineContext, Publisher, StepFailure, StepResult};
use crate::error::Result;
use crate::formatting::{ContentFormatter, TwitterFormatter, ValidationReport};
use crate::media::guess_mime;
use crate::transport::{expect_success, ApiRequest};
use crate::types::{Connection, Delivery, MediaMimeType, Platform, Post, PublishResult};
use crate::upload::twitter::{TwitterUploader, MAX_MEDIA_PER_TWEET};

pub const TWEETS_URL: &str = "https://api.twitter.com/2/tweets";

const SERVICE: &str = "X";

#[derive(Debug, Deserialize)]
struct CreateTweetResponse {
    data: CreatedTweet,
}

#[derive(Debug, Deserialize)]
struct CreatedTweet {
    id: String,
}

pub struct TwitterPublisher {
    ctx: PipelineContext,
    uploader: TwitterUploader,
    numbering: bool,
}

impl TwitterPublisher {
    pub fn new(ctx: PipelineContext, numbering: bool) -> Self {
        let uploader = TwitterUploader::new(ctx.transport.clone(), ctx.poll.clone());
        Self {
            ctx,
            uploader,
            numbering,
        }
    }

    fn formatter(&self, post: &Post) -> TwitterFormatter {
        TwitterFormatter::new(self.numbering).with_media(post.has_media())
    }

    /// Canonical URL; falls back to the account-agnostic form without a username
    pub fn status_url(connection: &Connection, tweet_id: &str) -> String {
        match connection.metadata.get("username").filter(|u| !u.is_empty()) {
            Some(username) => format!(
                "https://x.com/{}/status/{}",
                username.trim_start_matches('@'),
                tweet_id
            ),
            None => format!("https://x.com/i/web/status/{}", tweet_id),
        }
    }

    async fn run(&self, post: &Post, connection: Connection) -> StepResult<Delivery> {
        let report = self.validate(post);
        let formatted = self.formatter(post).format(&post.content);
        let connection = self.ctx.admit(Platform::Twitter, report, connection, 1).await?;
        let token = connection.access_token.as_str();

        let mut media_ids = Vec::with_capacity(post.media.len());
        for media in &post.media {
            let blob = self.ctx.media.load(media).await?;
            media_ids.push(self.uploader.upload(&blob, token).await?);
        }

        let pieces = formatted.pieces();
        let mut ids: Vec<String> = Vec::with_capacity(pieces.len());
        let mut attempts = 0;

        for (index, text) in pieces.iter().enumerate() {
            if index > 0 {
                // Each reply is its own call against the bucket
                self.ctx
                    .limiter
                    .acquire(Platform::Twitter, 1)
                    .await
                    .map_err(|error| interrupted(post, StepFailure::new(error, attempts), &ids))?;
            }

            let media: &[String] = if index == 0 { &media_ids } else { &[] };
            let reply_to = ids.last().map(String::as_str);
            let label = format!("X tweet {}/{} of post {}", index + 1, pieces.len(), post.id);

            let created = self
                .ctx
                .create(&label, |_| self.create_tweet(text, media, reply_to, token))
                .await
                .map_err(|exhausted| {
                    let failure = StepFailure::new(exhausted.error, attempts + exhausted.attempts);
                    interrupted(post, failure, &ids)
                })?;

            attempts += created.attempts;
            debug!("Created tweet {} ({}/{})", created.value, index + 1, pieces.len());
            ids.push(created.value);
        }

        let first = ids.first().cloned().unwrap_or_default();
        let mut delivery = Delivery::new(
            first.clone(),
            Some(Self::status_url(&connection, &first)),
            attempts,
        );
        if ids.len() > 1 {
            delivery.thread_ids = ids;
        }
        Ok(delivery)
    }

    async fn create_tweet(
        &self,
        text: &str,
        media_ids: &[String],
        reply_to: Option<&str>,
        access_token: &str,
    ) -> Result<String> {
        let mut body = json!({ "text": text });
        if !media_ids.is_empty() {
            body["media"] = json!({ "media_ids": media_ids });
        }
        if let Some(parent) = reply_to {
            body["reply"] = json!({ "in_reply_to_tweet_id": parent });
        }

        let request = ApiRequest::post(TWEETS_URL).bearer(access_token).json(body);
        let response = self.ctx.transport.execute(request).await?;
        let created: CreateTweetResponse =
            expect_success(SERVICE, "create tweet", response)?.json()?;
        Ok(created.data.id)
    }
}

/// Attach the tweets already posted to a failure that cut the thread short
fn interrupted(post: &Post, mut failure: StepFailure, ids: &[String]) -> StepFailure {
    if !ids.is_empty() {
        warn!(
            "Thread for post {} interrupted after {} tweet(s): {}",
            post.id,
            ids.len(),
            ids.join(", ")
        );
        failure.thread_ids = ids.to_vec();
    }
    failure
}

#[async_trait]
impl Publisher for TwitterPublisher {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    fn character_limit(&self) -> usize {
        crate::formatting::twitter::CHARACTER_LIMIT
    }

    fn validate(&self, post: &Post) -> ValidationReport {
        let mut errors = Vec::new();
        if post.media.len() > MAX_MEDIA_PER_TWEET {
            errors.push(format!(
                "X allows at most {} media items per tweet, got {}",
                MAX_MEDIA_PER_TWEET,
                post.media.len()
            ));
        }
        let exclusive = post
            .media
            .iter()
            .filter_map(guess_mime)
            .filter(|m| m.is_video() || *m == MediaMimeType::Gif)
            .count();
        if exclusive > 0 && post.media.len() > 1 {
            errors.push("A video or GIF must be the only media item of a tweet".to_string());
        }

        self.formatter(post)
            .validate(&post.content)
            .merge(ValidationReport::new(errors, Vec::new()))
    }

    async fn publish(&self, post: &Post, connection: Connection) -> PublishResult {
        let outcome = self.run(post, connection).await;
        finish(Platform::Twitter, post, outcome)
    }
}
