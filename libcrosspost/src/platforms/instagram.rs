//! Instagram publisher
//!
//! Instagram publishing is a two-step container flow: containers are
//! created from public media URLs, polled until `FINISHED`, and only then
//! published with `media_publish`. Two or more items become a carousel.

use async_trait::async_trait;

use super::{finish, PipelineContext, Publisher, StepResult};
use crate::error::{CrosspostError, PlatformError};
use crate::formatting::{ContentFormatter, InstagramFormatter, ValidationReport};
use crate::types::{Connection, Delivery, Platform, Post, PublishResult};
use crate::upload::instagram::{validate_media, InstagramUploader};

pub struct InstagramPublisher {
    ctx: PipelineContext,
    formatter: InstagramFormatter,
    uploader: InstagramUploader,
}

impl InstagramPublisher {
    pub fn new(ctx: PipelineContext, graph_version: impl Into<String>) -> Self {
        let uploader = InstagramUploader::new(ctx.transport.clone(), ctx.poll.clone(), graph_version);
        Self {
            ctx,
            formatter: InstagramFormatter::new(),
            uploader,
        }
    }

    async fn run(&self, post: &Post, connection: Connection) -> StepResult<Delivery> {
        let report = self.validate(post);
        let caption = self.formatter.format(&post.content).text;
        let connection = self.ctx.admit(Platform::Instagram, report, connection, 1).await?;
        let ig_user_id = connection.account_id("ig_user_id")?;
        let token = connection.access_token.as_str();

        let container = self
            .uploader
            .prepare(ig_user_id, &post.media, &caption, token)
            .await?;

        let label = format!("Instagram publish of post {}", post.id);
        let published = self
            .ctx
            .create(&label, |_| {
                let mut attempt = container.clone();
                async move { self.uploader.publish(ig_user_id, &mut attempt, token).await }
            })
            .await?;

        let url = self.uploader.permalink(&published.value, token).await;
        Ok(Delivery::new(published.value, url, published.attempts))
    }
}

#[async_trait]
impl Publisher for InstagramPublisher {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn character_limit(&self) -> usize {
        self.formatter.character_limit()
    }

    fn validate(&self, post: &Post) -> ValidationReport {
        let mut errors = Vec::new();
        match validate_media(&post.media) {
            Err(CrosspostError::Platform(PlatformError::Validation(found))) => errors.extend(found),
            Err(other) => errors.push(other.to_string()),
            Ok(()) => {}
        }
        // The caption is truncated to fit, so only what survives shaping is checked
        let caption = self.formatter.format(&post.content).text;
        self.formatter
            .validate(&caption)
            .merge(ValidationReport::new(errors, Vec::new()))
    }

    async fn publish(&self, post: &Post, connection: Connection) -> PublishResult {
        let outcome = self.run(post, connection).await;
        finish(Platform::Instagram, post, outcome)
    }
}
