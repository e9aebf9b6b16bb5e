//! Mock publisher for testing
//!
//! A configurable [`Publisher`] that can simulate successes, classified
//! failures and slow platforms without any network access. Used by the job
//! handler, worker pool and binary tests.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::error::{CrosspostError, PlatformError};
use crate::formatting::ValidationReport;
use crate::platforms::Publisher;
use crate::types::{Connection, Delivery, Platform, Post, PublishResult};

/// Configuration for mock publisher behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub platform: Platform,

    /// Error to classify into a failed result; `None` publishes successfully
    pub failure: Option<PlatformError>,

    /// Delay before completing (simulates network latency)
    pub delay: Duration,

    pub character_limit: usize,

    /// Attempts reported on the result
    pub attempts: u32,

    pub publish_call_count: Arc<Mutex<usize>>,

    /// Contents of every post handed to `publish`
    pub published_content: Arc<Mutex<Vec<String>>>,

    /// Access tokens seen by `publish`
    pub seen_tokens: Arc<Mutex<Vec<String>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Twitter,
            failure: None,
            delay: Duration::ZERO,
            character_limit: 280,
            attempts: 1,
            publish_call_count: Arc::new(Mutex::new(0)),
            published_content: Arc::new(Mutex::new(Vec::new())),
            seen_tokens: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock publisher for testing
#[derive(Debug, Clone)]
pub struct MockPublisher {
    config: MockConfig,
}

impl MockPublisher {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// A publisher that always succeeds
    pub fn success(platform: Platform) -> Self {
        Self::new(MockConfig {
            platform,
            ..Default::default()
        })
    }

    /// A publisher whose every publish fails with `error`
    pub fn failure(platform: Platform, error: PlatformError) -> Self {
        Self::new(MockConfig {
            platform,
            failure: Some(error),
            ..Default::default()
        })
    }

    /// A successful publisher that takes `delay` per publish
    pub fn with_delay(platform: Platform, delay: Duration) -> Self {
        Self::new(MockConfig {
            platform,
            delay,
            ..Default::default()
        })
    }

    pub fn publish_call_count(&self) -> usize {
        *lock(&self.config.publish_call_count)
    }

    pub fn published_content(&self) -> Vec<String> {
        lock(&self.config.published_content).clone()
    }

    pub fn seen_tokens(&self) -> Vec<String> {
        lock(&self.config.seen_tokens).clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn platform(&self) -> Platform {
        self.config.platform
    }

    fn character_limit(&self) -> usize {
        self.config.character_limit
    }

    fn validate(&self, post: &Post) -> ValidationReport {
        let mut errors = Vec::new();
        if post.content.trim().is_empty() && !post.has_media() {
            errors.push("Content cannot be empty".to_string());
        }
        let length = post.content.chars().count();
        if length > self.config.character_limit {
            errors.push(format!(
                "Content exceeds {} character limit (got {} characters)",
                self.config.character_limit, length
            ));
        }
        ValidationReport::new(errors, Vec::new())
    }

    async fn publish(&self, post: &Post, connection: Connection) -> PublishResult {
        *lock(&self.config.publish_call_count) += 1;
        lock(&self.config.seen_tokens).push(connection.access_token.clone());

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        let report = self.validate(post);
        if !report.valid {
            let error = CrosspostError::from(PlatformError::Validation(report.errors));
            return PublishResult::failed(self.config.platform, &error, 0);
        }

        match &self.config.failure {
            Some(failure) => {
                let error = CrosspostError::from(failure.clone());
                PublishResult::failed(self.config.platform, &error, self.config.attempts)
            }
            None => {
                lock(&self.config.published_content).push(post.content.clone());
                let id = format!("{}:mock-{}", self.config.platform, uuid::Uuid::new_v4());
                let url = Some(format!("https://mock.example/{}", id));
                PublishResult::succeeded(
                    self.config.platform,
                    Delivery::new(id, url, self.config.attempts),
                )
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
