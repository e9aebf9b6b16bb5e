//! Publish job handling
//!
//! The consumer side of the external job queue. A [`PublishJob`] names a post
//! and a platform; [`JobHandler::handle`] loads both records, runs the
//! platform's publisher under a deadline and records the result.
//!
//! The return value is the contract with the queue: `Ok` is terminal
//! (published, or failed in a way another attempt cannot fix) and an `Err`
//! whose [`is_retryable`](crate::error::CrosspostError::is_retryable) is true
//! asks for a requeue.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{CrosspostError, PlatformError, Result};
use crate::platforms::PublisherRegistry;
use crate::repository::PostRepository;
use crate::types::{Platform, PublishResult};

/// "Publish this post to this platform"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishJob {
    pub post_id: String,
    pub platform: Platform,
    /// Delivery attempt as counted by the queue, starting at 1
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl PublishJob {
    pub fn new(post_id: impl Into<String>, platform: Platform) -> Self {
        Self {
            post_id: post_id.into(),
            platform,
            attempt: first_attempt(),
        }
    }
}

/// Terminal outcome of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Published(PublishResult),
    /// Failed for good; requeueing would fail the same way
    Failed(PublishResult),
}

impl JobOutcome {
    pub fn result(&self) -> &PublishResult {
        match self {
            JobOutcome::Published(result) | JobOutcome::Failed(result) => result,
        }
    }
}

pub struct JobHandler {
    repo: Arc<dyn PostRepository>,
    registry: PublisherRegistry,
    deadline: Duration,
}

impl JobHandler {
    pub fn new(repo: Arc<dyn PostRepository>, registry: PublisherRegistry, deadline: Duration) -> Self {
        Self {
            repo,
            registry,
            deadline,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run one job to a terminal outcome or a retryable error
    ///
    /// # Errors
    ///
    /// - Repository failures loading the post or connection
    /// - `PlatformError::NotSupported` when no publisher is registered
    /// - `CrosspostError::Publish` for a failure that may succeed on requeue;
    ///   the failed publication has already been recorded
    pub async fn handle(&self, job: &PublishJob) -> Result<JobOutcome> {
        let post = self.repo.get_post(&job.post_id).await?;
        if !post.platforms.is_empty() && !post.platforms.contains(&job.platform) {
            return Err(CrosspostError::InvalidInput(format!(
                "post {} does not target {}",
                post.id, job.platform
            )));
        }

        let publisher = self.registry.resolve(job.platform)?;
        let connection = self
            .repo
            .get_active_connection(&post.team_id, job.platform)
            .await?;

        info!(
            "Publishing post {} to {} (attempt {})",
            post.id, job.platform, job.attempt
        );
        let result = match timeout(self.deadline, publisher.publish(&post, connection)).await {
            Ok(result) => result,
            Err(_) => {
                let error = CrosspostError::from(PlatformError::Timeout(format!(
                    "publishing post {} to {} exceeded the {}s deadline",
                    post.id,
                    job.platform,
                    self.deadline.as_secs()
                )));
                warn!("{}", error);
                PublishResult::failed(job.platform, &error, 0)
            }
        };

        self.repo
            .record_publication(&post.id, job.platform, &result)
            .await?;

        if result.success {
            return Ok(JobOutcome::Published(result));
        }
        match &result.error {
            Some(failure) if failure.retryable => Err(CrosspostError::Publish {
                platform: job.platform,
                failure: failure.clone(),
            }),
            _ => Ok(JobOutcome::Failed(result)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::platforms::mock::MockPublisher;
    use crate::platforms::Publisher;
    use crate::repository::InMemoryRepository;
    use crate::types::{Connection, Post};

    async fn setup(publisher: MockPublisher) -> (Arc<InMemoryRepository>, JobHandler, Post) {
        let repo = Arc::new(InMemoryRepository::new());
        let post = Post::new("team-1", "Hello");
        repo.insert_post(post.clone()).await;
        repo.insert_connection(Connection::new("team-1", publisher.platform(), "token"))
            .await;

        let mut registry = PublisherRegistry::new();
        registry.register(Arc::new(publisher));
        let handler = JobHandler::new(repo.clone(), registry, Duration::from_secs(5));
        (repo, handler, post)
    }

    #[tokio::test]
    async fn test_success_is_recorded_and_terminal() {
        let (repo, handler, post) = setup(MockPublisher::success(Platform::Linkedin)).await;

        let outcome = handler
            .handle(&PublishJob::new(&post.id, Platform::Linkedin))
            .await
            .unwrap();

        assert!(matches!(outcome, JobOutcome::Published(_)));
        let publications = repo.publications().await;
        assert_eq!(publications.len(), 1);
        assert!(publications[0].result.success);
    }

    #[tokio::test]
    async fn test_retryable_failure_is_recorded_then_requeued() {
        let publisher = MockPublisher::failure(
            Platform::Twitter,
            PlatformError::Network("connection reset".to_string()),
        );
        let (repo, handler, post) = setup(publisher).await;

        let err = handler
            .handle(&PublishJob::new(&post.id, Platform::Twitter))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Network);
        let publications = repo.publications().await;
        assert_eq!(publications.len(), 1);
        assert!(!publications[0].result.success);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_terminal() {
        let publisher = MockPublisher::failure(
            Platform::Facebook,
            PlatformError::Authentication("token revoked".to_string()),
        );
        let (_, handler, post) = setup(publisher).await;

        let outcome = handler
            .handle(&PublishJob::new(&post.id, Platform::Facebook))
            .await
            .unwrap();

        match outcome {
            JobOutcome::Failed(result) => {
                assert_eq!(result.error.unwrap().kind, ErrorKind::AuthenticationFailed)
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_surfaces_retryable_timeout() {
        let publisher = MockPublisher::with_delay(Platform::Youtube, Duration::from_secs(60));
        let (repo, handler, post) = setup(publisher).await;

        let err = handler
            .handle(&PublishJob::new(&post.id, Platform::Youtube))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(
            repo.publications().await[0].result.error.as_ref().unwrap().kind,
            ErrorKind::Timeout
        );
    }

    #[tokio::test]
    async fn test_missing_post_and_connection() {
        let (_, handler, post) = setup(MockPublisher::success(Platform::Twitter)).await;

        let missing_post = handler
            .handle(&PublishJob::new("nope", Platform::Twitter))
            .await
            .unwrap_err();
        assert!(!missing_post.is_retryable());

        let mut registry = PublisherRegistry::new();
        registry.register(Arc::new(MockPublisher::success(Platform::Instagram)));
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_post(post.clone()).await;
        let handler = JobHandler::new(repo, registry, Duration::from_secs(5));
        let no_connection = handler
            .handle(&PublishJob::new(&post.id, Platform::Instagram))
            .await
            .unwrap_err();
        assert_eq!(no_connection.kind(), ErrorKind::Repository);
    }

    #[test]
    fn test_job_json_defaults_attempt() {
        let job: PublishJob = serde_json::from_str(r#"{"post_id":"p1","platform":"x"}"#).unwrap();
        assert_eq!(job, PublishJob::new("p1", Platform::Twitter));
    }
}
