//! Bounded-concurrency worker pool
//!
//! Jobs are admitted through a semaphore so at most `concurrency` publishes
//! run at once, and every admitted job lives in a `JoinSet` until its report
//! is collected. Shutdown stops admission and drains whatever is in flight.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{CrosspostError, Result};
use crate::job::{JobHandler, JobOutcome, PublishJob};
use crate::types::PublishResult;

/// What the queue should do with a finished job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Published,
    /// Failed for good
    Failed,
    /// Failed in a way another attempt may fix
    Requeue,
    /// Could not be run at all (missing post, connection or publisher)
    Rejected,
}

/// Per-job report written by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job: PublishJob,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<PublishResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl JobReport {
    pub fn from_outcome(job: PublishJob, outcome: Result<JobOutcome>) -> Self {
        match outcome {
            Ok(JobOutcome::Published(result)) => Self::finished(job, JobStatus::Published, result),
            Ok(JobOutcome::Failed(result)) => Self::finished(job, JobStatus::Failed, result),
            Err(error) => Self::errored(job, &error),
        }
    }

    fn finished(job: PublishJob, status: JobStatus, result: PublishResult) -> Self {
        let error = result.error.as_ref().map(|e| e.message.clone());
        Self {
            job,
            status,
            result: Some(result),
            error,
            retry_after_secs: None,
        }
    }

    fn errored(job: PublishJob, error: &CrosspostError) -> Self {
        let status = if error.is_retryable() {
            JobStatus::Requeue
        } else {
            JobStatus::Rejected
        };
        Self {
            job,
            status,
            result: None,
            error: Some(error.to_string()),
            retry_after_secs: error.retry_after().map(|d| d.as_secs()),
        }
    }
}

pub struct WorkerPool {
    handler: Arc<JobHandler>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<JobReport>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(handler: Arc<JobHandler>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            handler,
            permits: Arc::new(Semaphore::new(concurrency)),
            tasks: JoinSet::new(),
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Jobs started and not yet collected
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for a free slot, then start `job`
    pub async fn submit(&mut self, job: PublishJob) -> Result<()> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CrosspostError::InvalidInput("worker pool is shut down".to_string()))?;

        debug!("Starting job for post {} on {}", job.post_id, job.platform);
        let handler = self.handler.clone();
        self.tasks.spawn(async move {
            let outcome = handler.handle(&job).await;
            drop(permit);
            JobReport::from_outcome(job, outcome)
        });
        Ok(())
    }

    /// Next finished job, or `None` when nothing is in flight
    pub async fn next_report(&mut self) -> Option<JobReport> {
        loop {
            match self.tasks.join_next().await? {
                Ok(report) => return Some(report),
                // A panicked job is lost to the pool; the queue will redeliver it
                Err(e) => error!("Publish task failed: {}", e),
            }
        }
    }

    /// Stop admitting jobs and wait for everything in flight
    pub async fn drain(&mut self) -> Vec<JobReport> {
        self.permits.close();
        if !self.tasks.is_empty() {
            info!("Draining {} in-flight job(s)", self.tasks.len());
        }
        let mut reports = Vec::with_capacity(self.tasks.len());
        while let Some(report) = self.next_report().await {
            reports.push(report);
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::platforms::mock::MockPublisher;
    use crate::platforms::PublisherRegistry;
    use crate::repository::InMemoryRepository;
    use crate::types::{Connection, Platform, Post};
    use std::time::Duration;

    async fn handler(publishers: Vec<MockPublisher>) -> (Arc<JobHandler>, Vec<Post>) {
        let repo = Arc::new(InMemoryRepository::new());
        let mut registry = PublisherRegistry::new();
        for publisher in publishers {
            let platform = crate::platforms::Publisher::platform(&publisher);
            repo.insert_connection(Connection::new("team", platform, "token")).await;
            registry.register(Arc::new(publisher));
        }
        let mut posts = Vec::new();
        for i in 0..4 {
            let post = Post::new("team", format!("post {}", i));
            repo.insert_post(post.clone()).await;
            posts.push(post);
        }
        let handler = JobHandler::new(repo, registry, Duration::from_secs(30));
        (Arc::new(handler), posts)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let publisher = MockPublisher::with_delay(Platform::Twitter, Duration::from_secs(1));
        let (handler, posts) = handler(vec![publisher.clone()]).await;
        let mut pool = WorkerPool::new(handler, 2);

        let start = tokio::time::Instant::now();
        for post in &posts {
            pool.submit(PublishJob::new(&post.id, Platform::Twitter)).await.unwrap();
        }
        let reports = pool.drain().await;

        assert_eq!(reports.len(), 4);
        assert!(reports.iter().all(|r| r.status == JobStatus::Published));
        // Four one-second jobs two at a time
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(publisher.publish_call_count(), 4);
    }

    #[tokio::test]
    async fn test_reports_classify_outcomes() {
        let (handler, posts) = handler(vec![
            MockPublisher::success(Platform::Twitter),
            MockPublisher::failure(Platform::Linkedin, PlatformError::transient_api(Some(503), None, "down")),
            MockPublisher::failure(Platform::Facebook, PlatformError::Validation(vec!["empty".to_string()])),
        ])
        .await;
        let mut pool = WorkerPool::new(handler, 4);

        pool.submit(PublishJob::new(&posts[0].id, Platform::Twitter)).await.unwrap();
        pool.submit(PublishJob::new(&posts[1].id, Platform::Linkedin)).await.unwrap();
        pool.submit(PublishJob::new(&posts[2].id, Platform::Facebook)).await.unwrap();
        pool.submit(PublishJob::new(&posts[3].id, Platform::Youtube)).await.unwrap();

        let mut reports = pool.drain().await;
        reports.sort_by_key(|r| r.job.platform);
        let statuses: Vec<JobStatus> = reports.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                JobStatus::Published,
                JobStatus::Failed,
                JobStatus::Requeue,
                JobStatus::Rejected
            ]
        );
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_submit_after_drain_is_refused() {
        let (handler, posts) = handler(vec![MockPublisher::success(Platform::Twitter)]).await;
        let mut pool = WorkerPool::new(handler, 1);
        pool.drain().await;

        assert!(pool
            .submit(PublishJob::new(&posts[0].id, Platform::Twitter))
            .await
            .is_err());
    }
}
