//! Per-platform publishers
//!
//! Every platform implements [`Publisher`]: one `publish(post, connection)`
//! call that validates and shapes the content, keeps the credentials fresh,
//! waits for rate-limit capacity, uploads media and creates the post. The
//! shared collaborators live in [`PipelineContext`], and a
//! [`PublisherRegistry`] maps each [`Platform`] to its publisher.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use libcrosspost::config::Config;
//! use libcrosspost::platforms::{PipelineContext, PublisherRegistry};
//! use libcrosspost::repository::InMemoryRepository;
//! use libcrosspost::transport::ReqwestTransport;
//! use libcrosspost::types::{Connection, Platform, Post};
//!
//! # async fn example() -> libcrosspost::error::Result<()> {
//! let config = Config::load()?;
//! let transport = Arc::new(ReqwestTransport::new(std::time::Duration::from_secs(30))?);
//! let repo = Arc::new(InMemoryRepository::new());
//! let ctx = PipelineContext::from_config(&config, transport, repo);
//! let registry = PublisherRegistry::from_config(&config, ctx);
//!
//! let publisher = registry.resolve(Platform::Linkedin)?;
//! let post = Post::new("team-1", "Quarterly update");
//! let mut connection = Connection::new("team-1", Platform::Linkedin, "token");
//! connection.metadata.insert("author_urn".into(), "urn:li:person:abc".into());
//!
//! let result = publisher.publish(&post, connection).await;
//! println!("{:?}", result.url);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::Config;
use crate::credentials::CredentialCoordinator;
use crate::error::{CrosspostError, PlatformError, Result};
use crate::formatting::ValidationReport;
use crate::media::MediaLoader;
use crate::rate_limiter::RateLimiter;
use crate::repository::ConnectionStore;
use crate::retry::{with_retry, Attempted, Exhausted, RetryContext, RetryPolicy};
use crate::transport::HttpTransport;
use crate::types::{Connection, Delivery, Platform, Post, PublishResult};
use crate::upload::PollPolicy;

pub mod facebook;
pub mod instagram;
pub mod linkedin;
pub mod twitter;
pub mod youtube;

// Scripted publisher for job and worker tests
pub mod mock;

pub use facebook::FacebookPublisher;
pub use instagram::InstagramPublisher;
pub use linkedin::LinkedinPublisher;
pub use twitter::TwitterPublisher;
pub use youtube::YoutubePublisher;

/// Publishes posts to one platform
///
/// Implementations never return an error from [`publish`](Publisher::publish):
/// every failure is classified into the returned [`PublishResult`], so the
/// caller can persist it and decide whether the job is requeued.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Platform this publisher talks to
    fn platform(&self) -> Platform;

    /// Maximum length of a single post body, in the platform's units
    fn character_limit(&self) -> usize;

    /// Check a post against the platform's rules without any network I/O
    ///
    /// Errors make the post unpublishable; warnings are logged and the post
    /// goes out anyway (for example an X post that becomes a thread).
    fn validate(&self, post: &Post) -> ValidationReport;

    /// Publish `post` using `connection`
    ///
    /// The connection may be refreshed along the way; refreshed tokens are
    /// written back through the [`ConnectionStore`] before any post request.
    async fn publish(&self, post: &Post, connection: Connection) -> PublishResult;
}

/// Collaborators shared by every publisher of a worker process
#[derive(Clone)]
pub struct PipelineContext {
    pub transport: Arc<dyn HttpTransport>,
    pub limiter: RateLimiter,
    pub credentials: Arc<CredentialCoordinator>,
    pub media: MediaLoader,
    pub retry: RetryPolicy,
    pub poll: PollPolicy,
}

impl PipelineContext {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        limiter: RateLimiter,
        credentials: Arc<CredentialCoordinator>,
    ) -> Self {
        Self {
            media: MediaLoader::new(transport.clone()),
            transport,
            limiter,
            credentials,
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
        }
    }

    /// Context with limits, retry and polling taken from `config`
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn ConnectionStore>,
    ) -> Self {
        let credentials = Arc::new(CredentialCoordinator::from_config(
            transport.clone(),
            &config.platforms,
            store,
        ));
        Self::new(transport, RateLimiter::new(config.rate_limit_table()), credentials)
            .with_retry_policy(config.retry.policy())
            .with_poll_policy(config.upload.poll_policy())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Gate a publish: validation first, then credentials, then rate limit
    ///
    /// Validation runs before anything touches the network, so an invalid
    /// post never refreshes a token or spends a rate-limit token.
    pub(crate) async fn admit(
        &self,
        platform: Platform,
        report: ValidationReport,
        connection: Connection,
        cost: u32,
    ) -> Result<Connection> {
        for warning in &report.warnings {
            warn!("{}: {}", platform, warning);
        }
        report.into_result()?;

        let connection = self.credentials.ensure_fresh(connection).await?;
        self.limiter.acquire(platform, cost).await?;
        Ok(connection)
    }

    /// Run a create-post call under the retry policy
    pub(crate) async fn create<T, F, Fut>(
        &self,
        label: &str,
        operation: F,
    ) -> std::result::Result<Attempted<T>, Exhausted<CrosspostError>>
    where
        F: FnMut(RetryContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        with_retry(&self.retry, label, operation).await
    }
}

/// Failure of a publish run along with the create attempts it spent
#[derive(Debug)]
pub(crate) struct StepFailure {
    pub error: CrosspostError,
    pub attempts: u32,
    /// Posts already created on the platform before the failure (X threads)
    pub thread_ids: Vec<String>,
}

impl StepFailure {
    pub fn new(error: CrosspostError, attempts: u32) -> Self {
        Self {
            error,
            attempts,
            thread_ids: Vec::new(),
        }
    }
}

impl From<CrosspostError> for StepFailure {
    fn from(error: CrosspostError) -> Self {
        Self::new(error, 0)
    }
}

impl From<PlatformError> for StepFailure {
    fn from(error: PlatformError) -> Self {
        CrosspostError::from(error).into()
    }
}

impl From<Exhausted<CrosspostError>> for StepFailure {
    fn from(exhausted: Exhausted<CrosspostError>) -> Self {
        Self::new(exhausted.error, exhausted.attempts)
    }
}

pub(crate) type StepResult<T> = std::result::Result<T, StepFailure>;

/// Turn a publish run into the result handed back to the job handler
pub(crate) fn finish(platform: Platform, post: &Post, outcome: StepResult<Delivery>) -> PublishResult {
    match outcome {
        Ok(delivery) => {
            info!(
                "Published post {} to {} as {} ({} attempt(s))",
                post.id, platform, delivery.external_id, delivery.attempts
            );
            PublishResult::succeeded(platform, delivery)
        }
        Err(failure) => {
            warn!(
                "Publishing post {} to {} failed after {} attempt(s): {}",
                post.id, platform, failure.attempts, failure.error
            );
            PublishResult::failed(platform, &failure.error, failure.attempts)
                .with_thread_ids(failure.thread_ids)
        }
    }
}

/// Resolves the publisher for each platform
#[derive(Default, Clone)]
pub struct PublisherRegistry {
    publishers: HashMap<Platform, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a publisher for every supported platform
    pub fn from_config(config: &Config, ctx: PipelineContext) -> Self {
        let platforms = &config.platforms;
        let mut registry = Self::new();
        registry.register(Arc::new(TwitterPublisher::new(
            ctx.clone(),
            platforms.twitter.thread_numbering,
        )));
        registry.register(Arc::new(FacebookPublisher::new(
            ctx.clone(),
            platforms.meta.graph_version.clone(),
        )));
        registry.register(Arc::new(InstagramPublisher::new(
            ctx.clone(),
            platforms.meta.graph_version.clone(),
        )));
        registry.register(Arc::new(LinkedinPublisher::new(ctx.clone())));
        registry.register(Arc::new(YoutubePublisher::new(
            ctx,
            platforms.youtube.default_privacy.clone(),
        )));
        registry
    }

    /// Add or replace the publisher for its platform
    pub fn register(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers.insert(publisher.platform(), publisher);
    }

    pub fn resolve(&self, platform: Platform) -> Result<Arc<dyn Publisher>> {
        self.publishers.get(&platform).cloned().ok_or_else(|| {
            PlatformError::NotSupported(format!("no publisher registered for {}", platform)).into()
        })
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.publishers.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

/// Media rules shared by the publishers that only accept hosted files
pub(crate) fn require_remote(platform: Platform, post: &Post) -> Vec<String> {
    post.media
        .iter()
        .filter(|m| !m.is_remote())
        .map(|m| {
            format!(
                "{} fetches media itself and needs a public URL; got {}",
                platform, m
            )
        })
        .collect()
}
