//! Crosspost - publish one post to many social platforms
//!
//! This library holds the publish pipeline behind the `crosspost-worker`
//! binary: per-platform content shaping and validation, media upload flows,
//! shared rate limiting, token refresh and retry, and the job handler that
//! records every outcome.

pub mod config;
pub mod credentials;
pub mod error;
pub mod formatting;
pub mod job;
pub mod logging;
pub mod media;
pub mod platforms;
pub mod rate_limiter;
pub mod repository;
pub mod retry;
pub mod transport;
pub mod types;
pub mod upload;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use credentials::CredentialCoordinator;
pub use error::{CrosspostError, ErrorKind, PlatformError, Result};
pub use job::{JobHandler, JobOutcome, PublishJob};
pub use platforms::{PipelineContext, Publisher, PublisherRegistry};
pub use rate_limiter::RateLimiter;
pub use repository::{InMemoryRepository, PostRepository};
pub use types::{Connection, MediaRef, Platform, Post, PublishResult};
pub use worker::{JobReport, JobStatus, WorkerPool};
