//! Error types for Crosspost
//!
//! Every failure in the publish pipeline is classified into a [`PlatformError`]
//! variant. The variant alone decides whether the failed operation may be
//! attempted again, so the retry orchestrator and the job handler never need to
//! know which platform produced it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Platform, PublishFailure};

pub type Result<T> = std::result::Result<T, CrosspostError>;

#[derive(Error, Debug)]
pub enum CrosspostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A recorded publish failure surfaced to the job system
    #[error("Publishing to {platform} failed: {}", .failure.message)]
    Publish {
        platform: Platform,
        failure: PublishFailure,
    },
}

impl CrosspostError {
    /// Process exit code: 2 for configuration errors, 1 for everything else
    pub fn exit_code(&self) -> i32 {
        match self {
            CrosspostError::Config(_) => 2,
            _ => 1,
        }
    }

    /// Failure category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrosspostError::Config(_) => ErrorKind::Configuration,
            CrosspostError::Platform(e) => e.kind(),
            CrosspostError::Repository(_) => ErrorKind::Repository,
            CrosspostError::InvalidInput(_) => ErrorKind::InvalidInput,
            CrosspostError::Publish { failure, .. } => failure.kind,
        }
    }

    /// Whether the same operation may succeed if attempted again
    pub fn is_retryable(&self) -> bool {
        match self {
            CrosspostError::Platform(e) => e.is_retryable(),
            CrosspostError::Repository(e) => e.is_retryable(),
            CrosspostError::Publish { failure, .. } => failure.retryable,
            CrosspostError::Config(_) | CrosspostError::InvalidInput(_) => false,
        }
    }

    /// Server-provided delay before the next attempt, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CrosspostError::Platform(e) => e.retry_after(),
            CrosspostError::Publish { failure, .. } => failure.retry_after_secs.map(Duration::from_secs),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("No active {platform} connection for team {team_id}")]
    NoActiveConnection { team_id: String, platform: String },

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepositoryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::Storage(_) | RepositoryError::Io(_))
    }
}

/// Classified failure of a platform interaction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Token expired: {0}")]
    TokenExpired(String),

    #[error("Content validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Media upload failed: {0}")]
    MediaUpload(String),

    #[error("Media processing timed out: {0}")]
    MediaTimeout(String),

    #[error("Platform API error: {message}")]
    Api {
        status: Option<u16>,
        code: Option<String>,
        message: String,
        transient: bool,
    },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl PlatformError {
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        PlatformError::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    /// Non-transient API error with an HTTP status and optional platform error code
    pub fn api(status: Option<u16>, code: Option<String>, message: impl Into<String>) -> Self {
        PlatformError::Api {
            status,
            code,
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient_api(
        status: Option<u16>,
        code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        PlatformError::Api {
            status,
            code,
            message: message.into(),
            transient: true,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PlatformError::RateLimit { .. } => ErrorKind::RateLimitExceeded,
            PlatformError::Network(_) => ErrorKind::Network,
            PlatformError::Authentication(_) => ErrorKind::AuthenticationFailed,
            PlatformError::TokenExpired(_) => ErrorKind::TokenExpired,
            PlatformError::Validation(_) => ErrorKind::ValidationFailed,
            PlatformError::MediaUpload(_) => ErrorKind::MediaUploadFailed,
            PlatformError::MediaTimeout(_) => ErrorKind::MediaTimeout,
            PlatformError::Api { .. } => ErrorKind::PlatformApi,
            PlatformError::Timeout(_) => ErrorKind::Timeout,
            PlatformError::InvalidState(_) => ErrorKind::InvalidState,
            PlatformError::NotSupported(_) => ErrorKind::NotSupported,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PlatformError::RateLimit { .. }
            | PlatformError::Network(_)
            | PlatformError::MediaUpload(_)
            | PlatformError::MediaTimeout(_)
            | PlatformError::Timeout(_) => true,
            PlatformError::Api { transient, .. } => *transient,
            PlatformError::Authentication(_)
            | PlatformError::TokenExpired(_)
            | PlatformError::Validation(_)
            | PlatformError::InvalidState(_)
            | PlatformError::NotSupported(_) => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Serializable failure category reported in a `PublishResult`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimitExceeded,
    Network,
    AuthenticationFailed,
    TokenExpired,
    ValidationFailed,
    MediaUploadFailed,
    MediaTimeout,
    PlatformApi,
    Timeout,
    InvalidState,
    NotSupported,
    Configuration,
    Repository,
    InvalidInput,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::Network => "network",
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::TokenExpired => "token_expired",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::MediaUploadFailed => "media_upload_failed",
            ErrorKind::MediaTimeout => "media_timeout",
            ErrorKind::PlatformApi => "platform_api",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::NotSupported => "not_supported",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Repository => "repository",
            ErrorKind::InvalidInput => "invalid_input",
        };
        f.write_str(name)
    }
}
