//! Configuration management for Crosspost
//!
//! Configuration is a TOML file resolved from `CROSSPOST_CONFIG` or the XDG
//! config directory. Every section is optional; missing sections fall back to
//! the defaults below.
//!
//! ```toml
//! [worker]
//! concurrency = 4
//! job_deadline_secs = 600
//!
//! [retry]
//! max_attempts = 3
//! initial_delay_ms = 1000
//!
//! [rate_limits.twitter]
//! capacity = 50
//! window_secs = 900
//!
//! [platforms.twitter]
//! client_id = "..."
//! client_secret = "..."
//! thread_numbering = true
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::logging::LogFormat;
use crate::retry::RetryPolicy;
use crate::types::Platform;
use crate::upload::PollPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    /// Overrides for the built-in per-platform bucket table
    #[serde(default)]
    pub rate_limits: HashMap<Platform, RateLimitConfig>,
    #[serde(default)]
    pub platforms: PlatformsConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of publish jobs in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Deadline for a single publish job
    #[serde(default = "default_job_deadline_secs")]
    pub job_deadline_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            job_deadline_secs: default_job_deadline_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.job_deadline_secs)
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_job_deadline_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on a single backoff delay; unbounded when unset
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: self.max_delay_ms.map(Duration::from_millis),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Delay between processing-status checks when the platform gives no hint
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

impl UploadConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.max_poll_attempts,
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_poll_attempts() -> u32 {
    60
}

/// Token bucket dimensions for one platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Built-in bucket table, in platform call (or quota) units
pub fn default_rate_limits() -> HashMap<Platform, RateLimitConfig> {
    HashMap::from([
        (
            Platform::Twitter,
            RateLimitConfig {
                capacity: 50,
                window_secs: 15 * 60,
            },
        ),
        (
            Platform::Facebook,
            RateLimitConfig {
                capacity: 200,
                window_secs: 60 * 60,
            },
        ),
        (
            Platform::Instagram,
            RateLimitConfig {
                capacity: 25,
                window_secs: 24 * 60 * 60,
            },
        ),
        (
            Platform::Linkedin,
            RateLimitConfig {
                capacity: 100,
                window_secs: 24 * 60 * 60,
            },
        ),
        (
            // YouTube Data API daily quota units
            Platform::Youtube,
            RateLimitConfig {
                capacity: 10_000,
                window_secs: 24 * 60 * 60,
            },
        ),
    ])
}

/// OAuth application credentials for a platform
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthAppConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitterConfig {
    #[serde(flatten)]
    pub oauth: OAuthAppConfig,
    /// Prefix thread pieces with "i/n"
    #[serde(default = "default_true")]
    pub thread_numbering: bool,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            oauth: OAuthAppConfig::default(),
            thread_numbering: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Meta app shared by Facebook pages and Instagram business accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_secret: Option<String>,
    #[serde(default = "default_graph_version")]
    pub graph_version: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            app_secret: None,
            graph_version: default_graph_version(),
        }
    }
}

fn default_graph_version() -> String {
    "v19.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoutubeConfig {
    #[serde(flatten)]
    pub oauth: OAuthAppConfig,
    /// Privacy status used when the post carries none
    #[serde(default = "default_privacy")]
    pub default_privacy: String,
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            oauth: OAuthAppConfig::default(),
            default_privacy: default_privacy(),
        }
    }
}

fn default_privacy() -> String {
    "public".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformsConfig {
    #[serde(default)]
    pub twitter: TwitterConfig,
    #[serde(default)]
    pub meta: MetaConfig,
    #[serde(default)]
    pub linkedin: OAuthAppConfig,
    #[serde(default)]
    pub youtube: YoutubeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
        }
    }
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Bucket table with configured overrides applied over the built-in defaults
    pub fn rate_limit_table(&self) -> HashMap<Platform, RateLimitConfig> {
        let mut table = default_rate_limits();
        table.extend(self.rate_limits.iter().map(|(k, v)| (*k, *v)));
        table
    }

    /// Reject values that would stall or disable the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            return Err(invalid("worker.concurrency", "must be at least 1"));
        }
        if self.worker.job_deadline_secs == 0 {
            return Err(invalid("worker.job_deadline_secs", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.upload.max_poll_attempts == 0 {
            return Err(invalid("upload.max_poll_attempts", "must be at least 1"));
        }
        for (platform, limit) in &self.rate_limits {
            if limit.capacity == 0 {
                return Err(invalid(
                    &format!("rate_limits.{}.capacity", platform),
                    "must be at least 1",
                ));
            }
            if limit.window_secs == 0 {
                return Err(invalid(
                    &format!("rate_limits.{}.window_secs", platform),
                    "must be at least 1",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::CrosspostError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path (`CROSSPOST_CONFIG`, then the XDG config directory)
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosspost").join("config.toml"))
}
