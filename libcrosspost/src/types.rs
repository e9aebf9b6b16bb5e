//! Core types for Crosspost

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CrosspostError, ErrorKind, PlatformError};

/// External platform a post can be published to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(alias = "x")]
    Twitter,
    Facebook,
    Instagram,
    Linkedin,
    Youtube,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Twitter,
        Platform::Facebook,
        Platform::Instagram,
        Platform::Linkedin,
        Platform::Youtube,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Linkedin => "linkedin",
            Platform::Youtube => "youtube",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = CrosspostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "twitter" | "x" => Ok(Platform::Twitter),
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            "linkedin" => Ok(Platform::Linkedin),
            "youtube" => Ok(Platform::Youtube),
            other => Err(CrosspostError::InvalidInput(format!(
                "Unknown platform '{}'. Valid options: twitter, facebook, instagram, linkedin, youtube",
                other
            ))),
        }
    }
}

/// Reference to a media item: an absolute URL or a local file path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaRef(pub String);

impl MediaRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the reference points at a remote URL rather than a local file
    pub fn is_remote(&self) -> bool {
        self.0.starts_with("https://") || self.0.starts_with("http://")
    }

    /// Lowercased file extension of the reference, ignoring any query string
    pub fn extension(&self) -> Option<String> {
        let path = self.0.split(['?', '#']).next().unwrap_or_default();
        let file = path.rsplit('/').next().unwrap_or_default();
        let (_, ext) = file.rsplit_once('.')?;
        if ext.is_empty() {
            None
        } else {
            Some(ext.to_lowercase())
        }
    }
}

impl std::fmt::Display for MediaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Platform-specific hints attached to a post
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostMetadata {
    /// Video title (YouTube) or link title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Visibility hint: "public", "unlisted", "private"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy: Option<String>,
    /// Article link shared alongside the text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A user-authored post, owned by the surrounding application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub team_id: String,
    pub content: String,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default)]
    pub platforms: Vec<Platform>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: PostMetadata,
    /// External post id per platform the post went out on
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub published_to: BTreeMap<Platform, String>,
}

impl Post {
    pub fn new(team_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            team_id: team_id.into(),
            content: content.into(),
            media: Vec::new(),
            platforms: Vec::new(),
            scheduled_at: None,
            metadata: PostMetadata::default(),
            published_to: BTreeMap::new(),
        }
    }

    pub fn with_media(mut self, media: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.media = media.into_iter().map(|m| MediaRef::new(m)).collect();
        self
    }

    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }
}

/// Per-tenant, per-platform credential bundle
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub team_id: String,
    pub platform: Platform,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Platform account identifiers (page_id, ig_user_id, author_urn, ...)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Connection {
    pub fn new(
        team_id: impl Into<String>,
        platform: Platform,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            team_id: team_id.into(),
            platform,
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            metadata: HashMap::new(),
            active: true,
        }
    }

    /// Whether the access token can no longer be used at `now`
    ///
    /// A connection without an expiry never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Look up a required account identifier stored in the connection metadata
    pub fn account_id(&self, key: &str) -> std::result::Result<&str, PlatformError> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                PlatformError::Authentication(format!(
                    "{} connection {} is missing '{}'. Suggestion: re-link the account.",
                    self.platform, self.id, key
                ))
            })
    }

    /// Copy of this connection with refreshed token fields applied
    pub fn with_tokens(&self, update: &TokenUpdate) -> Self {
        let mut next = self.clone();
        next.access_token = update.access_token.clone();
        if let Some(refresh) = &update.refresh_token {
            next.refresh_token = Some(refresh.clone());
        }
        next.expires_at = update.expires_at;
        next
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("team_id", &self.team_id)
            .field("platform", &self.platform)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("metadata", &self.metadata)
            .field("active", &self.active)
            .finish()
    }
}

/// Token fields written back after a successful credential refresh
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUpdate {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for TokenUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenUpdate")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// What the platform returned for a successfully created post
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub external_id: String,
    pub url: Option<String>,
    /// Ids of every tweet in a thread, in creation order
    pub thread_ids: Vec<String>,
    /// Create-post attempts consumed
    pub attempts: u32,
}

impl Delivery {
    pub fn new(external_id: impl Into<String>, url: Option<String>, attempts: u32) -> Self {
        Self {
            external_id: external_id.into(),
            url,
            thread_ids: Vec::new(),
            attempts,
        }
    }
}

/// Structured failure stored in a [`PublishResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl From<&CrosspostError> for PublishFailure {
    fn from(error: &CrosspostError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            retry_after_secs: error.retry_after().map(|d| d.as_secs()),
        }
    }
}

/// Terminal outcome of one publish attempt. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResult {
    pub platform: Platform,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thread_ids: Vec<String>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PublishFailure>,
}

impl PublishResult {
    pub fn succeeded(platform: Platform, delivery: Delivery) -> Self {
        Self {
            platform,
            success: true,
            external_id: Some(delivery.external_id),
            url: delivery.url,
            published_at: Some(Utc::now()),
            thread_ids: delivery.thread_ids,
            attempts: delivery.attempts,
            error: None,
        }
    }

    pub fn failed(platform: Platform, error: &CrosspostError, attempts: u32) -> Self {
        Self {
            platform,
            success: false,
            external_id: None,
            url: None,
            published_at: None,
            thread_ids: Vec::new(),
            attempts,
            error: Some(PublishFailure::from(error)),
        }
    }

    /// Record posts that went out before a failure cut the thread short
    pub fn with_thread_ids(mut self, thread_ids: Vec<String>) -> Self {
        self.thread_ids = thread_ids;
        self
    }

    /// Whether the failure may succeed when the job is requeued
    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.retryable)
    }
}

/// A publish result as handed to the repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub post_id: String,
    pub platform: Platform,
    pub result: PublishResult,
}

// ============================================================================
// Media Types
// ============================================================================

/// Supported media MIME types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaMimeType {
    Jpeg,
    Png,
    Gif,
    WebP,
    Mp4,
    QuickTime,
}

impl MediaMimeType {
    /// Parse MIME type from a MIME string (e.g., "image/jpeg; charset=binary")
    pub fn from_mime_str(s: &str) -> Option<Self> {
        let essence = s.split(';').next().unwrap_or_default().trim().to_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::WebP),
            "video/mp4" => Some(Self::Mp4),
            "video/quicktime" => Some(Self::QuickTime),
            _ => None,
        }
    }

    /// Detect MIME type from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::WebP),
            "mp4" | "m4v" => Some(Self::Mp4),
            "mov" => Some(Self::QuickTime),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
            Self::Mp4 => "video/mp4",
            Self::QuickTime => "video/quicktime",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Mp4 | Self::QuickTime)
    }
}

impl std::fmt::Display for MediaMimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
