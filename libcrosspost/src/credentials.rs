//! OAuth credential renewal
//!
//! [`CredentialCoordinator::ensure_fresh`] is called at the start of every
//! publish. A connection whose `expires_at` is unset or still in the future is
//! returned untouched without any network traffic. An expired one is renewed
//! through the platform's [`TokenRefresher`], the new tokens are written back
//! through the [`ConnectionStore`], and the updated connection is returned.
//!
//! Refresh flows:
//!
//! | Platform | Flow |
//! |---|---|
//! | X/Twitter | `refresh_token` grant with HTTP Basic client auth; refresh tokens rotate |
//! | YouTube | Google `refresh_token` grant; the refresh token is kept |
//! | LinkedIn | `refresh_token` grant |
//! | Facebook, Instagram | long-lived token exchange (`fb_exchange_token`) |
//!
//! A refresh the platform rejects is fatal (`TokenExpired`): the user has to
//! re-link the account. Connection failures and 5xx responses stay retryable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{MetaConfig, OAuthAppConfig, PlatformsConfig};
use crate::error::{PlatformError, RepositoryError, Result};
use crate::repository::ConnectionStore;
use crate::transport::graph::graph_url;
use crate::transport::{extract_error_message, ApiRequest, ApiResponse, HttpTransport};
use crate::types::{Connection, Platform, TokenUpdate};

pub const TWITTER_TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const LINKEDIN_TOKEN_URL: &str = "https://www.linkedin.com/oauth/v2/accessToken";

/// Platform-specific token renewal
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, connection: &Connection) -> Result<TokenUpdate>;
}

/// Client credentials of the OAuth application
struct OAuthClient {
    client_id: String,
    client_secret: Option<SecretString>,
}

impl OAuthClient {
    fn from_config(config: &OAuthAppConfig) -> Option<Self> {
        let client_id = config.client_id.clone().filter(|id| !id.is_empty())?;
        Some(Self {
            client_id,
            client_secret: config
                .client_secret
                .clone()
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
        })
    }

    fn from_meta(config: &MetaConfig) -> Option<Self> {
        let client_id = config.app_id.clone().filter(|id| !id.is_empty())?;
        let secret = config.app_secret.clone().filter(|s| !s.is_empty())?;
        Some(Self {
            client_id,
            client_secret: Some(SecretString::from(secret)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RefreshFlow {
    /// Basic auth, rotating refresh tokens
    Twitter,
    Google,
    Linkedin,
    /// Graph API long-lived token exchange
    FacebookExchange { graph_version: String },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// [`TokenRefresher`] speaking the standard OAuth2 refresh (or Graph exchange) protocol
pub struct OAuthRefresher {
    platform: Platform,
    flow: RefreshFlow,
    client: Option<OAuthClient>,
    transport: Arc<dyn HttpTransport>,
}

impl OAuthRefresher {
    pub fn twitter(transport: Arc<dyn HttpTransport>, config: &OAuthAppConfig) -> Self {
        Self::build(Platform::Twitter, RefreshFlow::Twitter, OAuthClient::from_config(config), transport)
    }

    pub fn youtube(transport: Arc<dyn HttpTransport>, config: &OAuthAppConfig) -> Self {
        Self::build(Platform::Youtube, RefreshFlow::Google, OAuthClient::from_config(config), transport)
    }

    pub fn linkedin(transport: Arc<dyn HttpTransport>, config: &OAuthAppConfig) -> Self {
        Self::build(Platform::Linkedin, RefreshFlow::Linkedin, OAuthClient::from_config(config), transport)
    }

    /// Facebook pages and Instagram accounts share the Meta app
    pub fn meta(platform: Platform, transport: Arc<dyn HttpTransport>, config: &MetaConfig) -> Self {
        Self::build(
            platform,
            RefreshFlow::FacebookExchange {
                graph_version: config.graph_version.clone(),
            },
            OAuthClient::from_meta(config),
            transport,
        )
    }

    pub fn for_platform(platform: Platform, transport: Arc<dyn HttpTransport>, config: &PlatformsConfig) -> Self {
        match platform {
            Platform::Twitter => Self::twitter(transport, &config.twitter.oauth),
            Platform::Youtube => Self::youtube(transport, &config.youtube.oauth),
            Platform::Linkedin => Self::linkedin(transport, &config.linkedin),
            Platform::Facebook | Platform::Instagram => Self::meta(platform, transport, &config.meta),
        }
    }

    fn build(
        platform: Platform,
        flow: RefreshFlow,
        client: Option<OAuthClient>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            platform,
            flow,
            client,
            transport,
        }
    }

    fn expired(&self, reason: impl std::fmt::Display) -> PlatformError {
        PlatformError::TokenExpired(format!(
            "{} access token expired and could not be refreshed: {}. Suggestion: re-link the account.",
            self.platform, reason
        ))
    }

    fn build_request(&self, connection: &Connection) -> std::result::Result<ApiRequest, PlatformError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| self.expired("OAuth client credentials are not configured"))?;
        let secret = client.client_secret.as_ref().map(|s| s.expose_secret().to_string());

        let refresh_token = || {
            connection
                .refresh_token
                .as_deref()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| self.expired("no refresh token stored for the connection"))
        };

        let request = match &self.flow {
            RefreshFlow::FacebookExchange { graph_version } => {
                let secret = secret.ok_or_else(|| self.expired("Meta app secret is not configured"))?;
                ApiRequest::get(graph_url(graph_version, "oauth/access_token"))
                    .query("grant_type", "fb_exchange_token")
                    .query("client_id", client.client_id.as_str())
                    .query("client_secret", secret)
                    .query("fb_exchange_token", connection.access_token.as_str())
            }
            RefreshFlow::Twitter => {
                let request = ApiRequest::post(TWITTER_TOKEN_URL)
                    .form_field("grant_type", "refresh_token")
                    .form_field("refresh_token", refresh_token()?)
                    .form_field("client_id", client.client_id.as_str());
                match secret {
                    Some(secret) => request.basic_auth(&client.client_id, &secret),
                    None => request,
                }
            }
            RefreshFlow::Google | RefreshFlow::Linkedin => {
                let refresh_token = refresh_token()?;
                let secret = secret.ok_or_else(|| self.expired("OAuth client secret is not configured"))?;
                let url = if self.flow == RefreshFlow::Google {
                    GOOGLE_TOKEN_URL
                } else {
                    LINKEDIN_TOKEN_URL
                };
                ApiRequest::post(url)
                    .form_field("grant_type", "refresh_token")
                    .form_field("refresh_token", refresh_token)
                    .form_field("client_id", client.client_id.as_str())
                    .form_field("client_secret", secret)
            }
        };
        Ok(request)
    }

    fn parse(&self, response: ApiResponse, now: DateTime<Utc>) -> Result<TokenUpdate> {
        if !response.is_success() {
            if response.status == 429 || response.status >= 500 {
                return Err(crate::transport::error_for_status(
                    &self.platform.to_string(),
                    "token refresh",
                    &response,
                )
                .into());
            }
            return Err(self.expired(extract_error_message(&response)).into());
        }

        let token: TokenResponse = response
            .json()
            .map_err(|e| self.expired(format!("unreadable token response: {}", e)))?;
        Ok(TokenUpdate {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token.expires_in.map(|secs| now + chrono::Duration::seconds(secs)),
        })
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, connection: &Connection) -> Result<TokenUpdate> {
        let request = self.build_request(connection)?;
        debug!("Refreshing {} token for connection {}", self.platform, connection.id);
        let response = self.transport.execute(request).await?;
        self.parse(response, Utc::now())
    }
}

/// How long a refreshed connection is handed to jobs that loaded the old tokens
const RECENT_REFRESH_SECS: i64 = 600;

/// A connection renewed by this coordinator
struct Refreshed {
    connection: Connection,
    at: DateTime<Utc>,
}

/// Keeps connections usable, refreshing at most once per expiry
pub struct CredentialCoordinator {
    refreshers: HashMap<Platform, Arc<dyn TokenRefresher>>,
    store: Arc<dyn ConnectionStore>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    recent: Mutex<HashMap<String, Refreshed>>,
}

impl CredentialCoordinator {
    pub fn new(store: Arc<dyn ConnectionStore>) -> Self {
        Self {
            refreshers: HashMap::new(),
            store,
            locks: Mutex::new(HashMap::new()),
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Coordinator with OAuth refreshers for every platform
    pub fn from_config(
        transport: Arc<dyn HttpTransport>,
        config: &PlatformsConfig,
        store: Arc<dyn ConnectionStore>,
    ) -> Self {
        Platform::ALL.iter().fold(Self::new(store), |coordinator, platform| {
            coordinator.with_refresher(
                *platform,
                Arc::new(OAuthRefresher::for_platform(*platform, transport.clone(), config)),
            )
        })
    }

    pub fn with_refresher(mut self, platform: Platform, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refreshers.insert(platform, refresher);
        self
    }

    pub async fn ensure_fresh(&self, connection: Connection) -> Result<Connection> {
        self.ensure_fresh_at(connection, Utc::now()).await
    }

    /// [`ensure_fresh`](Self::ensure_fresh) against an explicit clock
    pub async fn ensure_fresh_at(&self, connection: Connection, now: DateTime<Utc>) -> Result<Connection> {
        if !connection.is_expired_at(now) {
            return Ok(connection);
        }

        // Serialize refreshes per connection; rotating refresh tokens are single-use
        let lock = self.lock_for(&connection.id);
        let result = {
            let _guard = lock.lock().await;
            self.refresh_locked(connection, now).await
        };
        drop(lock);

        self.prune(now);
        result
    }

    async fn refresh_locked(&self, connection: Connection, now: DateTime<Utc>) -> Result<Connection> {
        if let Some(cached) = lock_map(&self.recent).get(&connection.id) {
            if !cached.connection.is_expired_at(now) {
                debug!("Using token refreshed by a concurrent job for {}", connection.id);
                return Ok(cached.connection.clone());
            }
        }

        let refresher = self.refreshers.get(&connection.platform).ok_or_else(|| {
            PlatformError::TokenExpired(format!(
                "{} access token expired and no refresh flow is configured",
                connection.platform
            ))
        })?;

        info!("Access token for {} connection {} expired; refreshing", connection.platform, connection.id);
        let update = refresher.refresh(&connection).await?;

        if let Err(e) = self.store.update_connection(&connection.id, &update).await {
            warn!("Failed to persist refreshed tokens for {}: {}", connection.id, e);
            return Err(RepositoryError::Storage(format!(
                "refreshed tokens for connection {} could not be saved: {}",
                connection.id, e
            ))
            .into());
        }

        let refreshed = connection.with_tokens(&update);
        lock_map(&self.recent).insert(
            refreshed.id.clone(),
            Refreshed {
                connection: refreshed.clone(),
                at: now,
            },
        );
        Ok(refreshed)
    }

    /// Forget idle locks and refreshes older than the hand-off window
    fn prune(&self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(RECENT_REFRESH_SECS);
        lock_map(&self.recent)
            .retain(|_, entry| entry.at > cutoff && !entry.connection.is_expired_at(now));
        // The map's own reference is the only one left once no job waits on the lock
        lock_map(&self.locks).retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    fn lock_for(&self, connection_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock_map(&self.locks)
            .entry(connection_id.to_string())
            .or_default()
            .clone()
    }

    #[cfg(test)]
    fn tracked(&self) -> (usize, usize) {
        (lock_map(&self.locks).len(), lock_map(&self.recent).len())
    }
}

fn lock_map<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrosspostError;
    use crate::repository::InMemoryRepository;
    use crate::transport::mock::MockTransport;
    use crate::transport::Method;
    use chrono::Duration;
    use serde_json::json;

    fn oauth_config() -> OAuthAppConfig {
        OAuthAppConfig {
            client_id: Some("client".to_string()),
            client_secret: Some("secret".to_string()),
        }
    }

    fn platforms_config() -> PlatformsConfig {
        let mut config = PlatformsConfig::default();
        config.twitter.oauth = oauth_config();
        config.youtube.oauth = oauth_config();
        config.linkedin = oauth_config();
        config.meta.app_id = Some("app".to_string());
        config.meta.app_secret = Some("app-secret".to_string());
        config
    }

    async fn setup(mock: &MockTransport, connection: &Connection) -> (CredentialCoordinator, Arc<InMemoryRepository>) {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_connection(connection.clone()).await;
        let coordinator =
            CredentialCoordinator::from_config(Arc::new(mock.clone()), &platforms_config(), repo.clone());
        (coordinator, repo)
    }

    fn expired(platform: Platform) -> Connection {
        let mut conn = Connection::new("team-1", platform, "stale");
        conn.refresh_token = Some("refresh-1".to_string());
        conn.expires_at = Some(Utc::now() - Duration::minutes(5));
        conn
    }

    #[tokio::test]
    async fn test_future_expiry_makes_no_request() {
        let mock = MockTransport::new();
        let mut conn = expired(Platform::Twitter);
        conn.expires_at = Some(Utc::now() + Duration::hours(1));
        let (coordinator, _) = setup(&mock, &conn).await;

        let result = coordinator.ensure_fresh(conn.clone()).await.unwrap();
        assert_eq!(result, conn);
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_unset_expiry_makes_no_request() {
        let mock = MockTransport::new();
        let conn = Connection::new("team-1", Platform::Linkedin, "token");
        let (coordinator, _) = setup(&mock, &conn).await;
        coordinator.ensure_fresh(conn).await.unwrap();
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_twitter_refreshes_once_and_persists() {
        let mock = MockTransport::new();
        mock.on(
            Method::Post,
            "oauth2/token",
            ApiResponse::json_response(
                200,
                json!({"access_token": "fresh", "refresh_token": "refresh-2", "expires_in": 7200}),
            ),
        );
        let conn = expired(Platform::Twitter);
        let (coordinator, repo) = setup(&mock, &conn).await;

        let refreshed = coordinator.ensure_fresh(conn.clone()).await.unwrap();
        assert_eq!(refreshed.access_token, "fresh");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-2"));
        assert!(!refreshed.is_expired_at(Utc::now()));
        assert_eq!(mock.requests_to("oauth2/token").len(), 1);

        let request = &mock.requests()[0];
        assert_eq!(request.form_value("grant_type"), Some("refresh_token"));
        assert_eq!(request.form_value("refresh_token"), Some("refresh-1"));
        assert_eq!(request.basic_auth, Some(("client".to_string(), "secret".to_string())));

        let stored = repo.connection(&conn.id).await.unwrap();
        assert_eq!(stored.access_token, "fresh");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_hit_the_platform_once() {
        let mock = MockTransport::new();
        mock.on(
            Method::Post,
            "oauth2/token",
            ApiResponse::json_response(200, json!({"access_token": "fresh", "expires_in": 3600})),
        );
        let conn = expired(Platform::Twitter);
        let (coordinator, _) = setup(&mock, &conn).await;

        let (a, b) = tokio::join!(
            coordinator.ensure_fresh(conn.clone()),
            coordinator.ensure_fresh(conn.clone())
        );
        assert_eq!(a.unwrap().access_token, "fresh");
        assert_eq!(b.unwrap().access_token, "fresh");
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn test_bookkeeping_is_released_after_refreshes() {
        let mock = MockTransport::new();
        mock.on(
            Method::Post,
            "oauth2/token",
            ApiResponse::json_response(200, json!({"access_token": "fresh", "expires_in": 3600})),
        );
        let first = expired(Platform::Twitter);
        let (coordinator, repo) = setup(&mock, &first).await;
        let now = Utc::now();

        let (a, b) = tokio::join!(
            coordinator.ensure_fresh_at(first.clone(), now),
            coordinator.ensure_fresh_at(first.clone(), now)
        );
        assert!(a.is_ok() && b.is_ok());
        // No lock outlives its waiters; the refreshed tokens stay for late jobs
        assert_eq!(coordinator.tracked(), (0, 1));

        // Later refreshes drop hand-offs past their window
        let second = expired(Platform::Twitter);
        repo.insert_connection(second.clone()).await;
        coordinator
            .ensure_fresh_at(second, now + Duration::seconds(RECENT_REFRESH_SECS + 1))
            .await
            .unwrap();
        assert_eq!(coordinator.tracked(), (0, 1));

        // A failed refresh leaves nothing behind either
        let mut third = expired(Platform::Linkedin);
        third.refresh_token = None;
        assert!(coordinator.ensure_fresh_at(third, now).await.is_err());
        assert_eq!(coordinator.tracked().0, 0);
        assert_eq!(mock.requests_to("oauth2/token").len(), 2);
    }

    #[tokio::test]
    async fn test_google_keeps_refresh_token() {
        let mock = MockTransport::new();
        mock.on(
            Method::Post,
            "oauth2.googleapis.com/token",
            ApiResponse::json_response(200, json!({"access_token": "g-fresh", "expires_in": 3599})),
        );
        let conn = expired(Platform::Youtube);
        let (coordinator, _) = setup(&mock, &conn).await;

        let refreshed = coordinator.ensure_fresh(conn).await.unwrap();
        assert_eq!(refreshed.access_token, "g-fresh");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(mock.requests()[0].form_value("client_secret"), Some("secret"));
    }

    #[tokio::test]
    async fn test_facebook_exchanges_current_token() {
        let mock = MockTransport::new();
        mock.on(
            Method::Get,
            "oauth/access_token",
            ApiResponse::json_response(200, json!({"access_token": "long-lived", "expires_in": 5183944})),
        );
        let mut conn = expired(Platform::Instagram);
        conn.refresh_token = None;
        let (coordinator, _) = setup(&mock, &conn).await;

        let refreshed = coordinator.ensure_fresh(conn).await.unwrap();
        assert_eq!(refreshed.access_token, "long-lived");
        let request = &mock.requests()[0];
        assert_eq!(request.query_value("grant_type"), Some("fb_exchange_token"));
        assert_eq!(request.query_value("fb_exchange_token"), Some("stale"));
    }

    #[tokio::test]
    async fn test_missing_refresh_token_is_token_expired_without_request() {
        let mock = MockTransport::new();
        let mut conn = expired(Platform::Linkedin);
        conn.refresh_token = None;
        let (coordinator, _) = setup(&mock, &conn).await;

        let err = coordinator.ensure_fresh(conn).await.unwrap_err();
        assert!(matches!(err, CrosspostError::Platform(PlatformError::TokenExpired(_))));
        assert!(!err.is_retryable());
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_fatal() {
        let mock = MockTransport::new();
        mock.on(
            Method::Post,
            "linkedin.com/oauth",
            ApiResponse::json_response(400, json!({"error": "invalid_grant", "error_description": "revoked"})),
        );
        let conn = expired(Platform::Linkedin);
        let (coordinator, _) = setup(&mock, &conn).await;

        let err = coordinator.ensure_fresh(conn).await.unwrap_err();
        assert!(matches!(err, CrosspostError::Platform(PlatformError::TokenExpired(_))));
        assert!(err.to_string().contains("revoked"));
    }

    #[tokio::test]
    async fn test_persist_failure_is_retryable() {
        let mock = MockTransport::new();
        mock.on(
            Method::Post,
            "oauth2/token",
            ApiResponse::json_response(200, json!({"access_token": "fresh"})),
        );
        let conn = expired(Platform::Twitter);
        // Empty store: the connection cannot be found on write-back
        let coordinator = CredentialCoordinator::from_config(
            Arc::new(mock.clone()),
            &platforms_config(),
            Arc::new(InMemoryRepository::new()),
        );

        let err = coordinator.ensure_fresh(conn).await.unwrap_err();
        assert!(matches!(err, CrosspostError::Repository(RepositoryError::Storage(_))));
        assert!(err.is_retryable());
    }
}
