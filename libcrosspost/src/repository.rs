//! Persistence seams for posts, connections and publications
//!
//! The pipeline never talks to a database directly. It reads posts and
//! connections through [`PostRepository`], writes refreshed tokens through
//! [`ConnectionStore`] and hands finished results back with
//! `record_publication`. [`InMemoryRepository`] implements both and can be
//! loaded from and saved to a JSON snapshot.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{RepositoryError, Result};
use crate::types::{Connection, Platform, Post, Publication, PublishResult, TokenUpdate};

#[async_trait]
pub trait PostRepository: Send + Sync {
    async fn get_post(&self, post_id: &str) -> Result<Post>;

    /// The active connection a team has for `platform`
    async fn get_active_connection(&self, team_id: &str, platform: Platform) -> Result<Connection>;

    /// Store the outcome; a success also marks the post as published to `platform`
    async fn record_publication(
        &self,
        post_id: &str,
        platform: Platform,
        result: &PublishResult,
    ) -> Result<()>;
}

/// Write-back target for refreshed OAuth tokens
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn update_connection(&self, connection_id: &str, update: &TokenUpdate) -> Result<()>;
}

/// Everything the in-memory repository holds, as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub posts: Vec<Post>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub publications: Vec<Publication>,
}

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: RwLock<Snapshot>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    /// Load a snapshot file; a missing file yields an empty repository
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let snapshot: Snapshot =
                    serde_json::from_slice(&bytes).map_err(RepositoryError::Serialization)?;
                debug!(
                    "Loaded {} posts and {} connections from {}",
                    snapshot.posts.len(),
                    snapshot.connections.len(),
                    path.display()
                );
                Ok(Self::from_snapshot(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(RepositoryError::Io(e).into()),
        }
    }

    /// Write the snapshot through a temporary file so a crash never leaves half a file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let bytes = {
            let state = self.state.read().await;
            serde_json::to_vec_pretty(&*state).map_err(RepositoryError::Serialization)?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(RepositoryError::Io)?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(RepositoryError::Io)?;
        tokio::fs::rename(&tmp, path).await.map_err(RepositoryError::Io)?;
        Ok(())
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.clone()
    }

    pub async fn insert_post(&self, post: Post) {
        let mut state = self.state.write().await;
        state.posts.retain(|p| p.id != post.id);
        state.posts.push(post);
    }

    pub async fn insert_connection(&self, connection: Connection) {
        let mut state = self.state.write().await;
        state.connections.retain(|c| c.id != connection.id);
        state.connections.push(connection);
    }

    pub async fn connection(&self, connection_id: &str) -> Option<Connection> {
        self.state
            .read()
            .await
            .connections
            .iter()
            .find(|c| c.id == connection_id)
            .cloned()
    }

    pub async fn publications(&self) -> Vec<Publication> {
        self.state.read().await.publications.clone()
    }
}

#[async_trait]
impl PostRepository for InMemoryRepository {
    async fn get_post(&self, post_id: &str) -> Result<Post> {
        self.state
            .read()
            .await
            .posts
            .iter()
            .find(|p| p.id == post_id)
            .cloned()
            .ok_or_else(|| {
                RepositoryError::NotFound {
                    entity: "post",
                    id: post_id.to_string(),
                }
                .into()
            })
    }

    async fn get_active_connection(&self, team_id: &str, platform: Platform) -> Result<Connection> {
        self.state
            .read()
            .await
            .connections
            .iter()
            .find(|c| c.team_id == team_id && c.platform == platform && c.active)
            .cloned()
            .ok_or_else(|| {
                RepositoryError::NoActiveConnection {
                    team_id: team_id.to_string(),
                    platform: platform.to_string(),
                }
                .into()
            })
    }

    async fn record_publication(
        &self,
        post_id: &str,
        platform: Platform,
        result: &PublishResult,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if let (true, Some(external_id)) = (result.success, result.external_id.as_ref()) {
            match state.posts.iter_mut().find(|p| p.id == post_id) {
                Some(post) => {
                    post.published_to.insert(platform, external_id.clone());
                }
                None => warn!("Recording {} publication for unknown post {}", platform, post_id),
            }
        }
        state.publications.push(Publication {
            post_id: post_id.to_string(),
            platform,
            result: result.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for InMemoryRepository {
    async fn update_connection(&self, connection_id: &str, update: &TokenUpdate) -> Result<()> {
        let mut state = self.state.write().await;
        let connection = state
            .connections
            .iter_mut()
            .find(|c| c.id == connection_id)
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "connection",
                id: connection_id.to_string(),
            })?;
        *connection = connection.with_tokens(update);
        Ok(())
    }
}
