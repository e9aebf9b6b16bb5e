//! Instagram media containers (Graph API)
//!
//! Instagram never receives bytes directly. A container is created from a
//! public media URL, Instagram fetches and processes it, and the container is
//! polled until its `status_code` is `FINISHED`. Only then may it be passed to
//! `media_publish`.
//!
//! Carousels are built from up to 10 child containers, each created with
//! `is_carousel_item=true` and waited to `FINISHED`, followed by one
//! `CAROUSEL` parent listing the children that is itself waited to `FINISHED`.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{poll_until_ready, PollPolicy, ProcessingStatus};
use crate::error::{PlatformError, Result};
use crate::media::guess_mime;
use crate::transport::graph::{expect_graph_success, graph_url};
use crate::transport::{ApiRequest, HttpTransport};
use crate::types::MediaRef;

pub const MAX_CAROUSEL_ITEMS: usize = 10;

const SERVICE: &str = "Instagram";

/// Processing state of a media container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    InProgress,
    Finished,
    Error(String),
    Expired,
    Published,
}

impl ContainerState {
    /// Map a Graph `status_code`; `status` carries the error detail
    pub fn from_status_code(code: &str, status: Option<&str>) -> Self {
        match code {
            "FINISHED" => ContainerState::Finished,
            "PUBLISHED" => ContainerState::Published,
            "EXPIRED" => ContainerState::Expired,
            "ERROR" => ContainerState::Error(status.unwrap_or("ERROR").to_string()),
            _ => ContainerState::InProgress,
        }
    }
}

/// A staging object created on the Instagram side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub state: ContainerState,
}

impl Container {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: ContainerState::InProgress,
        }
    }

    /// Publishing is only legal once processing has finished
    pub fn ensure_publishable(&self) -> Result<()> {
        match &self.state {
            ContainerState::Finished => Ok(()),
            other => Err(PlatformError::InvalidState(format!(
                "container {} cannot be published while {:?}",
                self.id, other
            ))
            .into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Image,
    Video,
}

fn item_kind(media: &MediaRef) -> ItemKind {
    match guess_mime(media) {
        Some(mime) if mime.is_video() => ItemKind::Video,
        Some(_) => ItemKind::Image,
        None => {
            debug!("No extension on {}; assuming image", media);
            ItemKind::Image
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PermalinkResponse {
    #[serde(default)]
    permalink: Option<String>,
}

/// Creates, waits for and publishes Instagram containers
pub struct InstagramUploader {
    transport: Arc<dyn HttpTransport>,
    poll: PollPolicy,
    graph_version: String,
}

impl InstagramUploader {
    pub fn new(transport: Arc<dyn HttpTransport>, poll: PollPolicy, graph_version: impl Into<String>) -> Self {
        Self {
            transport,
            poll,
            graph_version: graph_version.into(),
        }
    }

    /// Build a ready-to-publish container for `media` with `caption`
    ///
    /// One item yields a single container; two or more yield a carousel.
    pub async fn prepare(
        &self,
        ig_user_id: &str,
        media: &[MediaRef],
        caption: &str,
        access_token: &str,
    ) -> Result<Container> {
        validate_media(media)?;

        if let [single] = media {
            let mut container = self
                .create_item(ig_user_id, single, Some(caption), false, access_token)
                .await?;
            self.wait_until_finished(&mut container, access_token).await?;
            return Ok(container);
        }

        let mut children = Vec::with_capacity(media.len());
        for item in media {
            let mut child = self.create_item(ig_user_id, item, None, true, access_token).await?;
            self.wait_until_finished(&mut child, access_token).await?;
            children.push(child.id);
        }

        let request = ApiRequest::post(graph_url(&self.graph_version, &format!("{}/media", ig_user_id)))
            .bearer(access_token)
            .form_field("media_type", "CAROUSEL")
            .form_field("children", children.join(","))
            .form_field("caption", caption);
        let response = self.transport.execute(request).await?;
        let created: IdResponse = expect_graph_success(SERVICE, "create carousel", response)?.json()?;
        debug!("Created carousel container {} with {} children", created.id, children.len());

        let mut parent = Container::new(created.id);
        self.wait_until_finished(&mut parent, access_token).await?;
        Ok(parent)
    }

    async fn create_item(
        &self,
        ig_user_id: &str,
        media: &MediaRef,
        caption: Option<&str>,
        carousel_item: bool,
        access_token: &str,
    ) -> Result<Container> {
        let mut request = ApiRequest::post(graph_url(&self.graph_version, &format!("{}/media", ig_user_id)))
            .bearer(access_token);
        request = match item_kind(media) {
            ItemKind::Image => request.form_field("image_url", media.as_str()),
            ItemKind::Video => request
                .form_field("media_type", if carousel_item { "VIDEO" } else { "REELS" })
                .form_field("video_url", media.as_str()),
        };
        if carousel_item {
            request = request.form_field("is_carousel_item", "true");
        }
        if let Some(caption) = caption {
            request = request.form_field("caption", caption);
        }

        let response = self.transport.execute(request).await?;
        let created: IdResponse = expect_graph_success(SERVICE, "create container", response)?.json()?;
        debug!("Created container {} for {}", created.id, media);
        Ok(Container::new(created.id))
    }

    /// Fetch the container's current state from Instagram
    pub async fn refresh_state(&self, container: &mut Container, access_token: &str) -> Result<()> {
        let request = ApiRequest::get(graph_url(&self.graph_version, &container.id))
            .bearer(access_token)
            .query("fields", "status_code,status");
        let response = self.transport.execute(request).await?;
        let status: StatusResponse = expect_graph_success(SERVICE, "check container", response)?.json()?;
        container.state = ContainerState::from_status_code(
            status.status_code.as_deref().unwrap_or("IN_PROGRESS"),
            status.status.as_deref(),
        );
        Ok(())
    }

    /// Poll until the container is `FINISHED`
    pub async fn wait_until_finished(&self, container: &mut Container, access_token: &str) -> Result<()> {
        let label = format!("Instagram container {}", container.id);
        let id = container.id.clone();
        let latest = Mutex::new(container.state.clone());

        let outcome = poll_until_ready(&self.poll, &label, |_| {
            let id = id.clone();
            let latest = &latest;
            async move {
                let mut probe = Container::new(id);
                self.refresh_state(&mut probe, access_token).await?;
                *lock(latest) = probe.state.clone();
                Ok(match probe.state {
                    ContainerState::Finished | ContainerState::Published => ProcessingStatus::Ready,
                    ContainerState::Error(reason) => ProcessingStatus::Failed(reason),
                    ContainerState::Expired => ProcessingStatus::Failed("container expired".to_string()),
                    ContainerState::InProgress => ProcessingStatus::pending(),
                })
            }
        })
        .await;

        container.state = latest.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        outcome
    }

    /// Publish a finished container and return the media id
    pub async fn publish(&self, ig_user_id: &str, container: &mut Container, access_token: &str) -> Result<String> {
        container.ensure_publishable()?;

        let request = ApiRequest::post(graph_url(&self.graph_version, &format!("{}/media_publish", ig_user_id)))
            .bearer(access_token)
            .form_field("creation_id", container.id.as_str());
        let response = self.transport.execute(request).await?;
        let published: IdResponse = expect_graph_success(SERVICE, "publish", response)?.json()?;
        container.state = ContainerState::Published;
        info!("Published Instagram container {} as media {}", container.id, published.id);
        Ok(published.id)
    }

    /// Public URL of a published media item; lookup failures are not fatal
    pub async fn permalink(&self, media_id: &str, access_token: &str) -> Option<String> {
        let request = ApiRequest::get(graph_url(&self.graph_version, media_id))
            .bearer(access_token)
            .query("fields", "permalink");
        let response = match self.transport.execute(request).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                warn!("Instagram permalink lookup for {} returned HTTP {}", media_id, response.status);
                return None;
            }
            Err(e) => {
                warn!("Instagram permalink lookup for {} failed: {}", media_id, e);
                return None;
            }
        };
        response.json::<PermalinkResponse>().ok().and_then(|p| p.permalink)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Instagram fetches media itself, so every item must be a public URL
pub fn validate_media(media: &[MediaRef]) -> Result<()> {
    let mut errors = Vec::new();
    if media.is_empty() {
        errors.push("Instagram posts require at least one image or video".to_string());
    }
    if media.len() > MAX_CAROUSEL_ITEMS {
        errors.push(format!(
            "Instagram carousels allow at most {} items, got {}",
            MAX_CAROUSEL_ITEMS,
            media.len()
        ));
    }
    for item in media.iter().filter(|m| !m.is_remote()) {
        errors.push(format!("Instagram requires a public media URL, got {}", item));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(PlatformError::Validation(errors).into())
    }
}
