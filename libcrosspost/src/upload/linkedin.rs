//! LinkedIn asset upload
//!
//! `registerUpload` returns an upload URL and an asset URN; the raw bytes are
//! `PUT` to that URL and the asset is polled until its recipe is `AVAILABLE`.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{poll_until_ready, PollPolicy, ProcessingStatus, UploadSession};
use crate::error::{PlatformError, Result};
use crate::media::MediaBlob;
use crate::transport::{expect_success, ApiRequest, HttpTransport};

pub const API_BASE_URL: &str = "https://api.linkedin.com/v2";

const SERVICE: &str = "LinkedIn";
const UPLOAD_MECHANISM: &str = "com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest";

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    value: RegisterValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterValue {
    asset: String,
    upload_mechanism: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    #[serde(default)]
    recipes: Vec<AssetRecipe>,
}

#[derive(Debug, Deserialize)]
struct AssetRecipe {
    #[serde(default)]
    status: String,
}

/// Uploaded asset ready to be referenced from a share
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedinAsset {
    pub urn: String,
    pub is_video: bool,
}

pub struct LinkedinUploader {
    transport: Arc<dyn HttpTransport>,
    poll: PollPolicy,
}

impl LinkedinUploader {
    pub fn new(transport: Arc<dyn HttpTransport>, poll: PollPolicy) -> Self {
        Self { transport, poll }
    }

    pub async fn upload(&self, blob: &MediaBlob, owner_urn: &str, access_token: &str) -> Result<LinkedinAsset> {
        let recipe = if blob.is_video() {
            "urn:li:digitalmediaRecipe:feedshare-video"
        } else {
            "urn:li:digitalmediaRecipe:feedshare-image"
        };
        let register = ApiRequest::post(format!("{}/assets", API_BASE_URL))
            .bearer(access_token)
            .query("action", "registerUpload")
            .json(json!({
                "registerUploadRequest": {
                    "recipes": [recipe],
                    "owner": owner_urn,
                    "serviceRelationships": [{
                        "relationshipType": "OWNER",
                        "identifier": "urn:li:userGeneratedContent"
                    }]
                }
            }));
        let response = self.transport.execute(register).await?;
        let registered: RegisterResponse = expect_success(SERVICE, "register upload", response)?.json()?;
        let asset_urn = registered.value.asset;
        let upload_url = registered
            .value
            .upload_mechanism
            .pointer(&format!("/{}/uploadUrl", UPLOAD_MECHANISM.replace('/', "~1")))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| PlatformError::api(None, None, "LinkedIn registerUpload returned no upload URL"))?;

        let mut session = UploadSession::new(blob.len());
        session.begin_transfer(asset_urn.clone())?;
        let put = ApiRequest::put(upload_url)
            .bearer(access_token)
            .bytes(blob.bytes.clone(), blob.mime.as_str());
        let response = self.transport.execute(put).await?;
        if let Err(e) = expect_success(SERVICE, "upload asset", response) {
            session.fail();
            return Err(e);
        }
        session.record_chunk(blob.len())?;
        session.finalize()?;
        debug!("Uploaded {} bytes for {}", blob.len(), asset_urn);

        session.start_processing()?;
        let asset_id = asset_urn.rsplit(':').next().unwrap_or(asset_urn.as_str()).to_string();
        let label = format!("LinkedIn asset {}", asset_urn);
        if let Err(e) = poll_until_ready(&self.poll, &label, |_| self.asset_status(&asset_id, access_token)).await {
            session.fail();
            return Err(e);
        }
        let urn = session.complete()?;

        info!("Uploaded {} to LinkedIn as {}", blob.source, urn);
        Ok(LinkedinAsset {
            urn,
            is_video: blob.is_video(),
        })
    }

    async fn asset_status(&self, asset_id: &str, access_token: &str) -> Result<ProcessingStatus> {
        let request = ApiRequest::get(format!("{}/assets/{}", API_BASE_URL, asset_id)).bearer(access_token);
        let response = self.transport.execute(request).await?;
        let asset: AssetResponse = expect_success(SERVICE, "check asset", response)?.json()?;

        let status = asset.recipes.first().map(|r| r.status.as_str()).unwrap_or("PROCESSING");
        Ok(match status {
            "AVAILABLE" => ProcessingStatus::Ready,
            "PROCESSING_FAILED" | "CLIENT_ERROR" => ProcessingStatus::Failed(status.to_string()),
            _ => ProcessingStatus::pending(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrosspostError;
    use crate::transport::mock::MockTransport;
    use crate::transport::{ApiResponse, Method};
    use crate::types::{MediaMimeType, MediaRef};
    use std::time::Duration;

    fn register_response() -> ApiResponse {
        ApiResponse::json_response(
            200,
            json!({
                "value": {
                    "asset": "urn:li:digitalmediaAsset:C4E22",
                    "uploadMechanism": {
                        UPLOAD_MECHANISM: { "uploadUrl": "https://upload.linkedin.example/put/1" }
                    }
                }
            }),
        )
    }

    fn uploader(mock: &MockTransport) -> LinkedinUploader {
        LinkedinUploader::new(
            Arc::new(mock.clone()),
            PollPolicy {
                interval: Duration::from_secs(1),
                max_attempts: 4,
            },
        )
    }

    fn image() -> MediaBlob {
        MediaBlob::new(MediaRef::new("a.jpg"), vec![9, 9, 9], MediaMimeType::Jpeg)
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_put_poll() {
        let mock = MockTransport::new();
        mock.on(Method::Post, "/v2/assets", register_response());
        mock.on(Method::Put, "put/1", ApiResponse::new(201));
        mock.on(
            Method::Get,
            "assets/C4E22",
            ApiResponse::json_response(200, json!({"recipes": [{"status": "PROCESSING"}]})),
        )
        .on(
            Method::Get,
            "assets/C4E22",
            ApiResponse::json_response(200, json!({"recipes": [{"status": "AVAILABLE"}]})),
        );

        let asset = uploader(&mock)
            .upload(&image(), "urn:li:person:abc", "token")
            .await
            .unwrap();
        assert_eq!(asset.urn, "urn:li:digitalmediaAsset:C4E22");
        assert!(!asset.is_video);

        let register = &mock.requests_to("/v2/assets")[0];
        assert_eq!(register.query_value("action"), Some("registerUpload"));
        assert_eq!(
            register.json_body().unwrap()["registerUploadRequest"]["owner"],
            "urn:li:person:abc"
        );
        assert_eq!(mock.requests_to("assets/C4E22").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_never_available_times_out() {
        let mock = MockTransport::new();
        mock.on(Method::Post, "/v2/assets", register_response());
        mock.on(Method::Put, "put/1", ApiResponse::new(201));
        mock.on(
            Method::Get,
            "assets/C4E22",
            ApiResponse::json_response(200, json!({"recipes": [{"status": "PROCESSING"}]})),
        );

        let err = uploader(&mock)
            .upload(&image(), "urn:li:person:abc", "token")
            .await
            .unwrap_err();
        assert!(matches!(err, CrosspostError::Platform(PlatformError::MediaTimeout(_))));
        assert_eq!(mock.requests_to("assets/C4E22").len(), 4);
    }
}
