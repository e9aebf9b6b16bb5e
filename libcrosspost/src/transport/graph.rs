//! Facebook Graph API helpers shared by the Facebook and Instagram code
//!
//! Graph errors arrive as `{"error": {"message", "type", "code", "is_transient"}}`
//! and the numeric `code` matters more than the HTTP status.

use serde::Deserialize;

use crate::error::{PlatformError, Result};
use crate::transport::{error_for_status, extract_error_message, ApiResponse};

pub const GRAPH_BASE_URL: &str = "https://graph.facebook.com";

/// Invalid or expired access token
pub const CODE_OAUTH: i64 = 190;
/// Media is not ready to be published yet
pub const CODE_NOT_READY: i64 = 9007;

const TRANSIENT_CODES: &[i64] = &[1, 2];
const RATE_LIMIT_CODES: &[i64] = &[4, 17, 32, 613];

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    is_transient: bool,
}

/// `https://graph.facebook.com/{version}/{path}`
pub fn graph_url(version: &str, path: &str) -> String {
    format!("{}/{}/{}", GRAPH_BASE_URL, version, path.trim_start_matches('/'))
}

/// Classify a failed Graph API response
pub fn graph_error(service: &str, context: &str, response: &ApiResponse) -> PlatformError {
    let parsed = serde_json::from_slice::<GraphErrorBody>(&response.body).ok();
    let Some(GraphError {
        message,
        code: Some(code),
        is_transient,
    }) = parsed.map(|b| b.error)
    else {
        return error_for_status(service, context, response);
    };

    let message = if message.is_empty() {
        extract_error_message(response)
    } else {
        message
    };
    let detail = format!("{} {} failed (code {}): {}", service, context, code, message);

    match code {
        CODE_OAUTH => PlatformError::Authentication(format!(
            "{}. Suggestion: re-link the account.",
            detail
        )),
        c if RATE_LIMIT_CODES.contains(&c) => PlatformError::rate_limited(detail, response.retry_after()),
        CODE_NOT_READY => PlatformError::InvalidState(detail),
        c if TRANSIENT_CODES.contains(&c) || is_transient => {
            PlatformError::transient_api(Some(response.status), Some(code.to_string()), detail)
        }
        _ if response.status >= 500 => {
            PlatformError::transient_api(Some(response.status), Some(code.to_string()), detail)
        }
        _ => PlatformError::api(Some(response.status), Some(code.to_string()), detail),
    }
}

/// Pass a 2xx response through, classify anything else with [`graph_error`]
pub fn expect_graph_success(service: &str, context: &str, response: ApiResponse) -> Result<ApiResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(graph_error(service, context, &response).into())
    }
}
