//! HTTP transport seam for platform REST and OAuth calls
//!
//! Publishers, uploaders and token refreshers build an [`ApiRequest`] and hand
//! it to an [`HttpTransport`]. The transport only reports connection-level
//! failures; any HTTP status comes back as an [`ApiResponse`] and is
//! classified by the caller, because the meaning of a status (or of an error
//! body) differs per platform.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{PlatformError, Result};

pub mod graph;
pub mod mock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Bytes { data: Vec<u8>, content_type: String },
}

/// Outbound request description
#[derive(Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub bearer: Option<String>,
    pub basic_auth: Option<(String, String)>,
    pub body: Body,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            bearer: None,
            basic_auth: None,
            body: Body::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::Put, url)
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }

    pub fn basic_auth(mut self, user: &str, password: &str) -> Self {
        self.basic_auth = Some((user.to_string(), password.to_string()));
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    /// Append a form field, switching the body to a form if needed
    pub fn form_field(mut self, key: &str, value: impl Into<String>) -> Self {
        match &mut self.body {
            Body::Form(fields) => fields.push((key.to_string(), value.into())),
            _ => self.body = Body::Form(vec![(key.to_string(), value.into())]),
        }
        self
    }

    pub fn bytes(mut self, data: Vec<u8>, content_type: &str) -> Self {
        self.body = Body::Bytes {
            data,
            content_type: content_type.to_string(),
        };
        self
    }

    pub fn form_value(&self, key: &str) -> Option<&str> {
        match &self.body {
            Body::Form(fields) => fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn json_body(&self) -> Option<&serde_json::Value> {
        match &self.body {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }
}

// Bodies carry base64 media and tokens; keep them out of logs.
impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = match &self.body {
            Body::Empty => "empty".to_string(),
            Body::Json(_) => "json".to_string(),
            Body::Form(fields) => format!("form({} fields)", fields.len()),
            Body::Bytes { data, content_type } => format!("{} bytes of {}", data.len(), content_type),
        };
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("query", &self.query)
            .field("body", &body)
            .finish()
    }
}

/// Response as seen by platform code
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn json_response(status: u16, value: serde_json::Value) -> Self {
        Self::new(status)
            .with_header("content-type", "application/json")
            .with_body(value.to_string().into_bytes())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body, treating malformed JSON as a non-retryable API error
    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, PlatformError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            PlatformError::api(
                Some(self.status),
                None,
                format!("Unexpected response body ({}): {}", e, truncate_for_log(&self.text())),
            )
        })
    }

    pub fn json_value(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Server-provided wait from `Retry-After` (seconds) or `x-rate-limit-reset` (epoch seconds)
    pub fn retry_after(&self) -> Option<Duration> {
        if let Some(secs) = self.header("retry-after").and_then(|v| v.trim().parse::<u64>().ok()) {
            return Some(Duration::from_secs(secs));
        }
        let reset = self
            .header("x-rate-limit-reset")
            .and_then(|v| v.trim().parse::<i64>().ok())?;
        let now = chrono::Utc::now().timestamp();
        Some(Duration::from_secs(reset.saturating_sub(now).max(0) as u64))
    }
}

/// Executes [`ApiRequest`]s
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send the request. Only connection-level failures are errors.
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// Production transport backed by `reqwest`
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("crosspost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        debug!("{} {}", request.method, request.url);

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some((user, password)) = &request.basic_auth {
            builder = builder.basic_auth(user, Some(password));
        }
        builder = match request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(&value),
            Body::Form(fields) => builder.form(&fields),
            Body::Bytes { data, content_type } => {
                builder.header(reqwest::header::CONTENT_TYPE, content_type).body(data)
            }
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> crate::error::CrosspostError {
    let context = if error.is_timeout() {
        "request timed out"
    } else if error.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    PlatformError::Network(format!("{}: {}", context, error)).into()
}

/// Best-effort human message from a JSON error body
pub fn extract_error_message(response: &ApiResponse) -> String {
    let Some(value) = response.json_value() else {
        let text = response.text();
        return if text.trim().is_empty() {
            format!("HTTP {}", response.status)
        } else {
            truncate_for_log(&text)
        };
    };

    let candidates = [
        value.pointer("/error/message"),
        value.pointer("/errors/0/message"),
        value.pointer("/detail"),
        value.pointer("/error_description"),
        value.pointer("/message"),
        value.pointer("/title"),
        value.pointer("/error"),
    ];
    let message = candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}", response.status));
    message
}

/// Classify a non-success response by HTTP status
///
/// - 429 → `RateLimit` (with `Retry-After` / `x-rate-limit-reset`)
/// - 401 → `Authentication`
/// - 5xx → transient `Api`
/// - other → non-transient `Api`
pub fn error_for_status(service: &str, context: &str, response: &ApiResponse) -> PlatformError {
    let message = extract_error_message(response);
    match response.status {
        429 => PlatformError::rate_limited(
            format!("{} rate limit exceeded ({}): {}", service, context, message),
            response.retry_after(),
        ),
        401 => PlatformError::Authentication(format!(
            "{} rejected the access token ({}): {}. Suggestion: re-link the account.",
            service, context, message
        )),
        500..=599 => PlatformError::transient_api(
            Some(response.status),
            None,
            format!("{} server error ({}): {}", service, context, message),
        ),
        status => PlatformError::api(
            Some(status),
            None,
            format!("{} request failed ({}): HTTP {}: {}", service, context, status, message),
        ),
    }
}

/// Pass a 2xx response through, classify anything else with [`error_for_status`]
pub fn expect_success(service: &str, context: &str, response: ApiResponse) -> Result<ApiResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(error_for_status(service, context, &response).into())
    }
}

pub(crate) fn truncate_for_log(text: &str) -> String {
    const MAX: usize = 300;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX).collect();
        format!("{}...", head)
    }
}
