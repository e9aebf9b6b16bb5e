//! Scripted transport for testing
//!
//! Routes are matched by method, a URL fragment and optionally one form or
//! query parameter. Each route replays its queued replies in order and keeps
//! repeating the last one, so a status endpoint that "always returns
//! processing" needs a single reply. Every request is recorded for
//! verification. Available in all builds so integration tests and the worker's
//! tests can use it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{PlatformError, Result};
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Method};

#[derive(Debug, Clone)]
enum MockReply {
    Response(ApiResponse),
    Error(PlatformError),
}

#[derive(Debug)]
struct MockRoute {
    method: Method,
    url_fragment: String,
    param: Option<(String, String)>,
    replies: VecDeque<MockReply>,
}

impl MockRoute {
    fn matches(&self, request: &ApiRequest) -> bool {
        if self.method != request.method || !request.url.contains(&self.url_fragment) {
            return false;
        }
        match &self.param {
            None => true,
            Some((key, value)) => {
                request.form_value(key) == Some(value.as_str())
                    || request.query_value(key) == Some(value.as_str())
            }
        }
    }

    fn next_reply(&mut self) -> Option<MockReply> {
        if self.replies.len() > 1 {
            self.replies.pop_front()
        } else {
            self.replies.front().cloned()
        }
    }
}

/// Scripted [`HttpTransport`]
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    routes: Arc<Mutex<Vec<MockRoute>>>,
    requests: Arc<Mutex<Vec<ApiRequest>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for requests matching `method` and `url_fragment`
    pub fn on(&self, method: Method, url_fragment: &str, response: ApiResponse) -> &Self {
        self.push(method, url_fragment, None, MockReply::Response(response));
        self
    }

    /// Queue a response for requests that also carry `key=value` as a form or query parameter
    pub fn on_param(
        &self,
        method: Method,
        url_fragment: &str,
        param: (&str, &str),
        response: ApiResponse,
    ) -> &Self {
        let param = Some((param.0.to_string(), param.1.to_string()));
        self.push(method, url_fragment, param, MockReply::Response(response));
        self
    }

    /// Queue a connection-level failure
    pub fn fail(&self, method: Method, url_fragment: &str, error: PlatformError) -> &Self {
        self.push(method, url_fragment, None, MockReply::Error(error));
        self
    }

    /// All requests executed so far, in order
    pub fn requests(&self) -> Vec<ApiRequest> {
        lock(&self.requests).clone()
    }

    /// Requests whose URL contains `url_fragment`
    pub fn requests_to(&self, url_fragment: &str) -> Vec<ApiRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.url.contains(url_fragment))
            .cloned()
            .collect()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    fn push(
        &self,
        method: Method,
        url_fragment: &str,
        param: Option<(String, String)>,
        reply: MockReply,
    ) {
        let mut routes = lock(&self.routes);
        let existing = routes
            .iter_mut()
            .find(|r| r.method == method && r.url_fragment == url_fragment && r.param == param);
        match existing {
            Some(route) => route.replies.push_back(reply),
            None => routes.push(MockRoute {
                method,
                url_fragment: url_fragment.to_string(),
                param,
                replies: VecDeque::from([reply]),
            }),
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        lock(&self.requests).push(request.clone());

        let reply = {
            let mut routes = lock(&self.routes);
            // Parameter-specific routes win over generic ones on the same URL
            let index = routes
                .iter()
                .position(|r| r.param.is_some() && r.matches(&request))
                .or_else(|| routes.iter().position(|r| r.matches(&request)));
            index.and_then(|i| routes[i].next_reply())
        };

        match reply {
            Some(MockReply::Response(response)) => Ok(response),
            Some(MockReply::Error(error)) => Err(error.into()),
            None => Ok(ApiResponse::json_response(
                404,
                serde_json::json!({
                    "error": format!("no mock route for {} {}", request.method, request.url)
                }),
            )),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replies_in_order_then_repeat_last() {
        let mock = MockTransport::new();
        mock.on(Method::Get, "/status", ApiResponse::json_response(200, json!({"n": 1})))
            .on(Method::Get, "/status", ApiResponse::json_response(200, json!({"n": 2})));

        let mut seen = Vec::new();
        for _ in 0..3 {
            let response = mock.execute(ApiRequest::get("https://api/status")).await.unwrap();
            seen.push(response.json_value().unwrap()["n"].as_i64().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 2]);
        assert_eq!(mock.request_count(), 3);
    }

    #[tokio::test]
    async fn test_param_routes_take_precedence() {
        let mock = MockTransport::new();
        mock.on(Method::Post, "upload", ApiResponse::new(204));
        mock.on_param(Method::Post, "upload", ("command", "INIT"), ApiResponse::new(202));

        let init = ApiRequest::post("https://upload").form_field("command", "INIT");
        let append = ApiRequest::post("https://upload").form_field("command", "APPEND");
        assert_eq!(mock.execute(init).await.unwrap().status, 202);
        assert_eq!(mock.execute(append).await.unwrap().status, 204);
    }

    #[tokio::test]
    async fn test_unmatched_request_gets_404() {
        let mock = MockTransport::new();
        let response = mock.execute(ApiRequest::get("https://nowhere")).await.unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_fail_returns_error() {
        let mock = MockTransport::new();
        mock.fail(Method::Post, "tweets", PlatformError::Network("reset".to_string()));
        let result = mock.execute(ApiRequest::post("https://api/2/tweets")).await;
        assert!(result.is_err());
        assert_eq!(mock.requests_to("tweets").len(), 1);
    }
}
