//! HTTP mocking utilities for webhook delivery tests.
//!
//! Wraps a wiremock server with scripted endpoints: each path answers with a
//! sequence of [`MockResponse`]s, one per request, repeating the last one
//! once the script runs out. That models "500, 500, then 200" or "always
//! hang" without any timing games.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use bytes::Bytes;
use http::HeaderMap;
use serde_json::Value;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer as WiremockServer, Request, Respond, ResponseTemplate,
};

/// HTTP mock server standing in for subscriber endpoints.
pub struct MockServer {
    server: WiremockServer,
}

impl MockServer {
    /// Starts a new mock server on a random port.
    pub async fn start() -> Self {
        Self { server: WiremockServer::start().await }
    }

    /// Returns the base URL of the mock server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Returns the full URL for `path`.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{path}", self.server.uri())
    }

    /// Mounts a scripted endpoint and returns its URL.
    pub async fn mock_endpoint(&self, endpoint: MockEndpoint) -> String {
        let url = self.endpoint_url(&endpoint.path);

        Mock::given(method("POST"))
            .and(path(endpoint.path.as_str()))
            .respond_with(SequenceResponder::new(endpoint.responses))
            .mount(&self.server)
            .await;

        url
    }

    /// Mounts `path` answering each request with the next response in
    /// `responses`. Returns the endpoint URL.
    pub async fn mock_sequence(&self, path: &str, responses: Vec<MockResponse>) -> String {
        self.mock_endpoint(MockEndpoint { path: path.to_string(), responses }).await
    }

    /// Returns every request received so far, in arrival order.
    pub async fn received_requests(&self) -> Vec<RecordedRequest> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(RecordedRequest::from)
            .collect()
    }

    /// Returns requests received on `path`.
    pub async fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.received_requests().await.into_iter().filter(|r| r.path == path).collect()
    }

    /// Number of requests received on `path`.
    pub async fn request_count(&self, path: &str) -> usize {
        self.requests_to(path).await.len()
    }

    /// Asserts that exactly `expected` requests reached `path`.
    pub async fn assert_request_count(&self, path: &str, expected: usize) {
        let actual = self.request_count(path).await;
        assert_eq!(actual, expected, "expected {expected} requests to {path}, received {actual}");
    }
}

/// A path and the responses it gives, in order.
#[derive(Debug, Clone)]
pub struct MockEndpoint {
    /// Request path, e.g. `/hooks/s1`.
    pub path: String,
    /// Responses for request 1, 2, ...; the last repeats.
    pub responses: Vec<MockResponse>,
}

impl MockEndpoint {
    /// Endpoint that always answers 200.
    pub fn success(path: impl Into<String>) -> Self {
        Self { path: path.into(), responses: vec![MockResponse::ok()] }
    }

    /// Endpoint that always answers `status`.
    pub fn failure(path: impl Into<String>, status: u16) -> Self {
        Self { path: path.into(), responses: vec![MockResponse::status(status)] }
    }

    /// Endpoint that never answers within `delay`.
    pub fn hanging(path: impl Into<String>, delay: Duration) -> Self {
        Self { path: path.into(), responses: vec![MockResponse::hang(delay)] }
    }

    /// Appends a response to the script.
    pub fn then(mut self, response: MockResponse) -> Self {
        self.responses.push(response);
        self
    }
}

/// One scripted answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Answer with `status` and an optional `Retry-After` in seconds.
    Status {
        /// HTTP status code
        status: u16,
        /// `Retry-After` header value in seconds
        retry_after: Option<u64>,
    },
    /// Answer with `status` and a raw body.
    Body {
        /// HTTP status code
        status: u16,
        /// Response body
        body: Vec<u8>,
    },
    /// Answer 200, but only after `delay`.
    Hang {
        /// How long to withhold the response
        delay: Duration,
    },
}

impl MockResponse {
    /// 200 OK.
    pub fn ok() -> Self {
        Self::status(200)
    }

    /// Any status without extra headers.
    pub fn status(status: u16) -> Self {
        Self::Status { status, retry_after: None }
    }

    /// 429 with `Retry-After: seconds`.
    pub fn rate_limited(seconds: u64) -> Self {
        Self::Status { status: 429, retry_after: Some(seconds) }
    }

    /// Answers `status` with `body`.
    pub fn with_body(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::Body { status, body: body.into() }
    }

    /// Withholds the response for `delay`, long enough to trip a client
    /// timeout.
    pub fn hang(delay: Duration) -> Self {
        Self::Hang { delay }
    }

    fn template(&self) -> ResponseTemplate {
        match self {
            Self::Status { status, retry_after } => {
                let template = ResponseTemplate::new(*status);
                match retry_after {
                    Some(seconds) => template.insert_header("Retry-After", seconds.to_string()),
                    None => template,
                }
            },
            Self::Body { status, body } => {
                ResponseTemplate::new(*status).set_body_bytes(body.clone())
            },
            Self::Hang { delay } => ResponseTemplate::new(200).set_delay(*delay),
        }
    }
}

struct SequenceResponder {
    responses: Vec<MockResponse>,
    served: AtomicUsize,
}

impl SequenceResponder {
    fn new(responses: Vec<MockResponse>) -> Self {
        Self { responses, served: AtomicUsize::new(0) }
    }

    fn next_response(&self) -> Option<&MockResponse> {
        let index = self.served.fetch_add(1, Ordering::SeqCst);
        self.responses.get(index).or_else(|| self.responses.last())
    }
}

impl Respond for SequenceResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.next_response().map_or_else(|| ResponseTemplate::new(200), MockResponse::template)
    }
}

/// A request received by the mock server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Raw body.
    pub body: Bytes,
}

impl RecordedRequest {
    /// Returns a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parses the body as JSON.
    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.body)
    }
}

impl From<Request> for RecordedRequest {
    fn from(request: Request) -> Self {
        Self {
            method: request.method.to_string(),
            path: request.url.path().to_string(),
            headers: request.headers,
            body: Bytes::from(request.body),
        }
    }
}
