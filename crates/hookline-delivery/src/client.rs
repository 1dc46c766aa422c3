//! HTTP client performing single webhook delivery attempts.
//!
//! One call to [`DeliveryClient::deliver`] is one POST with a bounded
//! timeout. The response is classified into an [`AttemptOutcome`]; what to
//! do next is the retry policy's decision, not the client's.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hookline_core::{EventKind, SubscriberId};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    error::{DeliveryError, ErrorCategory, Result},
    signing::{SignedPayload, EVENT_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER},
};

/// Header carrying the per-sequence delivery id.
pub const DELIVERY_ID_HEADER: &str = "X-Hookline-Delivery-Id";

/// Header carrying the 1-based attempt number.
pub const ATTEMPT_HEADER: &str = "X-Hookline-Delivery-Attempt";

const MAX_LOGGED_BODY: usize = 1024;

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Per-attempt timeout covering connect, send and response.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow. Zero treats any 3xx as a
    /// rejection.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            user_agent: format!("hookline-webhooks/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 0,
            verify_tls: true,
        }
    }
}

/// One attempt to deliver a signed body to one subscriber.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Identifier shared by every attempt of one delivery sequence.
    pub delivery_id: Uuid,
    /// Subscriber being delivered to.
    pub subscriber_id: SubscriberId,
    /// Event kind, sent as a header.
    pub event_kind: EventKind,
    /// Destination URL.
    pub url: String,
    /// Body and signature, identical across attempts.
    pub payload: SignedPayload,
    /// 1-based attempt number.
    pub attempt_number: u32,
}

/// Classified result of one HTTP attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Endpoint answered 2xx.
    Success {
        /// HTTP status code
        status: u16,
    },
    /// Transient failure; the same request may succeed later.
    RetryableFailure {
        /// Short reason, e.g. `"503"` or `"timeout"`
        reason: String,
        /// HTTP status, if the endpoint answered
        status: Option<u16>,
        /// Server-provided `Retry-After` hint
        retry_after: Option<Duration>,
    },
    /// Endpoint rejected the request; retrying cannot help.
    NonRetryableFailure {
        /// Short reason, e.g. `"401"`
        reason: String,
        /// HTTP status, if the endpoint answered
        status: Option<u16>,
    },
}

impl AttemptOutcome {
    /// Builds the failure outcome matching an error's retry classification.
    pub fn from_error(error: &DeliveryError, retry_after: Option<Duration>) -> Self {
        if error.is_retryable() {
            Self::RetryableFailure {
                reason: error.reason(),
                status: error.status_code(),
                retry_after: retry_after
                    .or_else(|| error.retry_after_seconds().map(Duration::from_secs)),
            }
        } else {
            Self::NonRetryableFailure { reason: error.reason(), status: error.status_code() }
        }
    }

    /// Returns `true` for [`AttemptOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// HTTP status of the attempt, if the endpoint answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Success { status } => Some(*status),
            Self::RetryableFailure { status, .. } | Self::NonRetryableFailure { status, .. } => {
                *status
            },
        }
    }

    /// Failure reason, `None` on success.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::RetryableFailure { reason, .. } | Self::NonRetryableFailure { reason, .. } => {
                Some(reason)
            },
        }
    }
}

/// Record of one attempt inside a delivery sequence.
///
/// Lives only as long as the retry loop; the last one becomes the sequence's
/// delivery result.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    /// 1-based attempt number.
    pub attempt_number: u32,
    /// Wall-clock start of the attempt.
    pub started_at: DateTime<Utc>,
    /// Classified outcome.
    pub outcome: AttemptOutcome,
    /// Time spent waiting for the outcome.
    pub duration: Duration,
}

impl DeliveryAttempt {
    /// HTTP status of the attempt, if the endpoint answered.
    pub fn http_status(&self) -> Option<u16> {
        self.outcome.status()
    }
}

/// HTTP client for webhook delivery.
///
/// Wraps a pooled `reqwest::Client`; cloning is cheap and shares the pool.
/// Holds no other state, so concurrent deliveries never interfere.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built from the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.timeout.is_zero() {
            return Err(DeliveryError::configuration("timeout must be greater than zero"));
        }

        let redirect = match config.max_redirects {
            0 => reqwest::redirect::Policy::none(),
            n => reqwest::redirect::Policy::limited(n as usize),
        };

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(redirect)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Performs one delivery attempt.
    ///
    /// Never fails: transport errors and non-2xx statuses are classified
    /// into the returned outcome.
    pub async fn deliver(&self, request: &DeliveryRequest) -> AttemptOutcome {
        let span = info_span!(
            "webhook_attempt",
            delivery_id = %request.delivery_id,
            subscriber_id = %request.subscriber_id,
            event_kind = %request.event_kind,
            attempt = request.attempt_number,
        );

        async move {
            let start = std::time::Instant::now();

            let sent = self
                .client
                .post(&request.url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(SIGNATURE_HEADER, &request.payload.signature)
                .header(TIMESTAMP_HEADER, request.payload.timestamp.to_string())
                .header(EVENT_HEADER, request.event_kind.as_str())
                .header(DELIVERY_ID_HEADER, request.delivery_id.to_string())
                .header(ATTEMPT_HEADER, request.attempt_number.to_string())
                .body(request.payload.body.clone())
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    let error = if e.is_timeout() {
                        DeliveryError::timeout(
                            u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
                        )
                    } else if e.is_connect() {
                        DeliveryError::network(format!("connection failed: {e}"))
                    } else {
                        DeliveryError::network(e.to_string())
                    };

                    warn!(
                        duration_ms = start.elapsed().as_millis() as u64,
                        category = %ErrorCategory::from(&error),
                        error = %error,
                        "webhook request failed"
                    );
                    return AttemptOutcome::from_error(&error, None);
                },
            };

            let status = response.status().as_u16();
            let retry_after = extract_retry_after(response.headers(), Utc::now());
            let body = read_body_for_log(response).await;

            debug!(
                status,
                duration_ms = start.elapsed().as_millis() as u64,
                body = %body,
                "received response"
            );

            if (200..300).contains(&status) {
                return AttemptOutcome::Success { status };
            }

            let error = DeliveryError::from_status(status, retry_after.map(|d| d.as_secs()));
            warn!(status, category = %ErrorCategory::from(&error), "webhook rejected");

            let hint = if matches!(status, 429 | 503) { retry_after } else { None };
            AttemptOutcome::from_error(&error, hint)
        }
        .instrument(span)
        .await
    }
}

/// Reads at most [`MAX_LOGGED_BODY`] bytes of the response body, then drops
/// the response without draining the rest.
async fn read_body_for_log(mut response: reqwest::Response) -> String {
    let mut collected = Vec::with_capacity(MAX_LOGGED_BODY);
    let mut truncated = false;

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let room = MAX_LOGGED_BODY - collected.len();
                if chunk.len() > room {
                    collected.extend_from_slice(&chunk[..room]);
                    truncated = true;
                    break;
                }
                collected.extend_from_slice(&chunk);
            },
            Ok(None) => break,
            Err(e) => return format!("[failed to read response body: {e}]"),
        }
    }

    let text = String::from_utf8_lossy(&collected);
    if truncated {
        format!("{text}... (truncated)")
    } else {
        text.into_owned()
    }
}

/// Reads a `Retry-After` header as a delay relative to `now`.
///
/// Accepts delta-seconds and HTTP-dates. A date in the past yields a zero
/// delay; anything unparseable yields `None`.
pub fn extract_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    parse_retry_after(value, now)
}

/// Parses a `Retry-After` value. See [`extract_retry_after`].
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some(date.signed_duration_since(now).to_std().unwrap_or(Duration::ZERO))
}
