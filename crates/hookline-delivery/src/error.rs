//! Error types for webhook dispatch and delivery.
//!
//! [`DeliveryError`] describes why a single attempt or delivery sequence did
//! not succeed and carries the retry classification. [`DispatchError`] is the
//! only error `dispatch` itself returns: a systemic failure that prevents any
//! subscriber from being resolved.

use std::fmt;

use hookline_core::CoreError;
use thiserror::Error;

use crate::signing::SigningError;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failure of one delivery attempt or delivery sequence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Network-level connectivity failure (DNS, refused, reset).
    #[error("network error: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// Per-attempt timeout exceeded.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// Endpoint rejected the request shape (4xx other than 408/429).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code
        status_code: u16,
    },

    /// Endpoint failed transiently (5xx or 408).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code
        status_code: u16,
    },

    /// Endpoint asked us to slow down (429).
    #[error("rate limited: HTTP 429")]
    RateLimited {
        /// Seconds to wait before retrying, from `Retry-After`
        retry_after_seconds: Option<u64>,
    },

    /// Endpoint answered with a redirect, which is never followed.
    #[error("unexpected redirect: HTTP {status_code}")]
    Redirected {
        /// HTTP status code (3xx)
        status_code: u16,
    },

    /// Payload could not be canonicalized or signed.
    #[error("signing failed: {message}")]
    Signing {
        /// Signing error message
        message: String,
    },

    /// Invalid subscriber or client configuration.
    #[error("invalid configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Dispatch was cancelled before delivery finished.
    #[error("cancelled")]
    Cancelled,

    /// Unexpected internal error.
    #[error("internal error: {message}")]
    InternalError {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Classifies a non-success HTTP status into an error.
    ///
    /// 408 and 5xx are server errors, 429 is a rate limit, 3xx is a
    /// redirect and everything else is a client error.
    pub fn from_status(status_code: u16, retry_after_seconds: Option<u64>) -> Self {
        match status_code {
            429 => Self::RateLimited { retry_after_seconds },
            408 | 500..=599 => Self::ServerError { status_code },
            300..=399 => Self::Redirected { status_code },
            _ => Self::ClientError { status_code },
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Returns `true` for failures worth retrying with the same payload.
    ///
    /// Network errors, timeouts, 408, 429 and 5xx are retryable. Client
    /// errors, redirects, signing and configuration failures, cancellation
    /// and internal errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::RateLimited { .. } => true,

            Self::ClientError { .. }
            | Self::Redirected { .. }
            | Self::Signing { .. }
            | Self::ConfigurationError { .. }
            | Self::Cancelled
            | Self::InternalError { .. } => false,
        }
    }

    /// Returns the HTTP status behind this error, if the endpoint answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientError { status_code }
            | Self::ServerError { status_code }
            | Self::Redirected { status_code } => Some(*status_code),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Returns the suggested retry delay from `Retry-After`, if any.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds } => *retry_after_seconds,
            _ => None,
        }
    }

    /// Short reason reported in delivery results.
    ///
    /// HTTP failures report the bare status code (`"401"`), timeouts report
    /// `"timeout"` and cancellation reports `"cancelled"`.
    pub fn reason(&self) -> String {
        match self {
            Self::Timeout { .. } => "timeout".to_string(),
            Self::Cancelled => "cancelled".to_string(),
            other => other.status_code().map_or_else(|| other.to_string(), |s| s.to_string()),
        }
    }
}

impl From<SigningError> for DeliveryError {
    fn from(error: SigningError) -> Self {
        Self::Signing { message: error.to_string() }
    }
}

/// Systemic dispatch failure.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Subscription registry could not be queried; no subscribers resolved.
    #[error("subscription registry unavailable: {0}")]
    RegistryUnavailable(#[source] CoreError),

    /// Dispatcher could not be constructed.
    #[error("invalid dispatcher configuration: {0}")]
    Configuration(String),
}

impl From<CoreError> for DispatchError {
    fn from(error: CoreError) -> Self {
        Self::RegistryUnavailable(error)
    }
}

/// Category of delivery error for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Network,
    /// Endpoint rejected the request (4xx, 3xx).
    Client,
    /// Endpoint failed (5xx, 408).
    Server,
    /// Rate limiting.
    RateLimit,
    /// Signing and configuration problems.
    Configuration,
    /// Cancellation and internal errors.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::ClientError { .. } | DeliveryError::Redirected { .. } => Self::Client,
            DeliveryError::ServerError { .. } => Self::Server,
            DeliveryError::RateLimited { .. } => Self::RateLimit,
            DeliveryError::Signing { .. } | DeliveryError::ConfigurationError { .. } => {
                Self::Configuration
            },
            DeliveryError::Cancelled | DeliveryError::InternalError { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
