//! Core domain models and strongly-typed identifiers.
//!
//! Defines tenants, subscribers, event kinds and event occurrences with
//! newtype ID wrappers for compile-time type safety. Subscribers are owned by
//! the surrounding data layer; the dispatch core only reads them.

use std::{collections::BTreeSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed tenant identifier.
///
/// Provides multi-tenancy isolation. Every subscriber lookup and every
/// dispatch is scoped to exactly one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
    /// Creates a new random tenant ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TenantId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed subscriber identifier.
///
/// Each subscriber is one registered destination endpoint with its own
/// secret and event filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(pub Uuid);

impl SubscriberId {
    /// Creates a new random subscriber ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SubscriberId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Tag identifying the category of an occurrence.
///
/// Kinds are dotted lowercase names such as `application.created` or
/// `comment.added`. They are compared verbatim.
///
/// # Example
///
/// ```
/// use hookline_core::models::EventKind;
///
/// let kind = EventKind::from("application.created");
/// assert_eq!(kind.as_str(), "application.created");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKind(String);

impl EventKind {
    /// Creates an event kind from any string-like tag.
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Returns the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventKind {
    fn from(kind: &str) -> Self {
        Self(kind.to_string())
    }
}

impl From<String> for EventKind {
    fn from(kind: String) -> Self {
        Self(kind)
    }
}

impl AsRef<str> for EventKind {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A registered webhook destination for one tenant.
///
/// The `secret` keys the payload signature. It is never serialized and is
/// redacted from `Debug` output so it cannot leak through logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct Subscriber {
    /// Unique identifier for this subscriber.
    pub id: SubscriberId,

    /// Tenant that owns this subscriber.
    pub tenant_id: TenantId,

    /// Destination URL receiving HTTP POST deliveries.
    pub url: String,

    /// Event kinds this subscriber wants delivered.
    pub subscribed_events: BTreeSet<EventKind>,

    /// Shared signing secret.
    #[serde(skip_serializing, default)]
    pub secret: String,

    /// When this subscriber was registered. Determines dispatch order.
    pub created_at: DateTime<Utc>,

    /// Inactive subscribers are never targeted.
    pub is_active: bool,
}

impl Subscriber {
    /// Returns true when this subscriber should receive `kind`.
    ///
    /// Inactive subscribers and subscribers with an empty event set never
    /// match.
    pub fn wants(&self, kind: &EventKind) -> bool {
        self.is_active && self.subscribed_events.contains(kind)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("url", &self.url)
            .field("subscribed_events", &self.subscribed_events)
            .field("secret", &"[redacted]")
            .field("created_at", &self.created_at)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// An immutable fact raised by a domain action.
///
/// Created once, consumed once by the dispatcher and never persisted by the
/// delivery core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOccurrence {
    /// Tenant the occurrence belongs to.
    pub tenant_id: TenantId,

    /// Category of the occurrence.
    pub kind: EventKind,

    /// Arbitrary JSON payload delivered to subscribers.
    pub payload: serde_json::Value,
}

impl EventOccurrence {
    /// Creates a new occurrence.
    pub fn new(
        tenant_id: TenantId,
        kind: impl Into<EventKind>,
        payload: serde_json::Value,
    ) -> Self {
        Self { tenant_id, kind: kind.into(), payload }
    }
}

/// Lifecycle of one (occurrence, subscriber) delivery sequence.
///
/// ```text
/// Pending -> Attempting(1) -> Succeeded
///                |  ^      -> Failed (non-retryable, exhausted, cancelled)
///                +--+ retryable outcome, attempt + 1
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum DeliveryState {
    /// Sequence created, no attempt made yet.
    Pending,

    /// Attempt `attempt` is in flight or about to be made.
    Attempting {
        /// 1-based attempt number.
        attempt: u32,
    },

    /// Terminal success state.
    Succeeded {
        /// Number of attempts it took.
        attempts: u32,
    },

    /// Terminal failure state.
    Failed {
        /// Number of attempts made before giving up.
        attempts: u32,
    },
}

impl DeliveryState {
    /// Moves to the next attempt.
    ///
    /// Terminal states are absorbing and return themselves unchanged.
    #[must_use]
    pub fn next_attempt(self) -> Self {
        match self {
            Self::Pending => Self::Attempting { attempt: 1 },
            Self::Attempting { attempt } => Self::Attempting { attempt: attempt.saturating_add(1) },
            terminal => terminal,
        }
    }

    /// Finalizes as succeeded.
    #[must_use]
    pub fn succeed(self) -> Self {
        match self {
            Self::Attempting { attempt } => Self::Succeeded { attempts: attempt },
            other => other,
        }
    }

    /// Finalizes as failed, carrying the number of attempts made so far.
    #[must_use]
    pub fn fail(self) -> Self {
        match self {
            Self::Pending => Self::Failed { attempts: 0 },
            Self::Attempting { attempt } => Self::Failed { attempts: attempt },
            terminal => terminal,
        }
    }

    /// Returns the number of attempts started so far.
    pub fn attempts(self) -> u32 {
        match self {
            Self::Pending => 0,
            Self::Attempting { attempt } => attempt,
            Self::Succeeded { attempts } | Self::Failed { attempts } => attempts,
        }
    }

    /// Returns true for `Succeeded` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Attempting { attempt } => write!(f, "attempting({attempt})"),
            Self::Succeeded { attempts } => write!(f, "succeeded({attempts})"),
            Self::Failed { attempts } => write!(f, "failed({attempts})"),
        }
    }
}
