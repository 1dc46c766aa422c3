//! Subscriber and payload fixtures.
//!
//! Builders default to an active subscriber of a fresh tenant, so a test only
//! spells out what it actually cares about.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use hookline_core::{EventKind, Subscriber, SubscriberId, TenantId};
use serde_json::{json, Value};

/// Event kind used by most scenarios.
pub const APPLICATION_CREATED: &str = "application.created";

/// Second event kind for routing scenarios.
pub const APPLICATION_REJECTED: &str = "application.rejected";

/// Builder for test subscribers.
#[derive(Debug, Clone)]
pub struct SubscriberBuilder {
    id: SubscriberId,
    tenant_id: TenantId,
    url: String,
    events: BTreeSet<EventKind>,
    secret: String,
    created_at: DateTime<Utc>,
    is_active: bool,
}

impl SubscriberBuilder {
    /// Creates a builder for an active subscriber of a new tenant, pointed at
    /// an unroutable URL and subscribed to nothing.
    pub fn new() -> Self {
        let id = SubscriberId::new();
        Self {
            id,
            tenant_id: TenantId::new(),
            url: "http://127.0.0.1:9/unreachable".to_string(),
            events: BTreeSet::new(),
            secret: format!("whsec_{}", id.0.simple()),
            created_at: Utc::now(),
            is_active: true,
        }
    }

    /// Sets the owning tenant.
    pub fn tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    /// Sets the destination URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Adds a subscribed event kind.
    pub fn event(mut self, kind: impl Into<EventKind>) -> Self {
        self.events.insert(kind.into());
        self
    }

    /// Sets the signing secret.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Marks the subscriber inactive.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Sets the creation time.
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Builds the subscriber.
    pub fn build(self) -> Subscriber {
        Subscriber {
            id: self.id,
            tenant_id: self.tenant_id,
            url: self.url,
            subscribed_events: self.events,
            secret: self.secret,
            created_at: self.created_at,
            is_active: self.is_active,
        }
    }
}

impl Default for SubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Common payloads.
pub mod payloads {
    use super::{json, Value};

    /// Minimal application payload, `{"id": <id>}`.
    pub fn application(id: &str) -> Value {
        json!({ "id": id })
    }

    /// Nested payload exercising key ordering at several depths.
    pub fn application_stage_change() -> Value {
        json!({
            "id": "a1",
            "stage": { "to": "interview", "from": "screen" },
            "candidate": { "name": "Ada", "email": "ada@example.com" },
            "tags": ["remote", "senior"],
        })
    }
}
