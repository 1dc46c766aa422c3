//! Delivery results and the observability sink.
//!
//! The dispatcher reports one terminal [`DeliveryResult`] per subscriber per
//! occurrence. Results flow to a [`DeliveryObserver`] as soon as each
//! delivery sequence finishes, not batched at the end of a dispatch.
//!
//! ```text
//!                     DeliveryResult
//! ┌─────────────┐    (per subscriber)    ┌───────────────────┐
//! │ Dispatcher  │ ──────────────────────▶│ MulticastObserver │
//! │ (Producer)  │                        └───────────────────┘
//! └─────────────┘                           │            │
//!                                           ▼            ▼
//!                                ┌────────────────┐ ┌──────────────┐
//!                                │ TracingObserver│ │ audit / UI   │
//!                                └────────────────┘ └──────────────┘
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::{EventKind, SubscriberId};

/// Terminal record for one (occurrence, subscriber) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Subscriber the sequence targeted.
    pub subscriber_id: SubscriberId,

    /// Whether any attempt succeeded.
    pub delivered: bool,

    /// Number of HTTP attempts made. Zero when the sequence never reached the
    /// network (signing failure, cancelled before the first attempt).
    pub attempts: u32,

    /// Reason of the last failure, if the sequence failed.
    pub last_error: Option<String>,

    /// HTTP status of the last attempt, if the endpoint answered.
    pub last_status: Option<u16>,
}

impl DeliveryResult {
    /// Creates a successful result.
    pub fn delivered(subscriber_id: SubscriberId, attempts: u32, status: u16) -> Self {
        Self {
            subscriber_id,
            delivered: true,
            attempts,
            last_error: None,
            last_status: Some(status),
        }
    }

    /// Creates a failed result.
    pub fn failed(
        subscriber_id: SubscriberId,
        attempts: u32,
        error: impl Into<String>,
        last_status: Option<u16>,
    ) -> Self {
        Self {
            subscriber_id,
            delivered: false,
            attempts,
            last_error: Some(error.into()),
            last_status,
        }
    }
}

/// Sink receiving terminal delivery results.
///
/// Implementations must not block for long and must not panic; failures
/// inside the sink are the sink's own business and are never propagated back
/// into the dispatch.
#[async_trait::async_trait]
pub trait DeliveryObserver: Send + Sync + std::fmt::Debug {
    /// Records the terminal result of one delivery sequence.
    async fn record_delivery_result(
        &self,
        event_kind: &EventKind,
        subscriber_id: SubscriberId,
        result: &DeliveryResult,
    );
}

/// Observer that discards all results.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpObserver;

impl NoOpObserver {
    /// Creates a new no-op observer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl DeliveryObserver for NoOpObserver {
    async fn record_delivery_result(
        &self,
        _event_kind: &EventKind,
        _subscriber_id: SubscriberId,
        _result: &DeliveryResult,
    ) {
    }
}

/// Observer that emits one structured log line per result.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

#[async_trait::async_trait]
impl DeliveryObserver for TracingObserver {
    async fn record_delivery_result(
        &self,
        event_kind: &EventKind,
        subscriber_id: SubscriberId,
        result: &DeliveryResult,
    ) {
        if result.delivered {
            info!(
                event_kind = %event_kind,
                subscriber_id = %subscriber_id,
                attempts = result.attempts,
                status = result.last_status,
                "webhook delivered"
            );
        } else {
            warn!(
                event_kind = %event_kind,
                subscriber_id = %subscriber_id,
                attempts = result.attempts,
                status = result.last_status,
                error = result.last_error.as_deref().unwrap_or("unknown"),
                "webhook delivery failed"
            );
        }
    }
}

/// Observer that forwards results to several sinks concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastObserver {
    observers: Vec<Arc<dyn DeliveryObserver>>,
}

impl MulticastObserver {
    /// Creates a multicast observer with no sinks.
    pub fn new() -> Self {
        Self { observers: Vec::new() }
    }

    /// Adds a sink.
    pub fn add_observer(&mut self, observer: Arc<dyn DeliveryObserver>) {
        self.observers.push(observer);
    }

    /// Returns the number of registered sinks.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

#[async_trait::async_trait]
impl DeliveryObserver for MulticastObserver {
    async fn record_delivery_result(
        &self,
        event_kind: &EventKind,
        subscriber_id: SubscriberId,
        result: &DeliveryResult,
    ) {
        let futures = self
            .observers
            .iter()
            .map(|observer| observer.record_delivery_result(event_kind, subscriber_id, result));

        futures::future::join_all(futures).await;
    }
}
