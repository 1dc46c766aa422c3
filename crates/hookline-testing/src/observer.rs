//! Observers that record delivery results for assertions.
//!
//! [`RecordingObserver`] keeps every result in arrival order, which is what
//! isolation tests need: a fast subscriber's result must show up before a
//! slow one finishes. Waiting uses deterministic timeouts to prevent CI
//! hangs.

use std::{sync::Arc, time::Duration};

use hookline_core::{DeliveryObserver, DeliveryResult, EventKind, SubscriberId};
use tokio::sync::{Mutex, Notify};

/// Default timeout for waiting on results.
pub const DEFAULT_RESULT_TIMEOUT: Duration = Duration::from_secs(10);

/// One observed result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedResult {
    /// Event kind the result belongs to.
    pub event_kind: EventKind,
    /// Subscriber the result belongs to.
    pub subscriber_id: SubscriberId,
    /// The terminal result.
    pub result: DeliveryResult,
}

/// Observer recording every result it receives.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    results: Arc<Mutex<Vec<RecordedResult>>>,
    notify: Arc<Notify>,
    delay: Option<Duration>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recorder that sleeps `delay` before recording, simulating a
    /// slow sink.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    /// All results in arrival order.
    pub async fn results(&self) -> Vec<RecordedResult> {
        self.results.lock().await.clone()
    }

    /// Subscriber ids in arrival order.
    pub async fn arrival_order(&self) -> Vec<SubscriberId> {
        self.results.lock().await.iter().map(|r| r.subscriber_id).collect()
    }

    /// The result recorded for `subscriber_id`, if any.
    pub async fn result_for(&self, subscriber_id: SubscriberId) -> Option<DeliveryResult> {
        self.results
            .lock()
            .await
            .iter()
            .find(|r| r.subscriber_id == subscriber_id)
            .map(|r| r.result.clone())
    }

    /// Number of recorded results.
    pub async fn count(&self) -> usize {
        self.results.lock().await.len()
    }

    /// Waits until at least `count` results are recorded.
    ///
    /// # Panics
    ///
    /// Panics if that takes longer than [`DEFAULT_RESULT_TIMEOUT`].
    pub async fn wait_for(&self, count: usize) {
        self.wait_for_with_timeout(count, DEFAULT_RESULT_TIMEOUT).await;
    }

    /// Waits until at least `count` results are recorded or `timeout` passes.
    ///
    /// # Panics
    ///
    /// Panics on timeout, reporting how many results did arrive.
    pub async fn wait_for_with_timeout(&self, count: usize, timeout: Duration) {
        let waited = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.count().await >= count {
                    return;
                }
                notified.await;
            }
        })
        .await;

        if waited.is_err() {
            panic!(
                "observer did not receive {count} results within {timeout:?}, got {}",
                self.count().await
            );
        }
    }
}

#[async_trait::async_trait]
impl DeliveryObserver for RecordingObserver {
    async fn record_delivery_result(
        &self,
        event_kind: &EventKind,
        subscriber_id: SubscriberId,
        result: &DeliveryResult,
    ) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.results.lock().await.push(RecordedResult {
            event_kind: event_kind.clone(),
            subscriber_id,
            result: result.clone(),
        });
        self.notify.notify_waiters();
    }
}
