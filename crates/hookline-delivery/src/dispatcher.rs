//! Fan-out of one event occurrence to every subscribed endpoint.
//!
//! A dispatch resolves its targets once, then runs one independent delivery
//! sequence per subscriber on a [`JoinSet`]. Sequences share nothing mutable:
//! each signs its own body, drives the client through the retry policy, and
//! reports its terminal result to the observer the moment it finishes.
//!
//! ```text
//!              list_subscribers
//! dispatch ──────────────────────▶ SubscriptionRegistry
//!    │
//!    ├── task(S1): sign ─▶ attempt ─▶ policy ─▶ sleep ─▶ attempt ─▶ ... ─▶ observer
//!    ├── task(S2): sign ─▶ attempt ─▶ policy ─▶ observer
//!    └── task(Sn): ...
//!    │
//!    ▼
//! Vec<DeliveryResult> in registry order
//! ```
//!
//! Cancellation is cooperative. A sequence checks for it before every
//! attempt and races it against every backoff sleep; an attempt already on
//! the wire runs to completion or to its timeout.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use hookline_core::{
    Clock, DeliveryObserver, DeliveryResult, DeliveryState, EventKind, EventOccurrence, RealClock,
    Subscriber, TenantId,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    client::{ClientConfig, DeliveryAttempt, DeliveryClient, DeliveryRequest},
    error::{DeliveryError, DispatchError},
    registry::SubscriptionRegistry,
    retry::{RetryDecision, RetryPolicy, StopReason},
    signing::{SignedPayload, Signer, SigningError},
};

/// Configuration for a [`Dispatcher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// HTTP client settings.
    pub client: ClientConfig,
    /// Retry policy applied to every sequence.
    pub retry_policy: RetryPolicy,
    /// Upper bound on one observer call.
    pub observer_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            observer_timeout: Duration::from_secs(5),
        }
    }
}

/// Delivers event occurrences to subscribers with at-least-once semantics.
pub struct Dispatcher {
    registry: Arc<dyn SubscriptionRegistry>,
    client: DeliveryClient,
    policy: RetryPolicy,
    signer: Signer,
    observer: Arc<dyn DeliveryObserver>,
    clock: Arc<dyn Clock>,
    observer_timeout: Duration,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("policy", &self.policy)
            .field("observer", &self.observer)
            .field("observer_timeout", &self.observer_timeout)
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Everything one delivery sequence needs, shared read-only by all tasks of
/// a dispatch.
struct SequenceContext {
    tenant_id: TenantId,
    kind: EventKind,
    payload: Result<serde_json::Value, DeliveryError>,
    client: DeliveryClient,
    policy: RetryPolicy,
    signer: Signer,
    observer: Arc<dyn DeliveryObserver>,
    clock: Arc<dyn Clock>,
    observer_timeout: Duration,
    shutdown: CancellationToken,
    caller: CancellationToken,
}

impl SequenceContext {
    fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled() || self.caller.is_cancelled()
    }

    async fn cancelled(&self) {
        tokio::select! {
            () = self.shutdown.cancelled() => {}
            () = self.caller.cancelled() => {}
        }
    }
}

impl Dispatcher {
    /// Creates a dispatcher using the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Configuration`] if the HTTP client cannot be
    /// built or the retry policy is unusable (see [`RetryPolicy::validate`]).
    pub fn new(
        registry: Arc<dyn SubscriptionRegistry>,
        observer: Arc<dyn DeliveryObserver>,
        config: DispatchConfig,
    ) -> Result<Self, DispatchError> {
        Self::with_clock(registry, observer, config, Arc::new(RealClock::new()))
    }

    /// Creates a dispatcher with an injected clock for timestamps and
    /// backoff sleeps.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::new`].
    pub fn with_clock(
        registry: Arc<dyn SubscriptionRegistry>,
        observer: Arc<dyn DeliveryObserver>,
        config: DispatchConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DispatchError> {
        config
            .retry_policy
            .validate()
            .map_err(|e| DispatchError::Configuration(e.to_string()))?;

        let client = DeliveryClient::new(config.client)
            .map_err(|e| DispatchError::Configuration(e.to_string()))?;

        Ok(Self {
            registry,
            client,
            policy: config.retry_policy,
            signer: Signer::new(),
            observer,
            clock,
            observer_timeout: config.observer_timeout,
            shutdown: CancellationToken::new(),
        })
    }

    /// Dispatches one occurrence to every matching subscriber.
    ///
    /// Returns one result per targeted subscriber, in registry order, once
    /// every sequence has finished. Per-subscriber failures are reported in
    /// the results, never as an error.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::RegistryUnavailable`] if subscribers cannot
    /// be listed. Nothing is delivered in that case.
    pub async fn dispatch<P>(
        &self,
        tenant_id: TenantId,
        kind: impl Into<EventKind>,
        payload: &P,
    ) -> Result<Vec<DeliveryResult>, DispatchError>
    where
        P: Serialize + ?Sized,
    {
        self.dispatch_with_cancellation(tenant_id, kind, payload, &CancellationToken::new()).await
    }

    /// Dispatches an already-assembled [`EventOccurrence`], consuming it.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::dispatch`].
    pub async fn dispatch_occurrence(
        &self,
        occurrence: EventOccurrence,
    ) -> Result<Vec<DeliveryResult>, DispatchError> {
        self.dispatch(occurrence.tenant_id, occurrence.kind, &occurrence.payload).await
    }

    /// Dispatches one occurrence, abandoning retries once `cancellation` or
    /// the dispatcher's own shutdown fires.
    ///
    /// Sequences observing cancellation finalize as `Failed("cancelled")`.
    /// Results already reported to the observer are not revisited.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::dispatch`].
    pub async fn dispatch_with_cancellation<P>(
        &self,
        tenant_id: TenantId,
        kind: impl Into<EventKind>,
        payload: &P,
        cancellation: &CancellationToken,
    ) -> Result<Vec<DeliveryResult>, DispatchError>
    where
        P: Serialize + ?Sized,
    {
        let kind = kind.into();
        let span = info_span!("dispatch", tenant_id = %tenant_id, event_kind = %kind);

        async move {
            let subscribers =
                self.registry.list_subscribers(tenant_id, &kind).await.map_err(|e| {
                    error!(error = %e, "subscription registry unavailable");
                    DispatchError::RegistryUnavailable(e)
                })?;

            let targets: Vec<Subscriber> = subscribers
                .into_iter()
                .filter(|s| s.tenant_id == tenant_id && s.wants(&kind))
                .collect();

            if targets.is_empty() {
                debug!("no subscribers for event");
                return Ok(Vec::new());
            }

            info!(targets = targets.len(), "dispatching event");

            // Sequences sign a JSON value, so a payload that is not JSON
            // representable fails every sequence before any network call.
            let payload: Result<serde_json::Value, DeliveryError> = serde_json::to_value(payload)
                .map_err(|e| SigningError::Serialization(e.to_string()).into());

            let context = Arc::new(SequenceContext {
                tenant_id,
                kind,
                payload,
                client: self.client.clone(),
                policy: self.policy.clone(),
                signer: self.signer,
                observer: self.observer.clone(),
                clock: self.clock.clone(),
                observer_timeout: self.observer_timeout,
                shutdown: self.shutdown.clone(),
                caller: cancellation.clone(),
            });

            Ok(run_all(context, targets).await)
        }
        .instrument(span)
        .await
    }

    /// Signals every running and future dispatch to stop retrying.
    ///
    /// Idempotent. Dispatches started afterwards still consult the registry
    /// but finalize every target as cancelled without touching the network.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("dispatcher shutting down");
        }
        self.shutdown.cancel();
    }

    /// Returns `true` once [`Dispatcher::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

async fn run_all(context: Arc<SequenceContext>, targets: Vec<Subscriber>) -> Vec<DeliveryResult> {
    let ids: Vec<_> = targets.iter().map(|s| s.id).collect();
    let mut join_set = JoinSet::new();

    for (index, subscriber) in targets.into_iter().enumerate() {
        let context = context.clone();
        let span = info_span!("delivery_sequence", subscriber_id = %subscriber.id);

        join_set.spawn(
            async move {
                let progress = SequenceProgress::default();
                let result = AssertUnwindSafe(run_sequence(&context, &subscriber, &progress))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        let message = panic_message(panic.as_ref());
                        error!(
                            panic = %message,
                            attempts = progress.attempts(),
                            "delivery sequence panicked"
                        );
                        DeliveryResult::failed(
                            subscriber.id,
                            progress.attempts(),
                            DeliveryError::internal(message).to_string(),
                            progress.last_status(),
                        )
                    });

                emit(&context, &result).await;
                (index, result)
            }
            .instrument(span),
        );
    }

    let mut slots: Vec<Option<DeliveryResult>> = vec![None; ids.len()];
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => error!(error = %e, "delivery task did not complete"),
        }
    }

    slots
        .into_iter()
        .zip(ids)
        .map(|(slot, id)| {
            slot.unwrap_or_else(|| {
                DeliveryResult::failed(
                    id,
                    0,
                    DeliveryError::internal("delivery task did not complete").to_string(),
                    None,
                )
            })
        })
        .collect()
}

async fn run_sequence(
    context: &SequenceContext,
    subscriber: &Subscriber,
    progress: &SequenceProgress,
) -> DeliveryResult {
    let signed = match sign_once(context, subscriber) {
        Ok(signed) => signed,
        Err(e) => {
            warn!(error = %e, "payload could not be signed");
            return DeliveryResult::failed(subscriber.id, 0, e.reason(), None);
        },
    };

    let mut request = DeliveryRequest {
        delivery_id: Uuid::new_v4(),
        subscriber_id: subscriber.id,
        event_kind: context.kind.clone(),
        url: subscriber.url.clone(),
        payload: signed,
        attempt_number: 0,
    };

    let mut state = DeliveryState::Pending;
    let mut last_status = None;

    loop {
        if context.is_cancelled() {
            return cancelled(subscriber, state, last_status);
        }

        state = state.next_attempt();
        request.attempt_number = state.attempts();

        let attempt = attempt_once(context, &request).await;
        last_status = attempt.http_status();
        progress.record(attempt.attempt_number, last_status);

        match context.policy.next_delay(attempt.attempt_number, &attempt.outcome) {
            RetryDecision::Stop { reason: StopReason::Delivered } => {
                let state = state.succeed();
                return DeliveryResult::delivered(
                    subscriber.id,
                    state.attempts(),
                    last_status.unwrap_or_default(),
                );
            },
            RetryDecision::Stop { reason } => {
                let state = state.fail();
                let error = attempt.outcome.reason().unwrap_or("unknown").to_string();
                debug!(?reason, attempts = state.attempts(), "delivery sequence stopped");
                return DeliveryResult::failed(subscriber.id, state.attempts(), error, last_status);
            },
            RetryDecision::Retry { delay } => {
                debug!(
                    attempt = attempt.attempt_number,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "scheduling retry"
                );

                tokio::select! {
                    () = context.clock.sleep(delay) => {}
                    () = context.cancelled() => return cancelled(subscriber, state, last_status),
                }
            },
        }
    }
}

/// Attempts made so far by one sequence, readable after it panics.
#[derive(Debug, Default)]
struct SequenceProgress {
    attempts: AtomicU32,
    // 0 until an endpoint answers.
    last_status: AtomicU32,
}

impl SequenceProgress {
    fn record(&self, attempts: u32, status: Option<u16>) {
        self.attempts.store(attempts, Ordering::Release);
        self.last_status.store(status.map_or(0, u32::from), Ordering::Release);
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    fn last_status(&self) -> Option<u16> {
        u16::try_from(self.last_status.load(Ordering::Acquire)).ok().filter(|s| *s != 0)
    }
}

fn sign_once(
    context: &SequenceContext,
    subscriber: &Subscriber,
) -> Result<SignedPayload, DeliveryError> {
    let payload = context.payload.as_ref().map_err(Clone::clone)?;
    let timestamp = context.clock.unix_timestamp();

    context
        .signer
        .sign(&subscriber.secret, &context.kind, payload, timestamp)
        .map_err(DeliveryError::from)
}

async fn attempt_once(context: &SequenceContext, request: &DeliveryRequest) -> DeliveryAttempt {
    let started_at = DateTime::<Utc>::from(context.clock.now_system());
    let start = context.clock.now();

    let outcome = context.client.deliver(request).await;

    DeliveryAttempt {
        attempt_number: request.attempt_number,
        started_at,
        outcome,
        duration: context.clock.now().saturating_duration_since(start),
    }
}

fn cancelled(
    subscriber: &Subscriber,
    state: DeliveryState,
    last_status: Option<u16>,
) -> DeliveryResult {
    let state = state.fail();
    info!(attempts = state.attempts(), "delivery sequence cancelled");
    DeliveryResult::failed(
        subscriber.id,
        state.attempts(),
        DeliveryError::Cancelled.reason(),
        last_status,
    )
}

async fn emit(context: &SequenceContext, result: &DeliveryResult) {
    let record =
        context.observer.record_delivery_result(&context.kind, result.subscriber_id, result);

    match tokio::time::timeout(context.observer_timeout, AssertUnwindSafe(record).catch_unwind())
        .await
    {
        Ok(Ok(())) => {},
        Ok(Err(panic)) => {
            warn!(
                tenant_id = %context.tenant_id,
                panic = %panic_message(panic.as_ref()),
                "delivery observer panicked"
            );
        },
        Err(_) => {
            warn!(
                tenant_id = %context.tenant_id,
                timeout_ms =
                    u64::try_from(context.observer_timeout.as_millis()).unwrap_or(u64::MAX),
                "delivery observer timed out"
            );
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked".to_string())
}
