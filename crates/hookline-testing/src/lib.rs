//! Test infrastructure for deterministic dispatch testing.
//!
//! Provides wiremock-backed subscriber endpoints with scripted responses,
//! subscriber fixtures, a recording observer, and the virtual clock. Backoff
//! sleeps go through [`TestClock`], so multi-attempt scenarios finish
//! instantly.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::sync::Arc;

use hookline_core::{EventKind, Subscriber, TenantId};
use hookline_delivery::{
    DispatchConfig, DispatchError, Dispatcher, InMemorySubscriptionRegistry, RetryPolicy,
};

pub mod fixtures;
pub mod http;
pub mod observer;

pub use fixtures::{SubscriberBuilder, APPLICATION_CREATED, APPLICATION_REJECTED};
pub use hookline_core::{Clock, TestClock};
pub use http::{MockEndpoint, MockResponse, MockServer, RecordedRequest};
pub use observer::{RecordedResult, RecordingObserver};

/// Installs a test-friendly tracing subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One tenant, its subscriber endpoints, and everything needed to dispatch
/// to them.
pub struct TestEnv {
    /// Mock server hosting every subscriber endpoint.
    pub server: MockServer,
    /// Registry the dispatcher reads from.
    pub registry: Arc<InMemorySubscriptionRegistry>,
    /// Observer recording terminal results.
    pub observer: RecordingObserver,
    /// Virtual clock driving timestamps and backoff.
    pub clock: TestClock,
    /// Tenant owning the subscribers created through this environment.
    pub tenant_id: TenantId,
}

impl TestEnv {
    /// Starts a mock server and empty registry for a fresh tenant.
    pub async fn new() -> Self {
        init_tracing();

        Self {
            server: MockServer::start().await,
            registry: Arc::new(InMemorySubscriptionRegistry::new()),
            observer: RecordingObserver::new(),
            clock: TestClock::at_unix(1_700_000_000),
            tenant_id: TenantId::new(),
        }
    }

    /// Mounts `responses` on `path` and registers a subscriber of this
    /// tenant pointed at it, subscribed to `events`.
    pub async fn subscriber(
        &self,
        path: &str,
        events: &[&str],
        responses: Vec<MockResponse>,
    ) -> Subscriber {
        let url = self.server.mock_sequence(path, responses).await;
        let subscriber = events
            .iter()
            .fold(SubscriberBuilder::new().tenant(self.tenant_id).url(url), |builder, event| {
                builder.event(EventKind::from(*event))
            })
            .build();

        self.registry.register(subscriber.clone()).await;
        subscriber
    }

    /// Dispatch configuration for tests: short client timeout, no jitter.
    pub fn config() -> DispatchConfig {
        let mut config = DispatchConfig::default();
        config.client.timeout = std::time::Duration::from_millis(500);
        config.retry_policy = RetryPolicy::default().without_jitter();
        config
    }

    /// Builds a dispatcher over this environment with [`TestEnv::config`].
    ///
    /// # Errors
    ///
    /// Propagates dispatcher construction errors.
    pub fn dispatcher(&self) -> Result<Dispatcher, DispatchError> {
        self.dispatcher_with(Self::config())
    }

    /// Builds a dispatcher over this environment with `config`.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher construction errors.
    pub fn dispatcher_with(&self, config: DispatchConfig) -> Result<Dispatcher, DispatchError> {
        Dispatcher::with_clock(
            self.registry.clone(),
            Arc::new(self.observer.clone()),
            config,
            Arc::new(self.clock.clone()),
        )
    }
}
