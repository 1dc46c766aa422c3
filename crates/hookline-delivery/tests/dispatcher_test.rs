//! End-to-end dispatch scenarios against mock subscriber endpoints.
//!
//! Backoff sleeps run on the virtual clock, so multi-attempt sequences
//! complete without real waiting. Tests that need wall-clock concurrency
//! (isolation, mid-sequence cancellation) say so explicitly.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::{
    collections::BTreeMap,
    future::Future,
    pin::Pin,
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use hookline_core::{
    Clock, CoreError, DeliveryObserver, DeliveryResult, EventKind, EventOccurrence, RealClock,
    SubscriberId, TestClock,
};
use hookline_delivery::{
    signing::SIGNATURE_HEADER, verify_signature, DispatchError, Dispatcher, RetryPolicy,
};
use hookline_testing::{
    fixtures::payloads, MockResponse, RecordingObserver, SubscriberBuilder, TestEnv,
    APPLICATION_CREATED, APPLICATION_REJECTED,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn routes_only_to_subscribed_kinds() {
    let env = TestEnv::new().await;
    let s1 = env.subscriber("/s1", &[APPLICATION_CREATED], vec![MockResponse::ok()]).await;
    let s2 = env.subscriber("/s2", &[APPLICATION_REJECTED], vec![MockResponse::ok()]).await;

    let results = env
        .dispatcher()
        .unwrap()
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    assert_eq!(results, vec![DeliveryResult::delivered(s1.id, 1, 200)]);
    env.server.assert_request_count("/s1", 1).await;
    env.server.assert_request_count("/s2", 0).await;
    assert!(env.observer.result_for(s2.id).await.is_none());
}

#[tokio::test]
async fn occurrence_is_dispatched_like_its_parts() {
    let env = TestEnv::new().await;
    let subscriber = env.subscriber("/s1", &[APPLICATION_CREATED], vec![MockResponse::ok()]).await;
    let occurrence =
        EventOccurrence::new(env.tenant_id, APPLICATION_CREATED, payloads::application("a7"));

    let results = env.dispatcher().unwrap().dispatch_occurrence(occurrence).await.unwrap();

    assert_eq!(results, vec![DeliveryResult::delivered(subscriber.id, 1, 200)]);
    let body = env.server.requests_to("/s1").await[0].json().unwrap();
    assert_eq!(body["payload"], payloads::application("a7"));
    assert_eq!(body["timestamp"], 1_700_000_000);
}

#[tokio::test]
async fn no_matching_subscribers_yields_empty_results() {
    let env = TestEnv::new().await;
    env.subscriber("/s1", &[APPLICATION_REJECTED], vec![MockResponse::ok()]).await;

    let results = env
        .dispatcher()
        .unwrap()
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    assert!(results.is_empty());
    assert_eq!(env.observer.count().await, 0);
    assert!(env.server.received_requests().await.is_empty());
}

#[tokio::test]
async fn other_tenants_and_inactive_subscribers_are_skipped() {
    let env = TestEnv::new().await;
    let url = env.server.mock_sequence("/other", vec![MockResponse::ok()]).await;

    env.registry
        .register(SubscriberBuilder::new().url(url.clone()).event(APPLICATION_CREATED).build())
        .await;
    env.registry
        .register(
            SubscriberBuilder::new()
                .tenant(env.tenant_id)
                .url(url)
                .event(APPLICATION_CREATED)
                .inactive()
                .build(),
        )
        .await;

    let results = env
        .dispatcher()
        .unwrap()
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    assert!(results.is_empty());
    env.server.assert_request_count("/other", 0).await;
}

#[tokio::test]
async fn transient_failures_are_retried_until_delivered() {
    let env = TestEnv::new().await;
    let subscriber = env
        .subscriber("/flaky", &[APPLICATION_CREATED], vec![
            MockResponse::status(500),
            MockResponse::status(500),
            MockResponse::ok(),
        ])
        .await;

    let results = env
        .dispatcher()
        .unwrap()
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    assert_eq!(results, vec![DeliveryResult::delivered(subscriber.id, 3, 200)]);
    env.server.assert_request_count("/flaky", 3).await;

    // Exponential without jitter: 1s after attempt 1, 2s after attempt 2.
    assert_eq!(env.clock.recorded_sleeps(), vec![
        Duration::from_secs(1),
        Duration::from_secs(2)
    ]);
}

#[tokio::test]
async fn permanent_failure_stops_after_one_attempt() {
    let env = TestEnv::new().await;
    let subscriber =
        env.subscriber("/denied", &[APPLICATION_CREATED], vec![MockResponse::status(401)]).await;

    let results = env
        .dispatcher()
        .unwrap()
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    assert_eq!(results, vec![DeliveryResult::failed(subscriber.id, 1, "401", Some(401))]);
    env.server.assert_request_count("/denied", 1).await;
    assert!(env.clock.recorded_sleeps().is_empty());
}

#[tokio::test]
async fn attempts_never_exceed_max_attempts() {
    let env = TestEnv::new().await;
    let subscriber =
        env.subscriber("/down", &[APPLICATION_CREATED], vec![MockResponse::status(500)]).await;

    let results = env
        .dispatcher()
        .unwrap()
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    assert_eq!(results, vec![DeliveryResult::failed(subscriber.id, 3, "500", Some(500))]);
    env.server.assert_request_count("/down", 3).await;
    assert_eq!(env.clock.recorded_sleeps().len(), 2);
}

#[tokio::test]
async fn retry_after_hint_replaces_backoff() {
    let env = TestEnv::new().await;
    let subscriber = env
        .subscriber("/limited", &[APPLICATION_CREATED], vec![
            MockResponse::rate_limited(7),
            MockResponse::ok(),
        ])
        .await;

    let results = env
        .dispatcher()
        .unwrap()
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    assert_eq!(results, vec![DeliveryResult::delivered(subscriber.id, 2, 200)]);
    assert_eq!(env.clock.recorded_sleeps(), vec![Duration::from_secs(7)]);
}

#[tokio::test]
async fn every_attempt_is_signed_for_its_subscriber() {
    let env = TestEnv::new().await;
    let s1 = env.subscriber("/s1", &[APPLICATION_CREATED], vec![MockResponse::ok()]).await;
    let s2 = env
        .subscriber("/s2", &[APPLICATION_CREATED], vec![
            MockResponse::status(503),
            MockResponse::ok(),
        ])
        .await;

    env.dispatcher()
        .unwrap()
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application_stage_change())
        .await
        .unwrap();

    for (path, secret, expected) in [("/s1", &s1.secret, 1), ("/s2", &s2.secret, 2)] {
        let requests = env.server.requests_to(path).await;
        assert_eq!(requests.len(), expected);

        for request in &requests {
            let signature = request.header(SIGNATURE_HEADER).unwrap();
            assert!(verify_signature(secret, &request.body, signature), "bad signature on {path}");
        }
        // Retries resend the identical signed body.
        assert!(requests.windows(2).all(|w| w[0].body == w[1].body));
    }

    let s1_body = &env.server.requests_to("/s1").await[0];
    let s1_signature = s1_body.header(SIGNATURE_HEADER).unwrap();
    assert!(!verify_signature(&s2.secret, &s1_body.body, s1_signature));
}

#[tokio::test]
async fn slow_subscriber_does_not_delay_others() {
    let env = TestEnv::new().await;
    let slow = env
        .subscriber("/slow", &[APPLICATION_CREATED], vec![MockResponse::hang(
            Duration::from_secs(5),
        )])
        .await;
    let fast = env.subscriber("/fast", &[APPLICATION_CREATED], vec![MockResponse::ok()]).await;

    let results = env
        .dispatcher()
        .unwrap()
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    // Registry order in the return value, completion order at the observer.
    assert_eq!(results[0], DeliveryResult::failed(slow.id, 3, "timeout", None));
    assert_eq!(results[1], DeliveryResult::delivered(fast.id, 1, 200));
    assert_eq!(env.observer.arrival_order().await, vec![fast.id, slow.id]);
}

#[tokio::test]
async fn results_follow_registry_order() {
    let env = TestEnv::new().await;
    let mut expected = Vec::new();
    for i in 0..5 {
        let status = if i % 2 == 0 { 200 } else { 404 };
        let path = format!("/s{i}");
        let subscriber =
            env.subscriber(&path, &[APPLICATION_CREATED], vec![MockResponse::status(status)]).await;
        expected.push(subscriber.id);
    }

    let results = env
        .dispatcher()
        .unwrap()
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    let ids: Vec<SubscriberId> = results.iter().map(|r| r.subscriber_id).collect();
    assert_eq!(ids, expected);
    assert_eq!(results.iter().filter(|r| r.delivered).count(), 3);
    env.observer.wait_for(5).await;
}

#[tokio::test]
async fn registry_outage_fails_the_dispatch() {
    let env = TestEnv::new().await;
    env.subscriber("/s1", &[APPLICATION_CREATED], vec![MockResponse::ok()]).await;
    env.registry.inject_failure(CoreError::Unavailable("connection reset".into())).await;

    let dispatcher = env.dispatcher().unwrap();
    let error = dispatcher
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap_err();

    assert!(matches!(error, DispatchError::RegistryUnavailable(CoreError::Unavailable(_))));
    env.server.assert_request_count("/s1", 0).await;
    assert_eq!(env.observer.count().await, 0);

    // The injected failure is one-shot.
    let results = dispatcher
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn empty_secret_fails_without_network() {
    let env = TestEnv::new().await;
    let url = env.server.mock_sequence("/nosecret", vec![MockResponse::ok()]).await;
    let subscriber = SubscriberBuilder::new()
        .tenant(env.tenant_id)
        .url(url)
        .event(APPLICATION_CREATED)
        .secret("")
        .build();
    env.registry.register(subscriber.clone()).await;
    let healthy =
        env.subscriber("/healthy", &[APPLICATION_CREATED], vec![MockResponse::ok()]).await;

    let results = env
        .dispatcher()
        .unwrap()
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    assert!(!results[0].delivered);
    assert_eq!(results[0].attempts, 0);
    assert_eq!(
        results[0].last_error.as_deref(),
        Some("signing failed: subscriber secret is empty")
    );
    assert_eq!(results[1], DeliveryResult::delivered(healthy.id, 1, 200));
    env.server.assert_request_count("/nosecret", 0).await;
}

#[tokio::test]
async fn unserializable_payload_fails_every_target() {
    let env = TestEnv::new().await;
    let subscriber = env.subscriber("/s1", &[APPLICATION_CREATED], vec![MockResponse::ok()]).await;

    // JSON object keys must be strings.
    let payload: BTreeMap<Vec<u8>, u8> = BTreeMap::from([(vec![1, 2], 3)]);

    let results = env
        .dispatcher()
        .unwrap()
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payload)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].subscriber_id, subscriber.id);
    assert_eq!(results[0].attempts, 0);
    assert!(results[0].last_error.as_deref().unwrap().starts_with("signing failed:"));
    env.server.assert_request_count("/s1", 0).await;
}

#[tokio::test]
async fn cancellation_before_dispatch_skips_the_network() {
    let env = TestEnv::new().await;
    let subscriber = env.subscriber("/s1", &[APPLICATION_CREATED], vec![MockResponse::ok()]).await;

    let token = CancellationToken::new();
    token.cancel();

    let results = env
        .dispatcher()
        .unwrap()
        .dispatch_with_cancellation(
            env.tenant_id,
            APPLICATION_CREATED,
            &payloads::application("a1"),
            &token,
        )
        .await
        .unwrap();

    assert_eq!(results, vec![DeliveryResult::failed(subscriber.id, 0, "cancelled", None)]);
    env.server.assert_request_count("/s1", 0).await;
    assert_eq!(env.observer.count().await, 1);
}

#[tokio::test]
async fn cancellation_interrupts_backoff() {
    let env = TestEnv::new().await;
    let subscriber =
        env.subscriber("/down", &[APPLICATION_CREATED], vec![MockResponse::status(500)]).await;

    // Real clock and a long base delay: the sequence parks in its first
    // backoff sleep until the token fires.
    let mut config = TestEnv::config();
    config.retry_policy = RetryPolicy {
        base_delay: Duration::from_secs(30),
        ..RetryPolicy::default().without_jitter()
    };
    let dispatcher = Dispatcher::with_clock(
        env.registry.clone(),
        Arc::new(env.observer.clone()),
        config,
        Arc::new(RealClock::new()),
    )
    .unwrap();

    let token = CancellationToken::new();
    let dispatch = {
        let token = token.clone();
        let tenant_id = env.tenant_id;
        async move {
            dispatcher
                .dispatch_with_cancellation(
                    tenant_id,
                    APPLICATION_CREATED,
                    &payloads::application("a1"),
                    &token,
                )
                .await
        }
    };
    let handle = tokio::spawn(dispatch);

    tokio::time::timeout(Duration::from_secs(5), async {
        while env.server.request_count("/down").await < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first attempt should happen");
    token.cancel();

    let results = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cancelled dispatch should return promptly")
        .unwrap()
        .unwrap();

    assert_eq!(results, vec![DeliveryResult::failed(subscriber.id, 1, "cancelled", Some(500))]);
    env.server.assert_request_count("/down", 1).await;
}

#[tokio::test]
async fn shutdown_cancels_later_dispatches() {
    let env = TestEnv::new().await;
    let subscriber = env.subscriber("/s1", &[APPLICATION_CREATED], vec![MockResponse::ok()]).await;
    let dispatcher = env.dispatcher().unwrap();

    assert!(!dispatcher.is_shut_down());
    dispatcher.shutdown();
    dispatcher.shutdown();
    assert!(dispatcher.is_shut_down());

    let results = dispatcher
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    assert_eq!(results, vec![DeliveryResult::failed(subscriber.id, 0, "cancelled", None)]);
    env.server.assert_request_count("/s1", 0).await;
}

#[tokio::test]
async fn zero_max_attempts_is_rejected() {
    let env = TestEnv::new().await;
    let mut config = TestEnv::config();
    config.retry_policy = RetryPolicy::default().with_max_attempts(0);

    let error = env.dispatcher_with(config).unwrap_err();
    assert!(matches!(error, DispatchError::Configuration(_)));
}

#[tokio::test]
async fn unusable_retry_policies_are_rejected() {
    let env = TestEnv::new().await;

    for policy in [
        RetryPolicy { jitter_factor: f64::NAN, ..RetryPolicy::default() },
        RetryPolicy { jitter_factor: 2.0, ..RetryPolicy::default() },
        RetryPolicy {
            base_delay: Duration::from_secs(90),
            max_delay: Duration::from_secs(30),
            ..RetryPolicy::default()
        },
    ] {
        let mut config = TestEnv::config();
        config.retry_policy = policy;

        let error = env.dispatcher_with(config).unwrap_err();
        assert!(matches!(error, DispatchError::Configuration(_)), "{error}");
    }
}

#[tokio::test]
async fn uncapped_policy_keeps_retrying() {
    let env = TestEnv::new().await;
    let subscriber = env
        .subscriber("/flaky", &[APPLICATION_CREATED], vec![
            MockResponse::status(500),
            MockResponse::ok(),
        ])
        .await;

    let mut config = TestEnv::config();
    config.retry_policy = RetryPolicy {
        max_delay: Duration::MAX,
        jitter_factor: 1.0,
        ..RetryPolicy::default()
    };

    let results = env
        .dispatcher_with(config)
        .unwrap()
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    assert_eq!(results, vec![DeliveryResult::delivered(subscriber.id, 2, 200)]);
}

/// Clock whose backoff sleep panics, standing in for a bug inside a
/// running sequence.
#[derive(Debug)]
struct PanickingSleepClock(TestClock);

impl Clock for PanickingSleepClock {
    fn now(&self) -> Instant {
        self.0.now()
    }

    fn now_system(&self) -> SystemTime {
        self.0.now_system()
    }

    fn sleep(&self, _duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        panic!("clock exploded");
    }
}

#[tokio::test]
async fn panicked_sequence_keeps_attempts_made() {
    let env = TestEnv::new().await;
    let broken =
        env.subscriber("/broken", &[APPLICATION_CREATED], vec![MockResponse::status(500)]).await;
    let healthy =
        env.subscriber("/healthy", &[APPLICATION_CREATED], vec![MockResponse::ok()]).await;

    let dispatcher = Dispatcher::with_clock(
        env.registry.clone(),
        Arc::new(env.observer.clone()),
        TestEnv::config(),
        Arc::new(PanickingSleepClock(env.clock.clone())),
    )
    .unwrap();

    let results = dispatcher
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    assert_eq!(results, vec![
        DeliveryResult::failed(broken.id, 1, "internal error: clock exploded", Some(500)),
        DeliveryResult::delivered(healthy.id, 1, 200),
    ]);
    env.server.assert_request_count("/broken", 1).await;
    env.observer.wait_for(2).await;
    assert_eq!(env.observer.result_for(broken.id).await, Some(results[0].clone()));
}

#[derive(Debug)]
struct PanickingObserver;

#[async_trait::async_trait]
impl DeliveryObserver for PanickingObserver {
    async fn record_delivery_result(
        &self,
        _event_kind: &EventKind,
        _subscriber_id: SubscriberId,
        _result: &DeliveryResult,
    ) {
        panic!("observer exploded");
    }
}

#[tokio::test]
async fn panicking_observer_does_not_affect_results() {
    let env = TestEnv::new().await;
    let subscriber = env.subscriber("/s1", &[APPLICATION_CREATED], vec![MockResponse::ok()]).await;

    let dispatcher = Dispatcher::with_clock(
        env.registry.clone(),
        Arc::new(PanickingObserver),
        TestEnv::config(),
        Arc::new(env.clock.clone()),
    )
    .unwrap();

    let results = dispatcher
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    assert_eq!(results, vec![DeliveryResult::delivered(subscriber.id, 1, 200)]);
}

#[tokio::test]
async fn slow_observer_is_bounded_by_timeout() {
    let env = TestEnv::new().await;
    let subscriber = env.subscriber("/s1", &[APPLICATION_CREATED], vec![MockResponse::ok()]).await;

    let observer = RecordingObserver::with_delay(Duration::from_secs(30));
    let mut config = TestEnv::config();
    config.observer_timeout = Duration::from_millis(50);
    let dispatcher = Dispatcher::with_clock(
        env.registry.clone(),
        Arc::new(observer.clone()),
        config,
        Arc::new(env.clock.clone()),
    )
    .unwrap();

    let results = tokio::time::timeout(
        Duration::from_secs(5),
        dispatcher.dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1")),
    )
    .await
    .expect("observer timeout should bound the dispatch")
    .unwrap();

    assert_eq!(results, vec![DeliveryResult::delivered(subscriber.id, 1, 200)]);
    assert_eq!(observer.count().await, 0);
}

#[tokio::test]
async fn observer_sees_event_kind_and_final_result() {
    let env = TestEnv::new().await;
    let subscriber = env
        .subscriber("/s1", &[APPLICATION_CREATED], vec![
            MockResponse::status(502),
            MockResponse::ok(),
        ])
        .await;

    env.dispatcher()
        .unwrap()
        .dispatch(env.tenant_id, APPLICATION_CREATED, &payloads::application("a1"))
        .await
        .unwrap();

    let recorded = env.observer.results().await;
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].event_kind, EventKind::from(APPLICATION_CREATED));
    assert_eq!(recorded[0].subscriber_id, subscriber.id);
    assert_eq!(recorded[0].result, DeliveryResult::delivered(subscriber.id, 2, 200));
}
