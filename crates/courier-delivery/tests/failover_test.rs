//! Integration tests for ordered failover across backends.
//!
//! Uses scripted backends and a shared `TestClock` so breaker cooldowns and
//! send backoff are deterministic.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use courier_delivery::{
    Backend, CircuitBreaker, CircuitConfig, CircuitState, DeliveryError, FailoverDispatcher,
    RetryPolicy, Route,
};
use courier_testing::{message, Reply, ScriptedBackend, TestClock};

fn route(backend: &Arc<ScriptedBackend>, clock: &TestClock) -> Route {
    let breaker = CircuitBreaker::new(backend.name(), CircuitConfig::default(), Arc::new(clock.clone()));
    Route::new(backend.clone(), Arc::new(breaker))
}

fn dispatcher(backends: &[&Arc<ScriptedBackend>], clock: &TestClock) -> FailoverDispatcher {
    let routes = backends.iter().map(|backend| route(backend, clock)).collect();
    FailoverDispatcher::new(
        routes,
        RetryPolicy::new(3, Duration::from_millis(100)),
        Arc::new(clock.clone()),
    )
}

#[tokio::test]
async fn failing_primary_fails_over_to_secondary() -> Result<()> {
    let clock = TestClock::new();
    let primary = Arc::new(ScriptedBackend::rejecting("primary"));
    let secondary = Arc::new(ScriptedBackend::accepting("secondary"));
    let dispatcher = dispatcher(&[&primary, &secondary], &clock);

    let receipt = dispatcher.dispatch(&message()).await?;

    assert_eq!(receipt.backend, "secondary");
    assert_eq!(receipt.attempts, 1);
    assert_eq!(primary.calls(), 3, "primary gets its full attempt budget");
    assert_eq!(secondary.calls(), 1);

    let stats = dispatcher.circuit_stats();
    assert_eq!(stats[0].failure_count, 1, "one exhausted budget is one breaker failure");
    assert_eq!(stats[1].failure_count, 0);
    assert_eq!(stats[1].success_count, 1);
    Ok(())
}

#[tokio::test]
async fn transient_failures_are_absorbed_by_send_retry() -> Result<()> {
    let clock = TestClock::new();
    let primary = Arc::new(ScriptedBackend::failing_times("primary", 2));
    let secondary = Arc::new(ScriptedBackend::accepting("secondary"));
    let dispatcher = dispatcher(&[&primary, &secondary], &clock);

    let receipt = dispatcher.dispatch(&message()).await?;

    assert_eq!(receipt.backend, "primary");
    assert_eq!(receipt.attempts, 3);
    assert_eq!(secondary.calls(), 0);
    assert_eq!(clock.total_slept(), Duration::from_millis(300));
    Ok(())
}

#[tokio::test]
async fn open_circuit_skips_primary_until_cooldown_passes() -> Result<()> {
    let clock = TestClock::new();
    let primary = Arc::new(ScriptedBackend::rejecting("primary"));
    let secondary = Arc::new(ScriptedBackend::accepting("secondary"));
    let dispatcher = dispatcher(&[&primary, &secondary], &clock);

    for _ in 0..3 {
        dispatcher.dispatch(&message()).await?;
    }
    assert_eq!(primary.calls(), 9);
    assert_eq!(dispatcher.circuit_stats()[0].state, CircuitState::Open);

    dispatcher.dispatch(&message()).await?;
    assert_eq!(primary.calls(), 9, "open circuit must not call the backend");

    clock.advance(Duration::from_secs(10));
    dispatcher.dispatch(&message()).await?;
    assert_eq!(primary.calls(), 12, "closed again after cooldown");
    assert_eq!(dispatcher.circuit_stats()[0].failure_count, 4, "counter is sticky");
    assert_eq!(dispatcher.circuit_stats()[0].state, CircuitState::Open);
    Ok(())
}

#[tokio::test]
async fn every_backend_failing_reports_exhaustion() -> Result<()> {
    let clock = TestClock::new();
    let primary = Arc::new(ScriptedBackend::rejecting("primary"));
    let secondary = Arc::new(ScriptedBackend::rejecting("secondary"));
    let dispatcher = dispatcher(&[&primary, &secondary], &clock);

    let error = dispatcher.dispatch(&message()).await.unwrap_err();

    assert_eq!(error, DeliveryError::all_backends_exhausted(2, 0));
    assert_eq!(error.to_string(), "all backends exhausted (2 failed, 0 skipped)");
    assert_eq!(primary.calls() + secondary.calls(), 6);
    Ok(())
}

#[tokio::test]
async fn scripted_recovery_resets_the_breaker() -> Result<()> {
    let clock = TestClock::new();
    let primary = Arc::new(
        ScriptedBackend::accepting("primary").script([Reply::Reject, Reply::Reject, Reply::Reject]),
    );
    let secondary = Arc::new(ScriptedBackend::accepting("secondary"));
    let dispatcher = dispatcher(&[&primary, &secondary], &clock);

    assert_eq!(dispatcher.dispatch(&message()).await?.backend, "secondary");
    assert_eq!(dispatcher.circuit_stats()[0].failure_count, 1);

    assert_eq!(dispatcher.dispatch(&message()).await?.backend, "primary");
    assert_eq!(dispatcher.circuit_stats()[0].failure_count, 0);
    Ok(())
}
