//! End-to-end tests for the dispatch service.
//!
//! Scripted backends stand in for real providers. The queue runs on paused
//! Tokio time; breakers, send backoff, and the rate limiter run on a
//! `TestClock`.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use courier_core::{CoreError, DeliveryStatus, JobId, Priority, Result as CoreResult, SubmitOutcome};
use courier_delivery::{
    Backend, CircuitBreaker, CircuitConfig, FailoverDispatcher, QueueConfig, QueueStats, RetryPolicy,
    Route,
};
use courier_service::{
    BackendConfig, Config, DeliveryStore, DispatchService, MemoryStore, RateLimitConfig,
};
use courier_testing::{ScriptedBackend, SubmissionBuilder, TestClock};
use tokio::sync::Notify;

fn service(
    backends: &[&Arc<ScriptedBackend>],
    queue_config: QueueConfig,
    clock: &TestClock,
) -> DispatchService {
    let store = Arc::new(MemoryStore::new(RateLimitConfig::default(), Arc::new(clock.clone())));
    service_with_store(backends, queue_config, clock, store)
}

fn service_with_store(
    backends: &[&Arc<ScriptedBackend>],
    queue_config: QueueConfig,
    clock: &TestClock,
    store: Arc<dyn DeliveryStore>,
) -> DispatchService {
    let routes = backends
        .iter()
        .map(|backend| {
            let breaker = CircuitBreaker::new(
                backend.name(),
                CircuitConfig::default(),
                Arc::new(clock.clone()),
            );
            Route::new((*backend).clone(), Arc::new(breaker))
        })
        .collect();
    let dispatcher = FailoverDispatcher::new(
        routes,
        RetryPolicy::new(3, Duration::from_millis(100)),
        Arc::new(clock.clone()),
    );

    DispatchService::new(queue_config, dispatcher, store, Arc::new(clock.clone()))
}

/// Store whose rate-limit check parks until the test releases it.
#[derive(Debug)]
struct GatedStore {
    inner: MemoryStore,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl DeliveryStore for GatedStore {
    async fn is_duplicate(&self, id: &JobId) -> CoreResult<bool> {
        self.inner.is_duplicate(id).await
    }

    async fn is_rate_limited(&self, recipient: &str) -> CoreResult<bool> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.is_rate_limited(recipient).await
    }

    async fn mark_sent(&self, id: &JobId, status: DeliveryStatus) -> CoreResult<()> {
        self.inner.mark_sent(id, status).await
    }

    async fn status(&self, id: &JobId) -> CoreResult<Option<DeliveryStatus>> {
        self.inner.status(id).await
    }

    async fn forget(&self, id: &JobId) -> CoreResult<()> {
        self.inner.forget(id).await
    }
}

#[tokio::test(start_paused = true)]
async fn failed_primary_falls_over_to_secondary() -> Result<()> {
    let clock = TestClock::new();
    let primary = Arc::new(ScriptedBackend::rejecting("primary"));
    let secondary = Arc::new(ScriptedBackend::accepting("secondary"));
    let service = service(&[&primary, &secondary], QueueConfig::default(), &clock);

    let outcome = service.submit(SubmissionBuilder::new().id("job-1").build()).await?;
    assert_eq!(outcome, SubmitOutcome::Queued);
    assert_eq!(service.status(&"job-1".into()).await?, Some(DeliveryStatus::Queued));

    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let status = service.status(&"job-1".into()).await?;
    assert_eq!(status, Some(DeliveryStatus::Sent { backend: "secondary".into() }));
    assert_eq!(status.map(|s| s.to_string()).as_deref(), Some("Sent via secondary"));
    assert_eq!(primary.calls(), 3);

    let circuits = service.circuit_stats();
    assert_eq!(circuits[0].failure_count, 1);
    assert_eq!(circuits[1].failure_count, 0);
    assert_eq!(circuits[1].success_count, 1);

    service.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn duplicate_ids_are_rejected() -> Result<()> {
    let clock = TestClock::new();
    let backend = Arc::new(ScriptedBackend::accepting("primary"));
    let service = service(&[&backend], QueueConfig::default(), &clock);

    let first = service.submit(SubmissionBuilder::new().id("dup").build()).await?;
    let second = service
        .submit(SubmissionBuilder::new().id("dup").recipient("other@example.com").build())
        .await?;

    assert_eq!(first, SubmitOutcome::Queued);
    assert_eq!(second, SubmitOutcome::Duplicate);
    assert_eq!(service.queue_stats().length, 1);

    service.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rate_limited_submission_leaves_no_trace() -> Result<()> {
    let clock = TestClock::new();
    let backend = Arc::new(ScriptedBackend::accepting("primary"));
    let service = service(&[&backend], QueueConfig::default(), &clock);

    let first = SubmissionBuilder::new().id("first").recipient("carol@example.com").build();
    let second = SubmissionBuilder::new().id("second").recipient("carol@example.com").build();

    assert_eq!(service.submit(first).await?, SubmitOutcome::Queued);
    assert_eq!(service.submit(second.clone()).await?, SubmitOutcome::RateLimited);
    assert_eq!(service.status(&"second".into()).await?, None);

    clock.advance(Duration::from_secs(12));
    assert_eq!(service.submit(second).await?, SubmitOutcome::Queued, "id was never marked seen");

    service.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn subscriber_sees_every_status_until_failed_in_queue() -> Result<()> {
    let clock = TestClock::new();
    let primary = Arc::new(ScriptedBackend::rejecting("primary"));
    let queue_config =
        QueueConfig { max_retries: 1, retry_delay: Duration::from_secs(1), ..Default::default() };
    let service = service(&[&primary], queue_config, &clock);

    service.submit(SubmissionBuilder::new().id("doomed").build()).await?;
    let mut subscription = service.subscribe(JobId::from("doomed")).await?;

    tokio::time::sleep(Duration::from_secs(10)).await;

    let mut statuses = Vec::new();
    while let Some(update) = subscription.next().await {
        let terminal = update.status.is_terminal();
        statuses.push(update.status.to_string());
        if terminal {
            break;
        }
    }

    assert_eq!(
        statuses,
        vec![
            "Queued",
            "Processing",
            "All providers failed",
            "Processing",
            "All providers failed",
            "Failed in queue",
        ]
    );
    assert_eq!(service.status(&"doomed".into()).await?, Some(DeliveryStatus::FailedInQueue));
    assert!(service.is_drained());

    service.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn queue_stats_track_waiting_jobs() -> Result<()> {
    let clock = TestClock::new();
    let backend = Arc::new(ScriptedBackend::accepting("primary"));
    let service = service(&[&backend], QueueConfig::default(), &clock);

    for index in 0..3 {
        let spec = SubmissionBuilder::new().recipient(format!("user{index}@example.com")).build();
        service.submit(spec).await?;
    }
    assert_eq!(service.queue_stats(), QueueStats { length: 3, active: 0, pending_retries: 0 });

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(service.queue_stats(), QueueStats::default());
    assert_eq!(backend.calls(), 3);

    service.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn submissions_after_shutdown_are_refused() -> Result<()> {
    let clock = TestClock::new();
    let backend = Arc::new(ScriptedBackend::accepting("primary"));
    let service = service(&[&backend], QueueConfig::default(), &clock);

    service.submit(SubmissionBuilder::new().build()).await?;
    service.shutdown().await;
    service.shutdown().await;

    let refused = service.submit(SubmissionBuilder::new().recipient("late@example.com").build()).await;
    assert_eq!(refused, Err(CoreError::ShutDown));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(backend.calls(), 0, "dropped jobs never reach a backend");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn submission_interrupted_by_shutdown_leaves_no_trace() -> Result<()> {
    let clock = TestClock::new();
    let backend = Arc::new(ScriptedBackend::accepting("primary"));
    let store = Arc::new(GatedStore {
        inner: MemoryStore::new(RateLimitConfig::default(), Arc::new(clock.clone())),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let service = Arc::new(service_with_store(
        &[&backend],
        QueueConfig::default(),
        &clock,
        store.clone(),
    ));

    let submitting = {
        let service = service.clone();
        tokio::spawn(async move { service.submit(SubmissionBuilder::new().id("late").build()).await })
    };

    store.entered.notified().await;
    service.shutdown().await;
    store.release.notify_one();

    assert_eq!(submitting.await?, Err(CoreError::ShutDown));
    assert_eq!(service.status(&"late".into()).await?, None);
    assert!(!store.is_duplicate(&"late".into()).await?);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn higher_priority_submissions_reach_the_backend_first() -> Result<()> {
    let clock = TestClock::new();
    let backend = Arc::new(ScriptedBackend::accepting("primary"));
    let queue_config = QueueConfig { max_concurrent: 1, ..Default::default() };
    let service = service(&[&backend], queue_config, &clock);

    for (recipient, priority) in [
        ("low@example.com", Priority::Low),
        ("normal@example.com", Priority::Normal),
        ("high@example.com", Priority::High),
    ] {
        service
            .submit(SubmissionBuilder::new().recipient(recipient).priority(priority).build())
            .await?;
    }

    tokio::time::sleep(Duration::from_millis(3_500)).await;

    assert_eq!(
        backend.recipients(),
        vec!["high@example.com", "normal@example.com", "low@example.com"]
    );
    assert!(service.is_drained());

    service.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn service_built_from_config_delivers() -> Result<()> {
    let clock = TestClock::new();
    let config = Config {
        backends: vec![BackendConfig { name: "reliable".into(), failure_rate: 0.0, latency_ms: 5 }],
        ..Config::default()
    };
    config.validate()?;
    let service = DispatchService::from_config(&config, Arc::new(clock.clone()));

    service.submit(SubmissionBuilder::new().id("cfg").build()).await?;
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    assert_eq!(
        service.status(&"cfg".into()).await?,
        Some(DeliveryStatus::Sent { backend: "reliable".into() })
    );

    service.shutdown().await;
    Ok(())
}
