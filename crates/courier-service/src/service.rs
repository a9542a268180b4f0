//! Submission orchestrator.
//!
//! Wires the admission checks, the priority queue, the failover dispatcher,
//! the status store, and the notifier together:
//!
//! ```text
//!   submit ──dup?──rate limited?──▶ Queued ──▶ PriorityQueue
//!                                               │ tick
//!                                               ▼
//!                          DeliveryProcessor: Processing ──▶ FailoverDispatcher
//!                                               │
//!                      Sent via <backend> ◀─────┴─────▶ All providers failed
//!                                                          │ (queue retries)
//!                                   QueueEvent::Failed ──▶ Failed in queue
//! ```

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use courier_core::{
    Clock, CoreError, DeliveryStatus, Job, JobId, JobSpec, QueueEvent, Result, StatusUpdate,
    SubmitOutcome,
};
use courier_delivery::{
    Backend, CircuitBreaker, CircuitStats, FailoverDispatcher, JobProcessor, PriorityQueue,
    QueueConfig, QueueState, QueueStats, Route, SimulatedBackend,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    notify::{StatusNotifier, StatusSubscription},
    store::{DeliveryStore, MemoryStore},
};

/// Writes a status to the store and pushes it to subscribers.
#[derive(Debug, Clone)]
struct StatusRecorder {
    store: Arc<dyn DeliveryStore>,
    notifier: StatusNotifier,
}

impl StatusRecorder {
    async fn record(&self, id: &JobId, status: DeliveryStatus) {
        if let Err(e) = self.store.mark_sent(id, status.clone()).await {
            error!(job_id = %id, %status, error = %e, "failed to record status");
        }
        self.notifier.notify(StatusUpdate::new(id.clone(), status));
    }
}

/// Queue processor that delivers a job through the failover dispatcher.
struct DeliveryProcessor {
    dispatcher: Arc<FailoverDispatcher>,
    recorder: StatusRecorder,
}

#[async_trait]
impl JobProcessor for DeliveryProcessor {
    async fn process(&self, job: Job) -> courier_delivery::Result<()> {
        self.recorder.record(&job.id, DeliveryStatus::Processing).await;

        match self.dispatcher.dispatch(&job.message).await {
            Ok(receipt) => {
                info!(
                    job_id = %job.id,
                    backend = %receipt.backend,
                    attempts = receipt.attempts,
                    retry_count = job.retry_count,
                    "job delivered"
                );
                self.recorder
                    .record(&job.id, DeliveryStatus::Sent { backend: receipt.backend })
                    .await;
                Ok(())
            },
            Err(e) => {
                warn!(job_id = %job.id, retry_count = job.retry_count, error = %e, "delivery round failed");
                self.recorder.record(&job.id, DeliveryStatus::AllProvidersFailed).await;
                Err(e)
            },
        }
    }
}

/// Entry point of the pipeline.
///
/// Must be created inside a Tokio runtime; it spawns the task that turns
/// queue events into terminal statuses.
pub struct DispatchService {
    queue: PriorityQueue,
    dispatcher: Arc<FailoverDispatcher>,
    recorder: StatusRecorder,
    shutdown: CancellationToken,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DispatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchService")
            .field("queue", &self.queue)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl DispatchService {
    /// Assembles the pipeline from its parts.
    pub fn new(
        queue_config: QueueConfig,
        dispatcher: FailoverDispatcher,
        store: Arc<dyn DeliveryStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dispatcher = Arc::new(dispatcher);
        let recorder = StatusRecorder { store, notifier: StatusNotifier::new() };
        let processor =
            Arc::new(DeliveryProcessor { dispatcher: dispatcher.clone(), recorder: recorder.clone() });

        let (queue, events) = PriorityQueue::new(queue_config, processor, clock);

        let shutdown = CancellationToken::new();
        let event_task = tokio::spawn(consume_queue_events(events, recorder.clone(), shutdown.clone()));

        Self { queue, dispatcher, recorder, shutdown, event_task: Mutex::new(Some(event_task)) }
    }

    /// Builds the pipeline described by `config`: simulated backends in the
    /// configured order, one breaker each, and an in-memory store.
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let routes = config
            .backends
            .iter()
            .map(|backend| {
                let simulated: Arc<dyn Backend> = Arc::new(SimulatedBackend::new(
                    backend.name.clone(),
                    backend.failure_rate,
                    Duration::from_millis(backend.latency_ms),
                    clock.clone(),
                ));
                let breaker =
                    CircuitBreaker::new(backend.name.clone(), config.to_circuit_config(), clock.clone());
                Route::new(simulated, Arc::new(breaker))
            })
            .collect();

        let dispatcher = FailoverDispatcher::new(routes, config.to_retry_policy(), clock.clone());
        let store = Arc::new(MemoryStore::new(config.to_rate_limit_config(), clock.clone()));

        Self::new(config.to_queue_config(), dispatcher, store, clock)
    }

    /// Accepts or rejects a submission without waiting for delivery.
    ///
    /// Checks run in order: duplicate id, then the recipient rate limit. Only
    /// an accepted job is recorded, notified as `Queued`, and enqueued. A
    /// rate-limited submission does not mark its id as seen, and neither does
    /// one refused because the queue stopped while it was being submitted.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ShutDown` after [`DispatchService::shutdown`], or a
    /// store error.
    pub async fn submit(&self, spec: JobSpec) -> Result<SubmitOutcome> {
        if self.queue.state() == QueueState::Stopped {
            return Err(CoreError::ShutDown);
        }
        if spec.id.as_str().is_empty() {
            return Err(CoreError::InvalidInput("job id must not be empty".to_string()));
        }

        let store = &self.recorder.store;

        if store.is_duplicate(&spec.id).await? {
            debug!(job_id = %spec.id, "duplicate submission");
            return Ok(SubmitOutcome::Duplicate);
        }

        if store.is_rate_limited(&spec.message.recipient).await? {
            debug!(job_id = %spec.id, recipient = %spec.message.recipient, "submission rate limited");
            return Ok(SubmitOutcome::RateLimited);
        }

        let id = spec.id.clone();
        self.recorder.record(&id, DeliveryStatus::Queued).await;
        let waiting = self.queue.enqueue(spec);
        if waiting == 0 {
            warn!(job_id = %id, "queue stopped while submitting");
            store.forget(&id).await?;
            return Err(CoreError::ShutDown);
        }

        info!(job_id = %id, waiting, "submission queued");
        Ok(SubmitOutcome::Queued)
    }

    /// Current status of a submission.
    pub async fn status(&self, id: &JobId) -> Result<Option<DeliveryStatus>> {
        self.recorder.store.status(id).await
    }

    /// Follows status changes of one submission, starting with its current
    /// status if it has one.
    pub async fn subscribe(&self, id: JobId) -> Result<StatusSubscription> {
        let subscription = self.recorder.notifier.subscribe(id.clone());
        let current = self.recorder.store.status(&id).await?;
        Ok(subscription.with_replay(current).with_store(self.recorder.store.clone()))
    }

    /// Queue gauges.
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Breaker snapshots of every backend, in dispatch order.
    pub fn circuit_stats(&self) -> Vec<CircuitStats> {
        self.dispatcher.circuit_stats()
    }

    /// Whether nothing is waiting, in flight, or pending a retry.
    pub fn is_drained(&self) -> bool {
        self.queue.stats() == QueueStats::default()
    }

    /// Stops the queue and flushes outstanding queue events.
    ///
    /// Waiting jobs and pending retries are dropped; their status stays at
    /// whatever was last recorded. Calling it again has no effect.
    pub async fn shutdown(&self) {
        self.queue.stop();
        self.shutdown.cancel();

        let event_task = self.event_task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = event_task {
            if let Err(e) = task.await {
                error!(error = %e, "queue event consumer failed");
            }
            info!("dispatch service shut down");
        }
    }
}

async fn consume_queue_events(
    mut events: mpsc::UnboundedReceiver<QueueEvent>,
    recorder: StatusRecorder,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => handle_queue_event(event, &recorder).await,
                None => return,
            },
        }
    }

    while let Ok(event) = events.try_recv() {
        handle_queue_event(event, &recorder).await;
    }
}

async fn handle_queue_event(event: QueueEvent, recorder: &StatusRecorder) {
    match event {
        QueueEvent::Failed { job, reason } => {
            error!(job_id = %job.id, retry_count = job.retry_count, %reason, "job failed in queue");
            recorder.record(&job.id, DeliveryStatus::FailedInQueue).await;
        },
        event => debug!(job_id = %event.job_id(), kind = event.kind(), "queue event"),
    }
}
