//! Priority job queue with a timer-driven processing cycle.
//!
//! Jobs wait in a list ordered by priority, FIFO within a priority. A tick
//! fires every `processing_interval` and moves the highest priority jobs into
//! flight, never more than `max_concurrent` at once. Each job in flight is
//! handed to a [`JobProcessor`]; a failed job is readmitted after
//! `retry_delay * 2^(retry_count - 1)` until it has failed more than
//! `max_retries` times, at which point it is dropped with a `Failed` event.
//!
//! ```text
//!   Idle ──enqueue──▶ Processing ──stop──▶ Stopped
//!     └────────────────stop────────────────▲
//! ```
//!
//! # Concurrency
//!
//! The wait list, the in-flight counter, and the retry timer registry sit
//! behind one mutex that is never held across an `.await`. Only the tick
//! handler, a job's completion, and a retry timer mutate them. `stop()`
//! cancels the shutdown token observed by every spawned task and aborts the
//! tick loop and all armed retry timers.
//!
//! Lifecycle events are sent on an unbounded channel whose receiver is
//! returned from [`PriorityQueue::new`]; the queue keeps working if the
//! receiver is dropped.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{Clock, Job, JobId, JobSpec, Priority, QueueEvent};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DeliveryError, ErrorCategory, Result};

/// Queue tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Time between processing ticks.
    pub processing_interval: Duration,
    /// Upper bound on jobs in flight at once.
    pub max_concurrent: usize,
    /// Failed processing rounds a job may be readmitted after.
    pub max_retries: u32,
    /// Delay before the first readmission; doubles per further failure.
    pub retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            processing_interval: Duration::from_secs(1),
            max_concurrent: crate::DEFAULT_MAX_CONCURRENT,
            max_retries: crate::DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl QueueConfig {
    /// Delay before readmitting a job that has now failed `retry_count` times.
    pub fn retry_delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(31);
        self.retry_delay.saturating_mul(2_u32.saturating_pow(exponent))
    }
}

/// Lifecycle state of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Nothing enqueued yet; no tick loop running.
    Idle,
    /// Tick loop running.
    Processing,
    /// Shut down for good.
    Stopped,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Processing => write!(f, "processing"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time queue gauges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting to be dispatched.
    pub length: usize,
    /// Jobs currently in flight.
    pub active: usize,
    /// Failed jobs waiting for their readmission timer.
    pub pending_retries: usize,
}

/// Work performed for each dispatched job.
///
/// This is the only thing the queue knows about delivery: an `Ok` means the
/// job is done, an `Err` sends it through queue-level retry.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    /// Processes one job.
    async fn process(&self, job: Job) -> Result<()>;
}

#[async_trait]
impl<F, Fut> JobProcessor for F
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn process(&self, job: Job) -> Result<()> {
        (self)(job).await
    }
}

struct Shared {
    state: QueueState,
    waiting: Vec<Job>,
    active: usize,
    retry_timers: HashMap<u64, JoinHandle<()>>,
    next_timer_id: u64,
    tick_task: Option<JoinHandle<()>>,
}

struct Inner {
    config: QueueConfig,
    processor: Arc<dyn JobProcessor>,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<QueueEvent>,
    shutdown: CancellationToken,
    shared: Mutex<Shared>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: QueueEvent) {
        if self.events.send(event).is_err() {
            debug!("queue event receiver dropped, event discarded");
        }
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.clock.now_system())
    }
}

/// Handle to a priority queue. Clones share the same queue.
///
/// Must be used from within a Tokio runtime: the first `enqueue` spawns the
/// tick loop.
#[derive(Clone)]
pub struct PriorityQueue {
    inner: Arc<Inner>,
}

impl fmt::Debug for PriorityQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl PriorityQueue {
    /// Creates an idle queue and the receiver for its lifecycle events.
    pub fn new(
        config: QueueConfig,
        processor: Arc<dyn JobProcessor>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<QueueEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Inner {
            config,
            processor,
            clock,
            events,
            shutdown: CancellationToken::new(),
            shared: Mutex::new(Shared {
                state: QueueState::Idle,
                waiting: Vec::new(),
                active: 0,
                retry_timers: HashMap::new(),
                next_timer_id: 0,
                tick_task: None,
            }),
        };

        (Self { inner: Arc::new(inner) }, receiver)
    }

    /// Adds a job and returns the number of jobs now waiting.
    ///
    /// Returns 0 without doing anything once the queue is stopped. The first
    /// enqueue on an idle queue starts the tick loop.
    pub fn enqueue(&self, spec: JobSpec) -> usize {
        let job = Job::new(spec, self.inner.now());
        let job_id = job.id.clone();
        let priority = job.priority;

        let waiting = {
            let mut shared = self.inner.lock();
            if shared.state == QueueState::Stopped {
                debug!(job_id = %job_id, "queue stopped, rejecting enqueue");
                return 0;
            }

            insert_by_priority(&mut shared.waiting, job);

            if shared.state == QueueState::Idle {
                shared.state = QueueState::Processing;
                shared.tick_task = Some(self.spawn_tick_loop());
                info!(
                    interval_ms = millis(self.inner.config.processing_interval),
                    max_concurrent = self.inner.config.max_concurrent,
                    "priority queue processing started"
                );
            }

            shared.waiting.len()
        };

        debug!(job_id = %job_id, %priority, waiting, "job enqueued");
        self.inner.emit(QueueEvent::Enqueued { job_id, priority, waiting });

        waiting
    }

    /// Changes the priority of a waiting job.
    ///
    /// The wait list is re-sorted at the next tick, so the new priority
    /// applies to that tick's selection. Returns `false` if the job is not
    /// waiting (unknown, in flight, or pending a retry).
    pub fn reprioritize(&self, job_id: &JobId, priority: Priority) -> bool {
        let mut shared = self.inner.lock();
        match shared.waiting.iter_mut().find(|job| &job.id == job_id) {
            Some(job) => {
                job.priority = priority;
                true
            },
            None => false,
        }
    }

    /// Stops the queue for good.
    ///
    /// Cancels the tick loop and every armed retry timer, drops all waiting
    /// jobs, and resets the in-flight gauge. Jobs already selected by a tick
    /// but not yet handed to the processor are never processed. Calling it
    /// again has no effect.
    pub fn stop(&self) {
        let (tick_task, retry_timers, dropped) = {
            let mut shared = self.inner.lock();
            if shared.state == QueueState::Stopped {
                return;
            }

            shared.state = QueueState::Stopped;
            shared.active = 0;
            let dropped = shared.waiting.len();
            shared.waiting.clear();

            (shared.tick_task.take(), std::mem::take(&mut shared.retry_timers), dropped)
        };

        self.inner.shutdown.cancel();

        if let Some(tick_task) = tick_task {
            tick_task.abort();
        }
        let cancelled_retries = retry_timers.len();
        for (_, timer) in retry_timers {
            timer.abort();
        }

        info!(dropped, cancelled_retries, "priority queue stopped");
    }

    /// Number of jobs waiting to be dispatched.
    pub fn len(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// Whether no job is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of jobs currently in flight.
    pub fn active(&self) -> usize {
        self.inner.lock().active
    }

    /// Number of failed jobs waiting for their readmission timer.
    pub fn pending_retries(&self) -> usize {
        self.inner.lock().retry_timers.len()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> QueueState {
        self.inner.lock().state
    }

    /// All gauges read under one lock.
    pub fn stats(&self) -> QueueStats {
        let shared = self.inner.lock();
        QueueStats {
            length: shared.waiting.len(),
            active: shared.active,
            pending_retries: shared.retry_timers.len(),
        }
    }

    /// Queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    fn spawn_tick_loop(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        let period = self.inner.config.processing_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        PriorityQueue { inner }.tick();
                    }
                }
            }

            debug!("tick loop exited");
        })
    }

    /// Moves the highest priority jobs into flight, up to the free capacity.
    fn tick(&self) {
        let batch: Vec<Job> = {
            let mut shared = self.inner.lock();
            if shared.state != QueueState::Processing {
                return;
            }

            shared.waiting.sort_by_key(|job| job.priority);

            let free = self.inner.config.max_concurrent.saturating_sub(shared.active);
            let take = free.min(shared.waiting.len());
            let batch: Vec<Job> = shared.waiting.drain(..take).collect();
            shared.active += batch.len();
            batch
        };

        if batch.is_empty() {
            return;
        }

        debug!(batch_size = batch.len(), "dispatching batch");
        for job in batch {
            let queue = self.clone();
            tokio::spawn(async move { queue.run_job(job).await });
        }
    }

    async fn run_job(self, job: Job) {
        if self.inner.lock().state == QueueState::Stopped {
            debug!(job_id = %job.id, "queue stopped before dispatch, skipping job");
            return;
        }

        let processor = self.inner.processor.clone();
        let dispatched = job.clone();
        let outcome = match tokio::spawn(async move { processor.process(dispatched).await }).await
        {
            Ok(result) => result,
            Err(join_error) => {
                Err(DeliveryError::processor_panicked(job.id.as_str(), join_error.to_string()))
            },
        };

        self.settle(job, outcome);
    }

    fn settle(&self, mut job: Job, outcome: Result<()>) {
        let mut shared = self.inner.lock();
        shared.active = shared.active.saturating_sub(1);

        match outcome {
            Ok(()) => {
                drop(shared);
                debug!(job_id = %job.id, retry_count = job.retry_count, "job processed");
                self.inner.emit(QueueEvent::Processed { job });
            },
            Err(error) if shared.state == QueueState::Stopped => {
                debug!(job_id = %job.id, error = %error, "queue stopped, not retrying failed job");
            },
            Err(error) => {
                job.retry_count += 1;
                job.last_attempt_at = Some(self.inner.now());

                if job.retry_count <= self.inner.config.max_retries {
                    let delay = self.inner.config.retry_delay_for(job.retry_count);
                    warn!(
                        job_id = %job.id,
                        retry_count = job.retry_count,
                        max_retries = self.inner.config.max_retries,
                        delay_ms = millis(delay),
                        category = %ErrorCategory::from(&error),
                        error = %error,
                        "job failed, scheduling retry"
                    );

                    let timer_id = shared.next_timer_id;
                    shared.next_timer_id += 1;
                    let timer = self.spawn_retry_timer(timer_id, job, delay);
                    shared.retry_timers.insert(timer_id, timer);
                } else {
                    drop(shared);
                    error!(
                        job_id = %job.id,
                        retry_count = job.retry_count,
                        error = %error,
                        "job exhausted queue retries"
                    );
                    self.inner.emit(QueueEvent::Failed { job, reason: error.to_string() });
                }
            },
        }
    }

    fn spawn_retry_timer(&self, timer_id: u64, job: Job, delay: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(inner) = weak.upgrade() {
                        PriorityQueue { inner }.readmit(timer_id, job);
                    }
                }
            }
        })
    }

    fn readmit(&self, timer_id: u64, job: Job) {
        {
            let mut shared = self.inner.lock();
            shared.retry_timers.remove(&timer_id);
            if shared.state != QueueState::Processing {
                return;
            }
            insert_by_priority(&mut shared.waiting, job.clone());
        }

        debug!(job_id = %job.id, retry_count = job.retry_count, "job requeued");
        self.inner.emit(QueueEvent::Requeued { job });
    }
}

/// Inserts after every job of equal or higher priority.
fn insert_by_priority(waiting: &mut Vec<Job>, job: Job) {
    let position = waiting.partition_point(|queued| queued.priority <= job.priority);
    waiting.insert(position, job);
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use courier_core::{Message, TestClock};

    use super::*;

    fn spec(id: &str, priority: Priority) -> JobSpec {
        JobSpec::new(id, Message::new("r@example.com", "s", "b")).with_priority(priority)
    }

    fn job(id: &str, priority: Priority) -> Job {
        Job::new(spec(id, priority), Utc::now())
    }

    fn ids(jobs: &[Job]) -> Vec<&str> {
        jobs.iter().map(|job| job.id.as_str()).collect()
    }

    fn queue_with(config: QueueConfig) -> (PriorityQueue, mpsc::UnboundedReceiver<QueueEvent>) {
        let processor: Arc<dyn JobProcessor> =
            Arc::new(|_job: Job| async { Ok::<(), DeliveryError>(()) });
        PriorityQueue::new(config, processor, Arc::new(TestClock::new()))
    }

    fn idle_queue() -> (PriorityQueue, mpsc::UnboundedReceiver<QueueEvent>) {
        queue_with(QueueConfig::default())
    }

    #[test]
    fn insert_keeps_priority_order_with_fifo_ties() {
        let mut waiting = Vec::new();
        insert_by_priority(&mut waiting, job("n1", Priority::Normal));
        insert_by_priority(&mut waiting, job("l1", Priority::Low));
        insert_by_priority(&mut waiting, job("h1", Priority::High));
        insert_by_priority(&mut waiting, job("n2", Priority::Normal));
        insert_by_priority(&mut waiting, job("h2", Priority::High));

        assert_eq!(ids(&waiting), vec!["h1", "h2", "n1", "n2", "l1"]);
    }

    #[test]
    fn retry_delay_doubles_per_failure() {
        let config = QueueConfig { retry_delay: Duration::from_millis(500), ..Default::default() };

        assert_eq!(config.retry_delay_for(1), Duration::from_millis(500));
        assert_eq!(config.retry_delay_for(2), Duration::from_millis(1_000));
        assert_eq!(config.retry_delay_for(3), Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_reports_waiting_count_and_starts_processing() {
        let (queue, mut events) = idle_queue();
        assert_eq!(queue.state(), QueueState::Idle);

        assert_eq!(queue.enqueue(spec("a", Priority::Normal)), 1);
        assert_eq!(queue.enqueue(spec("b", Priority::Low)), 2);
        assert_eq!(queue.state(), QueueState::Processing);

        let first = events.recv().await.unwrap();
        assert_eq!(
            first,
            QueueEvent::Enqueued { job_id: "a".into(), priority: Priority::Normal, waiting: 1 }
        );

        queue.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn reprioritize_applies_at_next_tick() {
        let (queue, _events) = queue_with(QueueConfig { max_concurrent: 1, ..Default::default() });
        queue.enqueue(spec("a", Priority::Low));
        queue.enqueue(spec("b", Priority::Low));

        assert!(queue.reprioritize(&"b".into(), Priority::High));
        assert!(!queue.reprioritize(&"missing".into(), Priority::High));

        queue.tick();
        assert_eq!(queue.active(), 1);
        assert_eq!(ids(&queue.inner.lock().waiting), vec!["a"]);

        queue.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_selected_before_stop_never_reach_the_processor() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let processor: Arc<dyn JobProcessor> = Arc::new(move |_job: Job| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), DeliveryError>(()) }
        });
        let (queue, _events) =
            PriorityQueue::new(QueueConfig::default(), processor, Arc::new(TestClock::new()));
        queue.enqueue(spec("a", Priority::Normal));
        queue.enqueue(spec("b", Priority::Normal));

        queue.tick();
        queue.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_rejects_enqueue() {
        let (queue, _events) = idle_queue();
        queue.enqueue(spec("a", Priority::Normal));

        queue.stop();
        queue.stop();

        assert_eq!(queue.state(), QueueState::Stopped);
        assert_eq!(queue.stats(), QueueStats::default());
        assert_eq!(queue.enqueue(spec("b", Priority::High)), 0);
    }
}
