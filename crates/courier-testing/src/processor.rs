//! Job processor double that records what the queue hands it.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use courier_core::{Job, JobId};
use courier_delivery::{DeliveryError, JobProcessor, Result};

/// Records dispatch order and in-flight concurrency.
///
/// Each call waits `latency` on Tokio time, so under a paused runtime the
/// job stays in flight until the test advances the clock. Jobs registered
/// with [`RecordingProcessor::fail_times`] fail that many rounds first.
#[derive(Debug, Default)]
pub struct RecordingProcessor {
    latency: Duration,
    failures: Mutex<HashMap<JobId, u32>>,
    dispatched: Mutex<Vec<Job>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingProcessor {
    /// Processor that completes immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Processor that holds each job for `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency, ..Self::default() }
    }

    /// Makes the job with this id fail its next `rounds` processing rounds.
    #[must_use]
    pub fn fail_times(self, job_id: impl Into<JobId>, rounds: u32) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.into(), rounds);
        self
    }

    /// Ids of every dispatched job, in dispatch order. Retries appear again.
    pub fn dispatched_ids(&self) -> Vec<String> {
        self.dispatched().iter().map(|job| job.id.to_string()).collect()
    }

    /// Every job as handed over by the queue, in dispatch order.
    pub fn dispatched(&self) -> Vec<Job> {
        self.dispatched.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Highest number of jobs observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobProcessor for RecordingProcessor {
    async fn process(&self, job: Job) -> Result<()> {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        self.dispatched.lock().unwrap_or_else(PoisonError::into_inner).push(job.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let should_fail = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            match failures.get_mut(&job.id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                },
                _ => false,
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if should_fail {
            Err(DeliveryError::all_backends_exhausted(1, 0))
        } else {
            Ok(())
        }
    }
}
