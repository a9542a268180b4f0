//! Events emitted by the queue and the status channel.
//!
//! The queue reports lifecycle transitions as [`QueueEvent`]s over a channel
//! whose receiving end belongs to the orchestrator:
//!
//! ```text
//!   enqueue ──▶ Enqueued
//!                  │ tick
//!                  ▼
//!             processor ──ok──▶ Processed
//!                  │
//!                 err
//!                  ▼
//!     retry_count <= max ──delay──▶ Requeued ──▶ (next tick)
//!                  │
//!     retry_count >  max ─────────▶ Failed
//! ```
//!
//! Subscribers of a single job see [`StatusUpdate`]s instead.

use serde::{Deserialize, Serialize};

use crate::models::{DeliveryStatus, Job, JobId, Priority};

/// Lifecycle event emitted by the priority queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A job entered the wait list through `enqueue`.
    Enqueued {
        /// Identifier of the new job
        job_id: JobId,
        /// Priority it was enqueued with
        priority: Priority,
        /// Jobs waiting after the insert
        waiting: usize,
    },

    /// The processor reported success for a job.
    Processed {
        /// The job as it was dispatched
        job: Job,
    },

    /// A failed job re-entered the wait list after its backoff delay.
    Requeued {
        /// The job with its incremented retry count
        job: Job,
    },

    /// A job failed more often than the queue allows; it is dropped.
    Failed {
        /// The job with its final retry count
        job: Job,
        /// Error reported by the last processing round
        reason: String,
    },
}

impl QueueEvent {
    /// Identifier of the job the event concerns.
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. } => job_id,
            Self::Processed { job } | Self::Requeued { job } | Self::Failed { job, .. } => &job.id,
        }
    }

    /// Short name for logs and metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Processed { .. } => "processed",
            Self::Requeued { .. } => "requeued",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Status change pushed to subscribers of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Job whose status changed.
    pub id: JobId,
    /// The new status.
    pub status: DeliveryStatus,
}

impl StatusUpdate {
    /// Creates a status update.
    pub fn new(id: JobId, status: DeliveryStatus) -> Self {
        Self { id, status }
    }
}
