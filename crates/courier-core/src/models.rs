//! Core domain models and strongly-typed identifiers.
//!
//! Defines jobs, their priorities, the messages carried to backends, and the
//! human-readable delivery statuses recorded for every submission.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// Caller-assigned job identifier.
///
/// Uniqueness is enforced at submission time by the dedup store, not by this
/// type.
///
/// # Example
///
/// ```
/// use courier_core::models::JobId;
/// let id = JobId::from("order-42");
/// assert_eq!(id.as_str(), "order-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Dispatch priority. Lower sorts first: `High < Normal < Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Dispatched ahead of everything else.
    High,
    /// Default priority.
    #[default]
    Normal,
    /// Dispatched only when no higher priority work is waiting.
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl FromStr for Priority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(CoreError::InvalidInput(format!("unknown priority '{other}'"))),
        }
    }
}

/// Payload handed to a delivery backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Destination address.
    pub recipient: String,
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
}

impl Message {
    /// Creates a new message.
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self { recipient: recipient.into(), subject: subject.into(), body: body.into() }
    }
}

/// Everything a caller supplies to enqueue a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Caller-assigned identifier.
    pub id: JobId,
    /// Message to deliver.
    #[serde(flatten)]
    pub message: Message,
    /// Dispatch priority.
    #[serde(default)]
    pub priority: Priority,
}

impl JobSpec {
    /// Creates a job spec with normal priority.
    pub fn new(id: impl Into<JobId>, message: Message) -> Self {
        Self { id: id.into(), message, priority: Priority::Normal }
    }

    /// Sets the dispatch priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// A job owned by the priority queue.
///
/// `retry_count` only grows, and only through the queue's failure handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Caller-assigned identifier.
    pub id: JobId,
    /// Message to deliver.
    pub message: Message,
    /// Dispatch priority.
    pub priority: Priority,
    /// Number of failed processing rounds so far.
    pub retry_count: u32,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the job last failed processing.
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Builds a fresh job from a spec.
    pub fn new(spec: JobSpec, created_at: DateTime<Utc>) -> Self {
        Self {
            id: spec.id,
            message: spec.message,
            priority: spec.priority,
            retry_count: 0,
            created_at,
            last_attempt_at: None,
        }
    }
}

/// Delivery status recorded for a submission.
///
/// The `Display` form is the externally visible status string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    /// Accepted and waiting in the queue.
    Queued,
    /// Picked up by a processing tick.
    Processing,
    /// Delivered by the named backend.
    Sent {
        /// Name of the backend that accepted the message
        backend: String,
    },
    /// Every backend was skipped or failed in this round; the queue may retry.
    AllProvidersFailed,
    /// Queue-level retries are exhausted.
    FailedInQueue,
}

impl DeliveryStatus {
    /// Returns whether no further status change will follow.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent { .. } | Self::FailedInQueue)
    }
}

const SENT_PREFIX: &str = "Sent via ";

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "Queued"),
            Self::Processing => write!(f, "Processing"),
            Self::Sent { backend } => write!(f, "{SENT_PREFIX}{backend}"),
            Self::AllProvidersFailed => write!(f, "All providers failed"),
            Self::FailedInQueue => write!(f, "Failed in queue"),
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Queued" => Ok(Self::Queued),
            "Processing" => Ok(Self::Processing),
            "All providers failed" => Ok(Self::AllProvidersFailed),
            "Failed in queue" => Ok(Self::FailedInQueue),
            other => other
                .strip_prefix(SENT_PREFIX)
                .filter(|backend| !backend.is_empty())
                .map(|backend| Self::Sent { backend: backend.to_string() })
                .ok_or_else(|| CoreError::InvalidInput(format!("unknown status '{other}'"))),
        }
    }
}

impl Serialize for DeliveryStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeliveryStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Synchronous answer to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Accepted and enqueued.
    Queued,
    /// The id was seen before; nothing happened.
    Duplicate,
    /// The recipient is inside its rate-limit window; nothing was enqueued.
    RateLimited,
}

impl fmt::Display for SubmitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::RateLimited => write!(f, "rate_limited"),
        }
    }
}
