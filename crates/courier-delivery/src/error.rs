//! Error types for delivery operations.
//!
//! Covers single backend send failures, the failover dispatcher running out
//! of backends, and processor failures observed by the queue. Errors carry
//! enough context to log the failing backend or job.

use std::fmt;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error conditions raised while delivering a job.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// A single `send` call on a backend failed.
    #[error("backend {backend} failed: {message}")]
    Backend {
        /// Name of the failing backend
        backend: String,
        /// Failure reason reported by the backend
        message: String,
    },

    /// Every backend was either skipped (breaker open) or failed.
    #[error("all backends exhausted ({failed} failed, {skipped} skipped)")]
    AllBackendsExhausted {
        /// Backends whose retry budget was used up
        failed: usize,
        /// Backends skipped because their breaker was open
        skipped: usize,
    },

    /// The job processor panicked instead of returning.
    #[error("processor panicked while handling job {job_id}: {message}")]
    ProcessorPanicked {
        /// Job being processed
        job_id: String,
        /// Panic or join error description
        message: String,
    },
}

impl DeliveryError {
    /// Creates a backend failure.
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend { backend: backend.into(), message: message.into() }
    }

    /// Creates an exhausted-failover error.
    pub fn all_backends_exhausted(failed: usize, skipped: usize) -> Self {
        Self::AllBackendsExhausted { failed, skipped }
    }

    /// Creates a processor panic error.
    pub fn processor_panicked(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProcessorPanicked { job_id: job_id.into(), message: message.into() }
    }
}

/// Category of delivery error for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A backend rejected or dropped a send.
    Backend,
    /// No backend could deliver.
    Exhausted,
    /// The processor itself broke.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::Backend { .. } => Self::Backend,
            DeliveryError::AllBackendsExhausted { .. } => Self::Exhausted,
            DeliveryError::ProcessorPanicked { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend => write!(f, "backend"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
