//! Core domain models and event types.
//!
//! Provides strongly-typed job primitives, queue events, status updates, the
//! clock abstraction, and error handling shared by the delivery pipeline. The
//! delivery and service crates depend on these types for consistency.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{QueueEvent, StatusUpdate};
pub use models::{DeliveryStatus, Job, JobId, JobSpec, Message, Priority, SubmitOutcome};
pub use time::{Clock, RealClock, TestClock};
