//! Test doubles and fixtures for deterministic pipeline tests.
//!
//! Provides scripted backends, a recording job processor, and submission
//! builders. Combined with paused Tokio time and [`TestClock`], these make
//! queue timing, failover order, and breaker behavior reproducible.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod backend;
pub mod fixtures;
pub mod processor;

pub use backend::{Reply, ScriptedBackend};
pub use courier_core::TestClock;
pub use fixtures::{message, SubmissionBuilder};
pub use processor::RecordingProcessor;
