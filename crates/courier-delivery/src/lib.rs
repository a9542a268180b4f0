//! Delivery engine for the courier notification pipeline.
//!
//! This crate owns everything between "a job was accepted" and "a backend
//! took the message": the priority queue that paces work, the failover
//! dispatcher that walks backends in order, the per-backend circuit breakers,
//! and the per-attempt retry policy.
//!
//! # Architecture
//!
//! Two independent retry layers are stacked:
//!
//! 1. **Queue retry** - a job whose processing failed is readmitted to the
//!    [`PriorityQueue`] after an exponential delay, up to `max_retries` times.
//! 2. **Send retry** - within one processing round, each backend gets a
//!    [`RetryPolicy`] budget of attempts before the [`FailoverDispatcher`]
//!    moves on to the next backend.
//!
//! The queue does not know about backends. It hands each job to a
//! [`JobProcessor`], and the service crate supplies a processor that records
//! status and calls the dispatcher.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use courier_core::{Job, JobSpec, Message, RealClock};
//! use courier_delivery::{DeliveryError, JobProcessor, PriorityQueue, QueueConfig};
//!
//! # async fn example() {
//! let processor: Arc<dyn JobProcessor> = Arc::new(|job: Job| async move {
//!     println!("delivering {}", job.id);
//!     Ok::<(), DeliveryError>(())
//! });
//! let (queue, _events) = PriorityQueue::new(QueueConfig::default(), processor, Arc::new(RealClock));
//!
//! queue.enqueue(JobSpec::new("welcome-1", Message::new("ada@example.com", "Hi", "Welcome")));
//! tokio::time::sleep(Duration::from_secs(2)).await;
//! queue.stop();
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod circuit;
pub mod error;
pub mod failover;
pub mod queue;
pub mod retry;

pub use backend::{Backend, SimulatedBackend};
pub use circuit::{CircuitBreaker, CircuitConfig, CircuitState, CircuitStats};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use failover::{DispatchReceipt, FailoverDispatcher, Route};
pub use queue::{JobProcessor, PriorityQueue, QueueConfig, QueueState, QueueStats};
pub use retry::RetryPolicy;

/// Default upper bound on jobs in flight.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Default number of queue-level readmissions per job.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default number of send attempts per backend per processing round.
pub const DEFAULT_SEND_ATTEMPTS: u32 = 3;
