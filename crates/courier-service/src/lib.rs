//! Courier dispatch service.
//!
//! Accepts submissions, applies duplicate and per-recipient rate-limit
//! checks, and drives accepted jobs through the delivery engine while
//! recording and pushing every status change.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod notify;
pub mod service;
pub mod store;

pub use config::{BackendConfig, Config};
pub use notify::{StatusNotifier, StatusSubscription};
pub use service::DispatchService;
pub use store::{DeliveryStore, MemoryStore, RateLimitConfig};
