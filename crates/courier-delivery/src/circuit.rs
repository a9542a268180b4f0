//! Circuit breaker for backend failure protection.
//!
//! One breaker guards one backend. It counts failures and reports itself
//! open while the count is at or above the threshold and the most recent
//! failure is younger than the cooldown:
//!
//! ```text
//!   record_failure ──▶ failure_count += 1, last_failure_at = now
//!   record_success ──▶ failure_count  = 0
//!
//!   is_open = failure_count >= threshold
//!             && now - last_failure_at < cooldown
//! ```
//!
//! The open/closed state is never stored. When the cooldown passes the breaker
//! reads closed again, but the failure count is left as is: the next failure
//! reopens it straight away. Only a success clears the count.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use courier_core::RealClock;
//! use courier_delivery::circuit::{CircuitBreaker, CircuitConfig};
//!
//! let breaker = CircuitBreaker::new("primary", CircuitConfig::default(), Arc::new(RealClock));
//!
//! if !breaker.is_open() {
//!     let send_result: Result<(), &str> = Err("timeout");
//!     match send_result {
//!         Ok(()) => breaker.record_success(),
//!         Err(_) => breaker.record_failure(),
//!     }
//! }
//! assert_eq!(breaker.stats().failure_count, 1);
//! ```

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use courier_core::Clock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Circuit breaker thresholds shared by all backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Failures, without an intervening success, that open the circuit.
    pub failure_threshold: u32,
    /// How long after the latest failure an over-threshold circuit stays open.
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self { failure_threshold: 3, cooldown: Duration::from_secs(10) }
    }
}

/// Derived view of a breaker, for reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests go through.
    Closed,
    /// Requests are skipped until the cooldown passes.
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Snapshot of a breaker's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitStats {
    /// Backend the breaker guards.
    pub name: String,
    /// Failures since the last success.
    pub failure_count: u32,
    /// Total successes recorded since startup.
    pub success_count: u64,
    /// When the most recent failure was recorded.
    pub last_failure_at: Option<Instant>,
    /// State at the time of the snapshot.
    pub state: CircuitState,
}

#[derive(Debug, Default)]
struct BreakerCounters {
    failure_count: u32,
    success_count: u64,
    last_failure_at: Option<Instant>,
}

/// Thread-safe circuit breaker for a single backend.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    counters: Mutex<BreakerCounters>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for the named backend.
    pub fn new(name: impl Into<String>, config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self { name: name.into(), config, clock, counters: Mutex::new(BreakerCounters::default()) }
    }

    /// Name of the guarded backend.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` when the backend should be skipped.
    pub fn is_open(&self) -> bool {
        let counters = self.counters();
        self.open_with(&counters)
    }

    /// Records a failed attempt and stamps the failure time.
    pub fn record_failure(&self) {
        let mut counters = self.counters();
        let was_open = self.open_with(&counters);

        counters.failure_count = counters.failure_count.saturating_add(1);
        counters.last_failure_at = Some(self.clock.now());

        if !was_open && self.open_with(&counters) {
            warn!(
                backend = %self.name,
                failures = counters.failure_count,
                cooldown_ms = u64::try_from(self.config.cooldown.as_millis()).unwrap_or(u64::MAX),
                "circuit breaker opening"
            );
        }
    }

    /// Records a successful attempt and clears the failure count.
    ///
    /// The last failure time is kept.
    pub fn record_success(&self) {
        let mut counters = self.counters();
        if counters.failure_count > 0 {
            info!(
                backend = %self.name,
                cleared_failures = counters.failure_count,
                "circuit breaker reset after success"
            );
        }
        counters.failure_count = 0;
        counters.success_count = counters.success_count.saturating_add(1);
    }

    /// Returns a snapshot of the breaker's counters.
    pub fn stats(&self) -> CircuitStats {
        let counters = self.counters();
        let state =
            if self.open_with(&counters) { CircuitState::Open } else { CircuitState::Closed };

        CircuitStats {
            name: self.name.clone(),
            failure_count: counters.failure_count,
            success_count: counters.success_count,
            last_failure_at: counters.last_failure_at,
            state,
        }
    }

    fn open_with(&self, counters: &BreakerCounters) -> bool {
        if counters.failure_count < self.config.failure_threshold {
            return false;
        }

        counters.last_failure_at.is_some_and(|failed_at| {
            self.clock.now().saturating_duration_since(failed_at) < self.config.cooldown
        })
    }

    fn counters(&self) -> MutexGuard<'_, BreakerCounters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
