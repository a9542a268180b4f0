//! Time abstractions for testable timing operations.
//!
//! Circuit breakers, the rate limiter, and per-attempt retry backoff read time
//! through [`Clock`] so tests can drive them without real waiting.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// Clock abstraction for time operations.
///
/// Production code uses `RealClock`, tests inject `TestClock`.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant for duration measurements.
    fn now(&self) -> Instant;

    /// Returns the current system time for timestamps.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the specified duration.
    ///
    /// In production this maps to `tokio::time::sleep`, in tests this
    /// advances virtual time immediately.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real clock backed by system time and tokio's timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test clock for deterministic time control.
///
/// Clones share the same underlying time, so a clock handed to a component
/// can be advanced from the test body.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Monotonic time in nanoseconds since creation
    monotonic_ns: Arc<AtomicU64>,
    /// System time as nanoseconds since UNIX_EPOCH
    system_ns: Arc<AtomicU64>,
    /// Base instant for monotonic time calculations
    base_instant: Instant,
    /// Total time spent in `sleep`, for asserting backoff schedules
    slept_ns: Arc<AtomicU64>,
}

impl TestClock {
    /// Creates a new test clock starting at the current time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a test clock starting at a specific system time.
    pub fn with_start_time(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();

        Self {
            monotonic_ns: Arc::new(AtomicU64::new(0)),
            system_ns: Arc::new(AtomicU64::new(saturating_nanos(since_epoch))),
            base_instant: Instant::now(),
            slept_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advances both clocks by the specified duration.
    pub fn advance(&self, duration: Duration) {
        let duration_ns = saturating_nanos(duration);
        self.monotonic_ns.fetch_add(duration_ns, Ordering::AcqRel);
        self.system_ns.fetch_add(duration_ns, Ordering::AcqRel);
    }

    /// Returns elapsed virtual time since clock creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.monotonic_ns.load(Ordering::Acquire))
    }

    /// Returns the total virtual time spent sleeping.
    pub fn total_slept(&self) -> Duration {
        Duration::from_nanos(self.slept_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.system_ns.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.slept_ns.fetch_add(saturating_nanos(duration), Ordering::AcqRel);
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
