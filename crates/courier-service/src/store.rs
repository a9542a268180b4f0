//! Delivery status, duplicate tracking, and per-recipient rate limiting.
//!
//! [`DeliveryStore`] is the boundary to whatever persists submission state.
//! [`MemoryStore`] keeps it in process, which is all the pipeline needs when
//! durability is not required.
//!
//! # Rate-limit contract
//!
//! `is_rate_limited` is side-effecting. With a spacing of
//! `60s / per_minute`:
//!
//! - first check for a recipient records "now" and returns `false`
//! - a check less than one spacing after the recorded time returns `true`
//!   and leaves the record alone
//! - any later check returns `false` and moves the record to "now"
//!
//! Every successful check therefore consumes the recipient's slot, whether or
//! not a message is sent afterwards.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use courier_core::{Clock, DeliveryStatus, JobId, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Per-recipient admission rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sends allowed per recipient per minute.
    pub per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { per_minute: 5 }
    }
}

impl RateLimitConfig {
    /// Minimum time between two admitted sends to the same recipient.
    pub fn spacing(&self) -> Duration {
        Duration::from_secs(60) / self.per_minute.max(1)
    }
}

/// Storage boundary for submission state.
#[async_trait]
pub trait DeliveryStore: Send + Sync + fmt::Debug {
    /// Whether a status was ever recorded for `id`.
    async fn is_duplicate(&self, id: &JobId) -> Result<bool>;

    /// Side-effecting rate-limit check for `recipient`; see the module docs.
    async fn is_rate_limited(&self, recipient: &str) -> Result<bool>;

    /// Records `status` as the current status of `id`.
    async fn mark_sent(&self, id: &JobId, status: DeliveryStatus) -> Result<()>;

    /// Current status of `id`, if any was recorded.
    async fn status(&self, id: &JobId) -> Result<Option<DeliveryStatus>>;

    /// Drops the status of `id` and its seen mark.
    async fn forget(&self, id: &JobId) -> Result<()>;
}

#[derive(Debug, Default)]
struct StoreState {
    seen: HashSet<JobId>,
    status_of: HashMap<JobId, DeliveryStatus>,
    last_sent_at: HashMap<String, Instant>,
}

/// In-process [`DeliveryStore`].
#[derive(Debug)]
pub struct MemoryStore {
    rate_limit: RateLimitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new(rate_limit: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self { rate_limit, clock, state: Mutex::new(StoreState::default()) }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DeliveryStore for MemoryStore {
    async fn is_duplicate(&self, id: &JobId) -> Result<bool> {
        Ok(self.state().seen.contains(id))
    }

    async fn is_rate_limited(&self, recipient: &str) -> Result<bool> {
        let now = self.clock.now();
        let spacing = self.rate_limit.spacing();
        let mut state = self.state();

        if let Some(last) = state.last_sent_at.get(recipient) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < spacing {
                debug!(
                    recipient,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "recipient rate limited"
                );
                return Ok(true);
            }
        }

        state.last_sent_at.insert(recipient.to_string(), now);
        Ok(false)
    }

    async fn mark_sent(&self, id: &JobId, status: DeliveryStatus) -> Result<()> {
        let mut state = self.state();
        state.seen.insert(id.clone());
        state.status_of.insert(id.clone(), status);
        Ok(())
    }

    async fn status(&self, id: &JobId) -> Result<Option<DeliveryStatus>> {
        Ok(self.state().status_of.get(id).cloned())
    }

    async fn forget(&self, id: &JobId) -> Result<()> {
        let mut state = self.state();
        state.seen.remove(id);
        state.status_of.remove(id);
        Ok(())
    }
}
