//! Delivery backend capability.
//!
//! A backend is anything that can hand a message to its recipient: an SMTP
//! relay, a vendor API, a push gateway. The pipeline only needs `send`, and
//! treats intermittent failures as normal.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use courier_core::{Clock, Message};
use rand::Rng;
use tracing::{debug, info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// A destination-facing delivery channel.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Stable name used in logs, breaker stats, and `Sent via` statuses.
    fn name(&self) -> &str;

    /// Attempts one delivery of `message`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Backend` when the backend did not accept the
    /// message.
    async fn send(&self, message: &Message) -> Result<()>;
}

/// Backend that simulates an unreliable provider.
///
/// Each send waits `latency` on the injected clock and then fails with
/// probability `failure_rate`.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    name: String,
    failure_rate: f64,
    latency: Duration,
    clock: Arc<dyn Clock>,
}

impl SimulatedBackend {
    /// Creates a simulated backend. `failure_rate` is clamped to `[0, 1]`.
    pub fn new(
        name: impl Into<String>,
        failure_rate: f64,
        latency: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let failure_rate = if failure_rate.is_nan() { 0.0 } else { failure_rate.clamp(0.0, 1.0) };
        Self { name: name.into(), failure_rate, latency, clock }
    }

    /// Probability that a single send fails.
    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }
}

#[async_trait]
impl Backend for SimulatedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let span = info_span!("simulated_send", backend = %self.name, recipient = %message.recipient);

        async move {
            if !self.latency.is_zero() {
                self.clock.sleep(self.latency).await;
            }

            let failed = rand::rng().random_bool(self.failure_rate);
            if failed {
                debug!("simulated send failed");
                return Err(DeliveryError::backend(&self.name, "simulated transient failure"));
            }

            debug!(subject = %message.subject, "simulated send accepted");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
