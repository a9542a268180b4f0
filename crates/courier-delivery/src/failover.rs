//! Ordered failover across delivery backends.
//!
//! The dispatcher walks its routes in configuration order. A route whose
//! breaker is open is skipped without calling the backend. Otherwise the
//! backend gets a full [`RetryPolicy`] budget; success ends the walk, an
//! exhausted budget counts as one breaker failure and moves on.
//!
//! ```text
//!   route 1 ──open──▶ skip
//!   route 2 ──retry(send)──err──▶ breaker.record_failure ──▶ next
//!   route 3 ──retry(send)──ok───▶ breaker.record_success ──▶ Sent via route 3
//!   (no routes left) ─────────────────────────────────────▶ AllBackendsExhausted
//! ```

use std::sync::Arc;

use courier_core::{Clock, Message};
use tracing::{debug, info, warn};

use crate::{
    backend::Backend,
    circuit::{CircuitBreaker, CircuitStats},
    error::{DeliveryError, ErrorCategory, Result},
    retry::RetryPolicy,
};

/// A backend paired with the breaker that guards it.
#[derive(Debug, Clone)]
pub struct Route {
    /// Backend to call.
    pub backend: Arc<dyn Backend>,
    /// Breaker dedicated to this backend.
    pub breaker: Arc<CircuitBreaker>,
}

impl Route {
    /// Pairs a backend with its breaker.
    pub fn new(backend: Arc<dyn Backend>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { backend, breaker }
    }
}

/// Successful dispatch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// Name of the backend that accepted the message.
    pub backend: String,
    /// Calls made against that backend, including the successful one.
    pub attempts: u32,
}

/// Walks backends in order until one accepts the message.
#[derive(Debug, Clone)]
pub struct FailoverDispatcher {
    routes: Vec<Route>,
    retry_policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl FailoverDispatcher {
    /// Creates a dispatcher over `routes`, tried in the given order.
    pub fn new(routes: Vec<Route>, retry_policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { routes, retry_policy, clock }
    }

    /// Routes in dispatch order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Per-attempt retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Snapshot of every route's breaker, in dispatch order.
    pub fn circuit_stats(&self) -> Vec<CircuitStats> {
        self.routes.iter().map(|route| route.breaker.stats()).collect()
    }

    /// Delivers `message` through the first backend that accepts it.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::AllBackendsExhausted` when every route was
    /// skipped or failed.
    pub async fn dispatch(&self, message: &Message) -> Result<DispatchReceipt> {
        let mut skipped = 0;
        let mut failed = 0;

        for route in &self.routes {
            let backend: &dyn Backend = route.backend.as_ref();
            let backend_name = backend.name();

            if route.breaker.is_open() {
                debug!(backend = %backend_name, "circuit open, skipping backend");
                skipped += 1;
                continue;
            }

            let mut attempts = 0_u32;
            let outcome = self
                .retry_policy
                .retry(self.clock.as_ref(), || {
                    attempts += 1;
                    backend.send(message)
                })
                .await;

            match outcome {
                Ok(()) => {
                    route.breaker.record_success();
                    info!(backend = %backend_name, attempts, "message delivered");
                    return Ok(DispatchReceipt { backend: backend_name.to_string(), attempts });
                },
                Err(error) => {
                    route.breaker.record_failure();
                    failed += 1;
                    warn!(
                        backend = %backend_name,
                        attempts,
                        category = %ErrorCategory::from(&error),
                        error = %error,
                        "backend exhausted its retries, failing over"
                    );
                },
            }
        }

        Err(DeliveryError::all_backends_exhausted(failed, skipped))
    }
}
