//! Status push channel.
//!
//! Every recorded status change is broadcast. A subscription filters the
//! broadcast down to one job id and starts with a replay of that job's
//! current status, so a late subscriber never misses where the job stands.
//! A subscription backed by a store re-reads the job's status after falling
//! behind the broadcast, so a lag never swallows the final status.

use std::sync::Arc;

use courier_core::{DeliveryStatus, JobId, StatusUpdate};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::store::DeliveryStore;

const CHANNEL_CAPACITY: usize = 1024;

/// Fan-out of status updates to subscribers.
#[derive(Debug, Clone)]
pub struct StatusNotifier {
    sender: broadcast::Sender<StatusUpdate>,
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusNotifier {
    /// Creates a notifier with no subscribers.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Pushes an update to every live subscription.
    pub fn notify(&self, update: StatusUpdate) {
        if self.sender.send(update).is_err() {
            debug!("no status subscribers");
        }
    }

    /// Subscribes to updates for `id`.
    ///
    /// Subscribe before reading the current status from the store, then hand
    /// it to [`StatusSubscription::with_replay`], so that no change made in
    /// between is lost.
    pub fn subscribe(&self, id: JobId) -> StatusSubscription {
        StatusSubscription {
            id,
            replay: None,
            last: None,
            store: None,
            receiver: self.sender.subscribe(),
        }
    }
}

/// Stream of status updates for one job.
#[derive(Debug)]
pub struct StatusSubscription {
    id: JobId,
    replay: Option<DeliveryStatus>,
    last: Option<DeliveryStatus>,
    store: Option<Arc<dyn DeliveryStore>>,
    receiver: broadcast::Receiver<StatusUpdate>,
}

impl StatusSubscription {
    /// Sets the status delivered before any broadcast update.
    #[must_use]
    pub fn with_replay(mut self, current: Option<DeliveryStatus>) -> Self {
        self.replay = current;
        self
    }

    /// Sets the store consulted when the subscription lags behind.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DeliveryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Job this subscription follows.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Waits for the next status of this job.
    ///
    /// An update identical to the one delivered just before it is skipped,
    /// which hides the overlap between the replay and the live stream.
    /// After a lag the current status is read back from the store and
    /// delivered if it differs from the last one.
    /// Returns `None` once the notifier is gone.
    pub async fn next(&mut self) -> Option<StatusUpdate> {
        if let Some(status) = self.replay.take() {
            self.last = Some(status.clone());
            return Some(StatusUpdate::new(self.id.clone(), status));
        }

        loop {
            match self.receiver.recv().await {
                Ok(update) if update.id != self.id => continue,
                Ok(update) if self.last.as_ref() == Some(&update.status) => continue,
                Ok(update) => {
                    self.last = Some(update.status.clone());
                    return Some(update);
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(job_id = %self.id, skipped, "status subscriber lagged");
                    if let Some(status) = self.recover().await {
                        self.last = Some(status.clone());
                        return Some(StatusUpdate::new(self.id.clone(), status));
                    }
                },
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Skips the buffered backlog and reads the current status.
    ///
    /// The receiver is moved to the tail before the read, so anything newer
    /// than the stored status still arrives on the live stream.
    async fn recover(&mut self) -> Option<DeliveryStatus> {
        let store = self.store.as_ref()?;
        self.receiver = self.receiver.resubscribe();

        match store.status(&self.id).await {
            Ok(current) if current != self.last => current,
            Ok(_) => None,
            Err(e) => {
                warn!(job_id = %self.id, error = %e, "failed to read status after lag");
                None
            },
        }
    }
}
