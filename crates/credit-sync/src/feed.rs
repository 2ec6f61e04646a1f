//! Change feed listener.
//!
//! One listener per identity session: it owns the gateway subscription and a
//! task draining its events into the state store.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use credit_sync_core::{ChangeEvent, UserId};
use credit_sync_gateway::{FeedHandle, RecordGateway};

use crate::error::{Result, SyncError};
use crate::store::{ApplyOutcome, SessionEpoch, StateStore};

/// A live change feed bound to one session.
pub struct FeedListener {
    user_id: UserId,
    handle: FeedHandle,
    task: JoinHandle<()>,
}

impl FeedListener {
    /// Subscribe to `user_id`'s changes and start applying them under `epoch`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::SubscriptionSetup` if the gateway refuses the feed.
    pub async fn start(
        gateway: &dyn RecordGateway,
        store: Arc<StateStore>,
        user_id: UserId,
        epoch: SessionEpoch,
    ) -> Result<Self> {
        let stream = gateway.subscribe_changes(&user_id).await.map_err(|e| {
            tracing::error!(%user_id, error = %e, "Change feed setup failed");
            SyncError::SubscriptionSetup(e.to_string())
        })?;

        let handle = stream.handle;
        let task = tokio::spawn(drain(stream.events, store, user_id, epoch));
        tracing::info!(%user_id, %handle, %epoch, "Change feed listening");

        Ok(Self {
            user_id,
            handle,
            task,
        })
    }

    /// The gateway handle of this feed.
    #[must_use]
    pub const fn handle(&self) -> FeedHandle {
        self.handle
    }

    /// Stop applying events, then release the gateway subscription.
    ///
    /// The drain task is aborted first so that nothing from this feed reaches
    /// the store once `stop` has been called.
    pub async fn stop(self, gateway: &dyn RecordGateway) {
        self.task.abort();
        if let Err(e) = gateway.unsubscribe(self.handle).await {
            tracing::warn!(user_id = %self.user_id, handle = %self.handle, error = %e, "Unsubscribe failed");
        } else {
            tracing::info!(user_id = %self.user_id, handle = %self.handle, "Change feed closed");
        }
    }
}

impl Drop for FeedListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drain(
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    store: Arc<StateStore>,
    user_id: UserId,
    epoch: SessionEpoch,
) {
    while let Some(event) = events.recv().await {
        if let Err(e) = event.validate() {
            tracing::warn!(%user_id, error = %e, "Ignoring malformed change event");
            continue;
        }

        match store.apply_change(epoch, &event) {
            ApplyOutcome::Applied => {
                tracing::debug!(%user_id, kind = event.kind_name(), replica = ?store.replica(), "Change applied");
            }
            ApplyOutcome::Unchanged => {
                tracing::trace!(%user_id, kind = event.kind_name(), "Change already reflected");
            }
            ApplyOutcome::Buffered => {
                tracing::debug!(%user_id, kind = event.kind_name(), "Change buffered until first read completes");
            }
            ApplyOutcome::Superseded => {
                tracing::debug!(%user_id, kind = event.kind_name(), "Change dropped, next read will reflect it");
            }
            ApplyOutcome::Stale => {
                tracing::warn!(%user_id, event_user = %event.user_id, %epoch, "Discarding change for inactive session");
            }
        }
    }
    tracing::debug!(%user_id, %epoch, "Change feed drained");
}
