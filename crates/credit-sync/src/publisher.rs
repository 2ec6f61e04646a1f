//! Cross-context publisher.
//!
//! The publisher is a single-writer broadcast cell holding the latest replica
//! snapshot. Readers in other tasks or threads, including ones that cannot
//! await, call [`ReplicaReader::latest`]; async readers can wait for changes.
//! There is no history: a reader only ever sees the most recent snapshot.

use std::sync::{Arc, OnceLock};

use futures::Stream;
use tokio::sync::watch;

use credit_sync_core::Replica;

/// Writer side of the replica cell.
#[derive(Clone)]
pub struct Publisher {
    sender: Arc<watch::Sender<Replica>>,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("latest", &*self.sender.borrow())
            .field("readers", &self.sender.receiver_count())
            .finish()
    }
}

impl Publisher {
    /// Create a cell holding the process-start defaults.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Replica::default());
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Overwrite the cell. Readers are only woken when the value changed.
    pub fn publish(&self, replica: Replica) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == replica {
                false
            } else {
                *current = replica;
                true
            }
        });
        if changed {
            tracing::trace!(
                credits = replica.credits,
                language = %replica.preferred_language,
                initialized = replica.is_initialized,
                "Replica published"
            );
        }
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn latest(&self) -> Replica {
        *self.sender.borrow()
    }

    /// Create a new reader.
    #[must_use]
    pub fn reader(&self) -> ReplicaReader {
        ReplicaReader {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Read side of the replica cell. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct ReplicaReader {
    receiver: watch::Receiver<Replica>,
}

impl ReplicaReader {
    /// Latest published snapshot, without waiting.
    #[must_use]
    pub fn latest(&self) -> Replica {
        *self.receiver.borrow()
    }

    /// Wait for the next change and return it. `None` once the publisher is gone.
    pub async fn changed(&mut self) -> Option<Replica> {
        self.receiver.changed().await.ok()?;
        Some(*self.receiver.borrow_and_update())
    }

    /// Wait until the replica is initialized. `None` once the publisher is gone.
    pub async fn wait_initialized(&mut self) -> Option<Replica> {
        self.receiver
            .wait_for(|replica| replica.is_initialized)
            .await
            .ok()
            .map(|replica| *replica)
    }

    /// Stream of snapshots, starting with the current one.
    pub fn into_stream(mut self) -> impl Stream<Item = Replica> {
        self.receiver.mark_changed();
        futures::stream::unfold(self, |mut reader| async move {
            let replica = reader.changed().await?;
            Some((replica, reader))
        })
    }
}

/// The process-wide cell, created with defaults on first use.
pub fn global() -> &'static Publisher {
    static GLOBAL: OnceLock<Publisher> = OnceLock::new();
    GLOBAL.get_or_init(Publisher::new)
}
