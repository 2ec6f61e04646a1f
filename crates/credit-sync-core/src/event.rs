//! Change events pushed by the remote record feed.

use serde::{Deserialize, Serialize};

use crate::{CoreError, SubscriptionRecord, UserId};

/// A remote mutation of one user's subscription record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The user whose record changed.
    pub user_id: UserId,

    /// What happened to the record.
    #[serde(flatten)]
    pub kind: ChangeKind,
}

/// The kind of change, carrying the snapshots the backend sent along.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeKind {
    /// A record was created (subscription started).
    Inserted {
        /// The new record.
        new: SubscriptionRecord,
    },
    /// An existing record changed.
    Updated {
        /// The record before the change, when the backend provides it.
        old: Option<SubscriptionRecord>,
        /// The record after the change.
        new: SubscriptionRecord,
    },
    /// The record was removed (subscription cancelled).
    Deleted {
        /// The record before removal, when the backend provides it.
        old: Option<SubscriptionRecord>,
    },
}

impl ChangeEvent {
    /// Build an insert event.
    #[must_use]
    pub fn inserted(new: SubscriptionRecord) -> Self {
        Self {
            user_id: new.user_id,
            kind: ChangeKind::Inserted { new },
        }
    }

    /// Build an update event.
    #[must_use]
    pub fn updated(old: Option<SubscriptionRecord>, new: SubscriptionRecord) -> Self {
        Self {
            user_id: new.user_id,
            kind: ChangeKind::Updated { old, new },
        }
    }

    /// Build a delete event for `user_id`.
    #[must_use]
    pub fn deleted(user_id: UserId, old: Option<SubscriptionRecord>) -> Self {
        Self {
            user_id,
            kind: ChangeKind::Deleted { old },
        }
    }

    /// The snapshot after the change, if the record still exists.
    #[must_use]
    pub fn new_snapshot(&self) -> Option<&SubscriptionRecord> {
        match &self.kind {
            ChangeKind::Inserted { new } | ChangeKind::Updated { new, .. } => Some(new),
            ChangeKind::Deleted { .. } => None,
        }
    }

    /// Short name of the change kind for logging.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self.kind {
            ChangeKind::Inserted { .. } => "inserted",
            ChangeKind::Updated { .. } => "updated",
            ChangeKind::Deleted { .. } => "deleted",
        }
    }

    /// Check that every snapshot belongs to the user the event is scoped to.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::MismatchedUser` on the first foreign snapshot.
    pub fn validate(&self) -> Result<(), CoreError> {
        let snapshots = match &self.kind {
            ChangeKind::Inserted { new } => [Some(new), None],
            ChangeKind::Updated { old, new } => [Some(new), old.as_ref()],
            ChangeKind::Deleted { old } => [old.as_ref(), None],
        };
        for snapshot in snapshots.into_iter().flatten() {
            if snapshot.user_id != self.user_id {
                return Err(CoreError::MismatchedUser {
                    event: self.user_id.to_string(),
                    snapshot: snapshot.user_id.to_string(),
                });
            }
        }
        Ok(())
    }
}
