//! The local replica of a subscription record.

use serde::{Deserialize, Serialize};

use crate::{ChangeEvent, ChangeKind, Language, SubscriptionRecord};

/// Credits granted to a signed-in user that has no subscription record.
pub const TRIAL_CREDITS: u32 = 1;

/// In-process view of one user's subscription record plus a readiness flag.
///
/// Consumers never mutate a replica; they read snapshots published by the
/// sync runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replica {
    /// Whether a subscription record exists.
    pub is_subscribed: bool,

    /// Remaining credits.
    pub credits: u32,

    /// Preferred output language.
    pub preferred_language: Language,

    /// Whether the first authoritative read for the current identity completed.
    pub is_initialized: bool,
}

impl Default for Replica {
    /// Process-start values: nothing known yet.
    fn default() -> Self {
        Self {
            is_subscribed: false,
            credits: 0,
            preferred_language: Language::default(),
            is_initialized: false,
        }
    }
}

impl Replica {
    /// Replica of a signed-in user without a record: one trial credit.
    #[must_use]
    pub fn absent_record() -> Self {
        Self {
            is_subscribed: false,
            credits: TRIAL_CREDITS,
            preferred_language: Language::default(),
            is_initialized: true,
        }
    }

    /// Replica built from the first authoritative read.
    #[must_use]
    pub fn from_read(record: Option<&SubscriptionRecord>) -> Self {
        record.map_or_else(Self::absent_record, |record| Self {
            is_subscribed: true,
            credits: record.credits,
            preferred_language: record.preferred_language,
            is_initialized: true,
        })
    }

    /// Apply a remote change. Every branch is a plain assignment, so
    /// applying the same event twice leaves the replica unchanged.
    pub fn apply(&mut self, event: &ChangeEvent) {
        match &event.kind {
            ChangeKind::Inserted { new } => {
                self.is_subscribed = true;
                self.credits = new.credits;
                self.preferred_language = new.preferred_language;
            }
            ChangeKind::Updated { new, .. } => {
                self.credits = new.credits;
                self.preferred_language = new.preferred_language;
            }
            ChangeKind::Deleted { .. } => {
                self.is_subscribed = false;
                self.credits = 0;
            }
        }
    }
}

/// Lifecycle phase of the current identity session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No identity, or an identity whose first read has not started.
    #[default]
    Uninitialized,
    /// First read in flight.
    Initializing,
    /// Replica reflects the authoritative record; debits are allowed.
    Ready,
    /// Session ended; waiting for the next identity.
    TornDown,
}

impl Phase {
    /// Whether debits and preference changes may run.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserId;

    fn record(credits: u32) -> SubscriptionRecord {
        SubscriptionRecord::new(UserId::generate(), credits)
    }

    #[test]
    fn absent_record_grants_one_trial_credit() {
        let replica = Replica::from_read(None);
        assert_eq!(
            replica,
            Replica {
                is_subscribed: false,
                credits: 1,
                preferred_language: Language::Python,
                is_initialized: true,
            }
        );
    }

    #[test]
    fn present_record_copies_fields() {
        let rec = record(5).with_language(Language::Golang);
        let replica = Replica::from_read(Some(&rec));
        assert!(replica.is_subscribed);
        assert_eq!(replica.credits, 5);
        assert_eq!(replica.preferred_language, Language::Golang);
    }

    #[test]
    fn applying_an_event_twice_is_idempotent() {
        let mut replica = Replica::from_read(Some(&record(5)));
        let event = ChangeEvent::updated(None, record(2).with_language(Language::Cpp));

        replica.apply(&event);
        let once = replica;
        replica.apply(&event);
        assert_eq!(replica, once);
        assert_eq!(replica.credits, 2);
    }

    #[test]
    fn delete_zeroes_credits_and_unsubscribes() {
        let rec = record(8);
        let mut replica = Replica::from_read(Some(&rec));
        replica.apply(&ChangeEvent::deleted(rec.user_id, Some(rec)));
        assert!(!replica.is_subscribed);
        assert_eq!(replica.credits, 0);
        assert!(replica.is_initialized);
    }

    #[test]
    fn insert_marks_subscribed() {
        let mut replica = Replica::absent_record();
        replica.apply(&ChangeEvent::inserted(record(50)));
        assert!(replica.is_subscribed);
        assert_eq!(replica.credits, 50);
    }

    #[test]
    fn replica_serializes_camel_case() {
        let json = serde_json::to_value(Replica::default()).unwrap();
        assert_eq!(json["isSubscribed"], false);
        assert_eq!(json["preferredLanguage"], "python");
        assert_eq!(json["isInitialized"], false);
    }
}
