//! Optimistic credit debit.
//!
//! One completed billable action takes one credit. The debit asks the gateway
//! for its atomic decrement-if-positive first; backends without it get a
//! guarded read-modify-write where the update only applies if the balance is
//! still the one we read, retried a bounded number of times.
//!
//! A balance of zero is the floor: the debit reports `Exhausted` and writes
//! nothing.

use credit_sync_core::{DebitId, Phase, RecordPatch};
use credit_sync_gateway::{Decrement, GatewayError, RecordGateway};

use crate::error::{Result, SyncError};
use crate::store::{SessionInfo, StateStore};

/// Default number of guarded read-modify-write attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What a debit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// One credit was taken and the replica updated.
    Debited {
        /// Balance after the debit.
        remaining: u32,
    },
    /// The balance was already zero; nothing was written.
    Exhausted,
    /// The user has no record; nothing was written.
    NoRecord,
    /// The replica was not initialized; the gateway was not called.
    Skipped {
        /// Phase the session was in (`Uninitialized` when signed out).
        phase: Phase,
    },
    /// The gateway took the credit but the session ended before the result
    /// came back, so the replica was left alone.
    Detached {
        /// Balance the gateway reported.
        remaining: u32,
    },
}

/// Take one credit for the current session.
///
/// # Errors
///
/// - `SyncError::ConflictOrRace` if every guarded attempt lost to a concurrent writer.
/// - Mapped gateway errors for failed reads or writes. The replica is left
///   unchanged and nothing is retried.
pub async fn debit(
    gateway: &dyn RecordGateway,
    store: &StateStore,
    max_attempts: u32,
) -> Result<DebitOutcome> {
    let debit_id = DebitId::generate();

    let session = match store.session() {
        Some(session) if session.phase.is_ready() => session,
        Some(session) => {
            tracing::warn!(%debit_id, user_id = %session.user_id, phase = ?session.phase, "Skipping debit: replica not initialized");
            return Ok(DebitOutcome::Skipped {
                phase: session.phase,
            });
        }
        None => {
            tracing::warn!(%debit_id, "Skipping debit: no signed-in identity");
            return Ok(DebitOutcome::Skipped {
                phase: store.phase(),
            });
        }
    };

    let user_id = session.user_id;
    tracing::debug!(%debit_id, %user_id, epoch = %session.epoch, "Debiting one credit");

    let outcome = match gateway.decrement_credits(&user_id).await {
        Ok(Decrement::Applied { remaining }) => write_back(store, session, debit_id, remaining),
        Ok(Decrement::Exhausted) => Ok(DebitOutcome::Exhausted),
        Ok(Decrement::Absent) => Ok(DebitOutcome::NoRecord),
        Err(GatewayError::Unsupported(_)) => {
            guarded_debit(gateway, store, session, debit_id, max_attempts.max(1)).await
        }
        Err(e) => Err(e.into()),
    };

    match &outcome {
        Ok(DebitOutcome::Exhausted) => {
            tracing::warn!(%debit_id, %user_id, "No credits left to debit");
        }
        Ok(DebitOutcome::NoRecord) => {
            tracing::debug!(%debit_id, %user_id, "No subscription record, debit aborted");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(%debit_id, %user_id, error = %e, "Debit failed");
        }
    }
    outcome
}

async fn guarded_debit(
    gateway: &dyn RecordGateway,
    store: &StateStore,
    session: SessionInfo,
    debit_id: DebitId,
    max_attempts: u32,
) -> Result<DebitOutcome> {
    let user_id = session.user_id;

    for attempt in 1..=max_attempts {
        let Some(record) = gateway.read_record(&user_id).await? else {
            return Ok(DebitOutcome::NoRecord);
        };
        if record.credits == 0 {
            return Ok(DebitOutcome::Exhausted);
        }

        let patch = RecordPatch::credits_from(record.credits, record.credits - 1);
        match gateway.update_record(&user_id, &patch).await {
            Ok(updated) => return write_back(store, session, debit_id, updated.credits),
            Err(GatewayError::Conflict { expected }) => {
                tracing::debug!(%debit_id, %user_id, attempt, expected, "Debit lost a race, retrying");
            }
            Err(GatewayError::NotFound { .. }) => return Ok(DebitOutcome::NoRecord),
            Err(e) => return Err(e.into()),
        }
    }

    Err(SyncError::ConflictOrRace {
        attempts: max_attempts,
    })
}

fn write_back(
    store: &StateStore,
    session: SessionInfo,
    debit_id: DebitId,
    remaining: u32,
) -> Result<DebitOutcome> {
    match store.apply_credits(session.epoch, remaining) {
        Ok(_) => {
            tracing::info!(%debit_id, user_id = %session.user_id, remaining, "Credit debited");
            Ok(DebitOutcome::Debited { remaining })
        }
        Err(SyncError::StaleSession { .. }) => {
            tracing::warn!(%debit_id, user_id = %session.user_id, remaining, "Session ended during debit, discarding late result");
            Ok(DebitOutcome::Detached { remaining })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::initialize;
    use crate::publisher::Publisher;
    use std::sync::Arc;

    use async_trait::async_trait;
    use credit_sync_core::{SubscriptionRecord, UserId};
    use credit_sync_gateway::{ChangeStream, FeedHandle, MemoryGateway, Result as GatewayResult};

    async fn ready(gateway: &MemoryGateway, credits: Option<u32>) -> (StateStore, UserId) {
        let user = UserId::generate();
        if let Some(credits) = credits {
            gateway.insert_record(SubscriptionRecord::new(user, credits));
        }
        let store = StateStore::new(Publisher::new());
        let epoch = store.begin_session(user);
        initialize(gateway, &store, epoch).await.unwrap();
        (store, user)
    }

    #[tokio::test]
    async fn debit_takes_one_credit() {
        let gateway = MemoryGateway::new();
        let (store, user) = ready(&gateway, Some(3)).await;

        let outcome = debit(&gateway, &store, DEFAULT_MAX_ATTEMPTS).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Debited { remaining: 2 });
        assert_eq!(store.replica().credits, 2);
        assert_eq!(gateway.record(&user).unwrap().credits, 2);
    }

    #[tokio::test]
    async fn zero_balance_is_the_floor() {
        let gateway = MemoryGateway::new();
        let (store, user) = ready(&gateway, Some(0)).await;

        let outcome = debit(&gateway, &store, DEFAULT_MAX_ATTEMPTS).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Exhausted);
        assert_eq!(store.replica().credits, 0);
        assert_eq!(gateway.record(&user).unwrap().credits, 0);
    }

    #[tokio::test]
    async fn missing_record_is_not_written() {
        let gateway = MemoryGateway::without_atomic_decrement();
        let (store, _) = ready(&gateway, None).await;

        let outcome = debit(&gateway, &store, DEFAULT_MAX_ATTEMPTS).await.unwrap();
        assert_eq!(outcome, DebitOutcome::NoRecord);
        assert_eq!(gateway.stats().updates, 0);
        assert_eq!(store.replica(), credit_sync_core::Replica::absent_record());
    }

    #[tokio::test]
    async fn uninitialized_replica_skips_the_gateway() {
        let gateway = MemoryGateway::new();
        let user = UserId::generate();
        gateway.insert_record(SubscriptionRecord::new(user, 3));
        let store = StateStore::new(Publisher::new());
        store.begin_session(user);

        let outcome = debit(&gateway, &store, DEFAULT_MAX_ATTEMPTS).await.unwrap();
        assert_eq!(
            outcome,
            DebitOutcome::Skipped {
                phase: Phase::Uninitialized
            }
        );
        let stats = gateway.stats();
        assert_eq!(stats.decrements + stats.updates + stats.reads, 0);
        assert_eq!(gateway.record(&user).unwrap().credits, 3);
    }

    #[tokio::test]
    async fn guarded_fallback_debits_when_atomic_is_missing() {
        let gateway = MemoryGateway::without_atomic_decrement();
        let (store, user) = ready(&gateway, Some(3)).await;

        let outcome = debit(&gateway, &store, DEFAULT_MAX_ATTEMPTS).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Debited { remaining: 2 });
        assert_eq!(gateway.record(&user).unwrap().credits, 2);
    }

    #[tokio::test]
    async fn concurrent_fallback_debits_do_not_lose_updates() {
        let gateway = MemoryGateway::without_atomic_decrement();
        let (store, user) = ready(&gateway, Some(5)).await;

        let (a, b) = tokio::join!(
            debit(&gateway, &store, DEFAULT_MAX_ATTEMPTS),
            debit(&gateway, &store, DEFAULT_MAX_ATTEMPTS)
        );
        assert!(matches!(a.unwrap(), DebitOutcome::Debited { .. }));
        assert!(matches!(b.unwrap(), DebitOutcome::Debited { .. }));
        assert_eq!(gateway.record(&user).unwrap().credits, 3);
        assert_eq!(store.replica().credits, 3);
    }

    #[tokio::test]
    async fn persistent_conflicts_give_up() {
        let gateway = MemoryGateway::without_atomic_decrement();
        let (store, _) = ready(&gateway, Some(5)).await;
        for _ in 0..2 {
            gateway.fail_next_update(GatewayError::Conflict { expected: 5 });
        }

        let err = debit(&gateway, &store, 2).await.unwrap_err();
        assert_eq!(err, SyncError::ConflictOrRace { attempts: 2 });
        assert_eq!(store.replica().credits, 5);
    }

    struct SignOutDuringDebit {
        store: Arc<StateStore>,
    }

    #[async_trait]
    impl RecordGateway for SignOutDuringDebit {
        async fn read_record(&self, _: &UserId) -> GatewayResult<Option<SubscriptionRecord>> {
            Ok(None)
        }

        async fn update_record(
            &self,
            user_id: &UserId,
            _: &RecordPatch,
        ) -> GatewayResult<SubscriptionRecord> {
            Err(GatewayError::NotFound {
                user_id: user_id.to_string(),
            })
        }

        async fn decrement_credits(&self, _: &UserId) -> GatewayResult<Decrement> {
            self.store.end_session();
            Ok(Decrement::Applied { remaining: 4 })
        }

        async fn subscribe_changes(&self, _: &UserId) -> GatewayResult<ChangeStream> {
            Err(GatewayError::Unsupported("subscribe_changes"))
        }

        async fn unsubscribe(&self, _: FeedHandle) -> GatewayResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn late_completion_after_sign_out_is_discarded() {
        let store = Arc::new(StateStore::new(Publisher::new()));
        let user = UserId::generate();
        let epoch = store.begin_session(user);
        store.mark_initializing(epoch).unwrap();
        store
            .complete_initialization(epoch, Some(&SubscriptionRecord::new(user, 5)))
            .unwrap();
        let gateway = SignOutDuringDebit {
            store: Arc::clone(&store),
        };

        let outcome = debit(&gateway, &store, DEFAULT_MAX_ATTEMPTS).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Detached { remaining: 4 });
        assert_eq!(store.replica(), credit_sync_core::Replica::default());
    }

    #[tokio::test]
    async fn failed_write_leaves_replica_unchanged() {
        let gateway = MemoryGateway::new();
        let (store, _) = ready(&gateway, Some(5)).await;
        gateway.fail_next_update(GatewayError::Network("reset".into()));

        let err = debit(&gateway, &store, DEFAULT_MAX_ATTEMPTS).await.unwrap_err();
        assert_eq!(err, SyncError::Network("reset".into()));
        assert_eq!(store.replica().credits, 5);
    }
}
