//! State store: the single owner of the local replica.
//!
//! Every mutation names the session epoch it belongs to. An epoch is minted
//! each time an identity session begins; anything carrying an older epoch (a
//! feed event from a torn-down subscription, a debit that completes after a
//! sign-out) is discarded instead of applied. Every applied mutation is
//! mirrored to the [`Publisher`].

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use credit_sync_core::{
    ChangeEvent, ChangeKind, Language, Phase, Replica, SubscriptionRecord, UserId,
};

use crate::error::{Result, SyncError};
use crate::publisher::Publisher;

/// Monotonic identifier of one identity session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionEpoch(u64);

impl fmt::Display for SessionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity session currently bound to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// The signed-in user.
    pub user_id: UserId,
    /// Epoch of the session.
    pub epoch: SessionEpoch,
    /// Lifecycle phase.
    pub phase: Phase,
}

/// What happened to a change event handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The replica changed and was published.
    Applied,
    /// The event matched the replica already.
    Unchanged,
    /// The first read is in flight; the event will be replayed on top of it.
    Buffered,
    /// The first read has not started yet and will observe this change itself.
    Superseded,
    /// The event belongs to another session or user and was dropped.
    Stale,
}

struct StoreState {
    user_id: Option<UserId>,
    epoch: SessionEpoch,
    phase: Phase,
    replica: Replica,
    pending: Vec<ChangeEvent>,
}

impl StoreState {
    fn owns(&self, epoch: SessionEpoch) -> Option<UserId> {
        self.user_id.filter(|_| self.epoch == epoch)
    }

    fn reset(&mut self, phase: Phase) {
        self.phase = phase;
        self.replica = Replica::default();
        self.pending.clear();
    }
}

/// Owner of the local replica.
pub struct StateStore {
    state: Mutex<StoreState>,
    publisher: Publisher,
}

impl StateStore {
    /// Create an empty store publishing into `publisher`.
    #[must_use]
    pub fn new(publisher: Publisher) -> Self {
        publisher.publish(Replica::default());
        Self {
            state: Mutex::new(StoreState {
                user_id: None,
                epoch: SessionEpoch(0),
                phase: Phase::Uninitialized,
                replica: Replica::default(),
                pending: Vec::new(),
            }),
            publisher,
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current replica.
    #[must_use]
    pub fn replica(&self) -> Replica {
        self.state().replica
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    /// The bound session, if an identity is signed in.
    #[must_use]
    pub fn session(&self) -> Option<SessionInfo> {
        let state = self.state();
        state.user_id.map(|user_id| SessionInfo {
            user_id,
            epoch: state.epoch,
            phase: state.phase,
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Bind a new identity session and return its epoch. Any previous session
    /// is invalidated and the replica goes back to defaults.
    pub fn begin_session(&self, user_id: UserId) -> SessionEpoch {
        let mut state = self.state();
        state.epoch = SessionEpoch(state.epoch.0 + 1);
        state.user_id = Some(user_id);
        state.reset(Phase::Uninitialized);
        let epoch = state.epoch;
        self.publisher.publish(state.replica);
        tracing::debug!(%user_id, %epoch, "Session bound");
        epoch
    }

    /// Unbind the current session. Late mutations for it are discarded from
    /// now on.
    pub fn end_session(&self) {
        let mut state = self.state();
        let previous = state.user_id.take();
        state.epoch = SessionEpoch(state.epoch.0 + 1);
        state.reset(Phase::TornDown);
        self.publisher.publish(state.replica);
        if let Some(user_id) = previous {
            tracing::debug!(%user_id, "Session unbound");
        }
    }

    /// Move the session into `Initializing`.
    ///
    /// # Errors
    ///
    /// - `SyncError::StaleSession` if `epoch` is no longer current.
    /// - `SyncError::NotReady` if the first read already completed or is in flight.
    pub fn mark_initializing(&self, epoch: SessionEpoch) -> Result<UserId> {
        let mut state = self.state();
        let user_id = state.owns(epoch).ok_or_else(|| stale(state.user_id))?;
        match state.phase {
            Phase::Uninitialized => {
                state.phase = Phase::Initializing;
                Ok(user_id)
            }
            phase => Err(SyncError::NotReady { phase }),
        }
    }

    /// Write the first authoritative read, replay events that arrived while it
    /// was in flight, and flip the replica to initialized.
    ///
    /// # Errors
    ///
    /// - `SyncError::StaleSession` if `epoch` is no longer current.
    /// - `SyncError::NotReady` if the session is not in `Initializing`.
    pub fn complete_initialization(
        &self,
        epoch: SessionEpoch,
        record: Option<&SubscriptionRecord>,
    ) -> Result<Replica> {
        let mut state = self.state();
        let Some(user_id) = state.owns(epoch) else {
            tracing::warn!(%epoch, "Discarding initial read for an ended session");
            return Err(stale(record.map(|r| r.user_id)));
        };
        if state.phase != Phase::Initializing {
            return Err(SyncError::NotReady { phase: state.phase });
        }

        let mut replica = Replica::from_read(record);
        let pending = std::mem::take(&mut state.pending);
        for event in &pending {
            replica.apply(event);
        }
        // A read that found no record outranks a buffered delete: the user is
        // a trial user, not a cancelled subscriber.
        let ends_deleted = pending
            .last()
            .is_some_and(|event| matches!(event.kind, ChangeKind::Deleted { .. }));
        if record.is_none() && ends_deleted {
            replica = Replica::absent_record();
        }

        state.phase = Phase::Ready;
        state.replica = replica;
        self.publisher.publish(replica);
        tracing::info!(
            %user_id,
            %epoch,
            subscribed = replica.is_subscribed,
            credits = replica.credits,
            replayed = pending.len(),
            "Replica initialized"
        );
        Ok(replica)
    }

    /// Return a failed first read to `Uninitialized` so it can be retried.
    /// Buffered events are dropped; the retried read covers them.
    pub fn abort_initialization(&self, epoch: SessionEpoch) {
        let mut state = self.state();
        if state.owns(epoch).is_some() && state.phase == Phase::Initializing {
            state.phase = Phase::Uninitialized;
            state.pending.clear();
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Apply a remote change event.
    pub fn apply_change(&self, epoch: SessionEpoch, event: &ChangeEvent) -> ApplyOutcome {
        let mut state = self.state();
        if state.owns(epoch) != Some(event.user_id) {
            return ApplyOutcome::Stale;
        }

        match state.phase {
            Phase::Ready => {
                let before = state.replica;
                state.replica.apply(event);
                if state.replica == before {
                    ApplyOutcome::Unchanged
                } else {
                    self.publisher.publish(state.replica);
                    ApplyOutcome::Applied
                }
            }
            Phase::Initializing => {
                state.pending.push(event.clone());
                ApplyOutcome::Buffered
            }
            Phase::Uninitialized => ApplyOutcome::Superseded,
            Phase::TornDown => ApplyOutcome::Stale,
        }
    }

    /// Write back a credit balance returned by a debit.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::StaleSession` if `epoch` is no longer current.
    pub fn apply_credits(&self, epoch: SessionEpoch, credits: u32) -> Result<Replica> {
        self.mutate_ready(epoch, |replica| replica.credits = credits)
    }

    /// Write a preferred language chosen locally.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::StaleSession` if `epoch` is no longer current.
    pub fn apply_language(&self, epoch: SessionEpoch, language: Language) -> Result<Replica> {
        self.mutate_ready(epoch, |replica| replica.preferred_language = language)
    }

    /// Put back `previous` after a failed language write, unless something
    /// newer than `written` has landed in the meantime. Returns whether the
    /// replica was reverted.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::StaleSession` if `epoch` is no longer current.
    pub fn revert_language(
        &self,
        epoch: SessionEpoch,
        written: Language,
        previous: Language,
    ) -> Result<bool> {
        let mut reverted = false;
        self.mutate_ready(epoch, |replica| {
            if replica.preferred_language == written {
                replica.preferred_language = previous;
                reverted = true;
            }
        })?;
        Ok(reverted)
    }

    fn mutate_ready(&self, epoch: SessionEpoch, f: impl FnOnce(&mut Replica)) -> Result<Replica> {
        let mut state = self.state();
        let user_id = state.owns(epoch);
        if user_id.is_none() || !state.phase.is_ready() {
            return Err(stale(user_id));
        }
        f(&mut state.replica);
        self.publisher.publish(state.replica);
        Ok(state.replica)
    }
}

fn stale(user_id: Option<UserId>) -> SyncError {
    SyncError::StaleSession {
        user_id: user_id.map_or_else(|| "<unknown>".to_string(), |id| id.to_string()),
    }
}
