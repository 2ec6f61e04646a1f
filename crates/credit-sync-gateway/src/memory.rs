//! In-process record store with a live push feed.
//!
//! `MemoryGateway` behaves like the remote store as far as the sync runtime
//! can tell: every call yields to the scheduler once (a suspension point),
//! every committed mutation is pushed to the live subscribers of that user in
//! commit order, and failures can be injected per operation.
//!
//! The billing-process side (`insert_record`, `delete_record`) is exposed as
//! plain methods so tests can drive subscription starts and cancellations.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use credit_sync_core::{ChangeEvent, RecordPatch, SubscriptionRecord, UserId};

use crate::error::{GatewayError, Result};
use crate::{ChangeStream, Decrement, FeedHandle, RecordGateway};

/// Call counters, for asserting which gateway calls a flow made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    /// `read_record` calls.
    pub reads: usize,
    /// `update_record` calls (including rejected ones).
    pub updates: usize,
    /// `decrement_credits` calls.
    pub decrements: usize,
    /// `subscribe_changes` calls.
    pub subscribes: usize,
    /// `unsubscribe` calls.
    pub unsubscribes: usize,
}

struct Subscriber {
    user_id: UserId,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct Faults {
    read: VecDeque<GatewayError>,
    update: VecDeque<GatewayError>,
    subscribe: VecDeque<GatewayError>,
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<UserId, SubscriptionRecord>,
    subscribers: HashMap<FeedHandle, Subscriber>,
    next_handle: u64,
    faults: Faults,
    stats: GatewayStats,
}

impl MemoryState {
    fn publish(&mut self, event: &ChangeEvent) {
        self.subscribers.retain(|handle, sub| {
            if sub.user_id != event.user_id {
                return true;
            }
            let delivered = sub.sender.send(event.clone()).is_ok();
            if !delivered {
                tracing::debug!(%handle, "Dropping subscriber with closed receiver");
            }
            delivered
        });
    }
}

/// In-memory authoritative record store.
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
    atomic_decrement: bool,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    /// Create an empty store that offers the atomic decrement.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            atomic_decrement: true,
        }
    }

    /// Create an empty store without the atomic decrement, forcing callers
    /// onto the guarded read-modify-write path.
    #[must_use]
    pub fn without_atomic_decrement() -> Self {
        Self {
            atomic_decrement: false,
            ..Self::new()
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Billing-process operations
    // =========================================================================

    /// Create or replace a record, as the billing process does when a
    /// subscription starts or renews. Emits `Inserted` or `Updated`.
    pub fn insert_record(&self, record: SubscriptionRecord) {
        let mut state = self.state();
        let old = state.records.insert(record.user_id, record.clone());
        let event = match old {
            Some(old) => ChangeEvent::updated(Some(old), record),
            None => ChangeEvent::inserted(record),
        };
        state.publish(&event);
    }

    /// Remove a record, as the billing process does on cancellation.
    /// Emits `Deleted` if a record existed.
    pub fn delete_record(&self, user_id: &UserId) -> Option<SubscriptionRecord> {
        let mut state = self.state();
        let old = state.records.remove(user_id)?;
        state.publish(&ChangeEvent::deleted(*user_id, Some(old.clone())));
        Some(old)
    }

    /// Push an arbitrary event to the subscribers of its user without
    /// touching the stored record (replays, stale deliveries).
    pub fn push_event(&self, event: &ChangeEvent) {
        self.state().publish(event);
    }

    // =========================================================================
    // Inspection and fault injection
    // =========================================================================

    /// Current stored record of `user_id`.
    #[must_use]
    pub fn record(&self, user_id: &UserId) -> Option<SubscriptionRecord> {
        self.state().records.get(user_id).cloned()
    }

    /// Number of live feed subscriptions for `user_id`.
    #[must_use]
    pub fn live_subscriptions(&self, user_id: &UserId) -> usize {
        self.state()
            .subscribers
            .values()
            .filter(|sub| sub.user_id == *user_id && !sub.sender.is_closed())
            .count()
    }

    /// Number of live feed subscriptions across all users.
    #[must_use]
    pub fn total_live_subscriptions(&self) -> usize {
        self.state()
            .subscribers
            .values()
            .filter(|sub| !sub.sender.is_closed())
            .count()
    }

    /// Snapshot of the call counters.
    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        self.state().stats
    }

    /// Make the next `read_record` fail with `err`.
    pub fn fail_next_read(&self, err: GatewayError) {
        self.state().faults.read.push_back(err);
    }

    /// Make the next `update_record` fail with `err`.
    pub fn fail_next_update(&self, err: GatewayError) {
        self.state().faults.update.push_back(err);
    }

    /// Make the next `subscribe_changes` fail with `err`.
    pub fn fail_next_subscribe(&self, err: GatewayError) {
        self.state().faults.subscribe.push_back(err);
    }
}

#[async_trait]
impl RecordGateway for MemoryGateway {
    async fn read_record(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.stats.reads += 1;
        if let Some(err) = state.faults.read.pop_front() {
            return Err(err);
        }
        Ok(state.records.get(user_id).cloned())
    }

    async fn update_record(
        &self,
        user_id: &UserId,
        patch: &RecordPatch,
    ) -> Result<SubscriptionRecord> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.stats.updates += 1;
        if let Some(err) = state.faults.update.pop_front() {
            return Err(err);
        }

        let current = state
            .records
            .get(user_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                user_id: user_id.to_string(),
            })?;

        if let Some(expected) = patch.expected_credits {
            if current.credits != expected {
                return Err(GatewayError::Conflict { expected });
            }
        }

        let mut next = current.clone();
        next.apply(patch);
        state.records.insert(*user_id, next.clone());
        state.publish(&ChangeEvent::updated(Some(current), next.clone()));
        Ok(next)
    }

    async fn decrement_credits(&self, user_id: &UserId) -> Result<Decrement> {
        if !self.atomic_decrement {
            return Err(GatewayError::Unsupported("decrement_credits"));
        }
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.stats.decrements += 1;
        if let Some(err) = state.faults.update.pop_front() {
            return Err(err);
        }

        let Some(current) = state.records.get(user_id).cloned() else {
            return Ok(Decrement::Absent);
        };
        if current.credits == 0 {
            return Ok(Decrement::Exhausted);
        }

        let mut next = current.clone();
        next.apply(&RecordPatch::credits_from(current.credits, current.credits - 1));
        let remaining = next.credits;
        state.records.insert(*user_id, next.clone());
        state.publish(&ChangeEvent::updated(Some(current), next));
        Ok(Decrement::Applied { remaining })
    }

    async fn subscribe_changes(&self, user_id: &UserId) -> Result<ChangeStream> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.stats.subscribes += 1;
        if let Some(err) = state.faults.subscribe.pop_front() {
            return Err(err);
        }

        state.next_handle += 1;
        let handle = FeedHandle::new(state.next_handle);
        let (sender, events) = mpsc::unbounded_channel();
        state.subscribers.insert(
            handle,
            Subscriber {
                user_id: *user_id,
                sender,
            },
        );
        tracing::debug!(%handle, %user_id, "Memory feed subscribed");
        Ok(ChangeStream { handle, events })
    }

    async fn unsubscribe(&self, handle: FeedHandle) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.stats.unsubscribes += 1;
        if state.subscribers.remove(&handle).is_some() {
            tracing::debug!(%handle, "Memory feed unsubscribed");
        }
        Ok(())
    }
}
