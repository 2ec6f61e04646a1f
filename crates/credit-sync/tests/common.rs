//! Common test utilities for credit-sync integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;
use std::time::Duration;

use credit_sync::{CreditSync, Publisher, SyncOptions};
use credit_sync_core::{Replica, SubscriptionRecord, UserId};
use credit_sync_gateway::MemoryGateway;

/// How long a test waits for a feed event to reach the replica.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Test harness: an in-memory record store and a controller on top of it.
pub struct TestHarness {
    /// The authoritative store, also used to play the billing process.
    pub gateway: Arc<MemoryGateway>,
    /// The controller under test.
    pub sync: CreditSync,
    /// A test user.
    pub user_id: UserId,
}

impl TestHarness {
    /// Create a harness whose gateway offers the atomic decrement.
    pub fn new() -> Self {
        Self::with_gateway(MemoryGateway::new())
    }

    /// Create a harness whose gateway only supports guarded updates.
    pub fn without_atomic_decrement() -> Self {
        Self::with_gateway(MemoryGateway::without_atomic_decrement())
    }

    fn with_gateway(gateway: MemoryGateway) -> Self {
        let gateway = Arc::new(gateway);
        let sync = CreditSync::new(gateway.clone(), Publisher::new(), SyncOptions::default());
        Self {
            gateway,
            sync,
            user_id: UserId::generate(),
        }
    }

    /// Store a record for the test user.
    pub fn with_record(self, credits: u32) -> Self {
        self.gateway
            .insert_record(SubscriptionRecord::new(self.user_id, credits));
        self
    }

    /// Start a session for the test user and expect it to become ready.
    pub async fn ready(&self) -> Replica {
        self.sync
            .start_session(self.user_id)
            .await
            .expect("session should start")
    }

    /// Wait until the published replica satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl Fn(&Replica) -> bool) -> Replica {
        let mut reader = self.sync.reader();
        tokio::time::timeout(SETTLE_TIMEOUT, async {
            loop {
                let replica = reader.latest();
                if predicate(&replica) {
                    return replica;
                }
                reader.changed().await.expect("publisher dropped");
            }
        })
        .await
        .expect("replica did not settle")
    }

    /// Give spawned feed tasks a chance to run, for asserting that nothing changed.
    pub async fn quiesce() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
