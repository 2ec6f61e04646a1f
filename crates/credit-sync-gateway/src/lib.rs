//! Remote record gateway for credit-sync.
//!
//! The gateway is the only way the sync runtime talks to the authoritative
//! record store. It offers point reads, conditional updates, an optional
//! atomic decrement, and a per-user push feed of change events.
//!
//! Two implementations ship with this crate:
//!
//! - [`MemoryGateway`]: an in-process store with a live push feed, used by
//!   tests and local runs.
//! - [`RestGateway`]: an HTTP client for a PostgREST-style backend. Its change
//!   feed polls the record and diffs successive snapshots.
//!
//! # Example
//!
//! ```no_run
//! use credit_sync_gateway::{RecordGateway, RestGateway};
//! use credit_sync_core::UserId;
//!
//! # async fn example() -> Result<(), credit_sync_gateway::GatewayError> {
//! let gateway = RestGateway::new("https://records.example.com", "anon-key")?;
//! let user = UserId::generate();
//!
//! match gateway.read_record(&user).await? {
//!     Some(record) => println!("{} credits left", record.credits),
//!     None => println!("no subscription"),
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod error;
pub mod memory;
pub mod rest;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use credit_sync_core::{ChangeEvent, RecordPatch, SubscriptionRecord, UserId};

pub use error::{GatewayError, Result};
pub use memory::{GatewayStats, MemoryGateway};
pub use rest::{RestGateway, RestOptions};

/// Handle of one live change-feed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedHandle(u64);

impl FeedHandle {
    /// Wrap a raw handle value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw handle value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FeedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feed-{}", self.0)
    }
}

/// A live change feed for one user.
///
/// Events arrive in commit order. The channel closes when the subscription is
/// removed on the gateway side.
#[derive(Debug)]
pub struct ChangeStream {
    /// Handle to pass to [`RecordGateway::unsubscribe`].
    pub handle: FeedHandle,
    /// Incoming change events.
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// Result of an atomic decrement-if-positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decrement {
    /// One credit was taken; `remaining` is the stored balance afterwards.
    Applied {
        /// Balance after the decrement.
        remaining: u32,
    },
    /// The record exists but holds no credits; nothing was written.
    Exhausted,
    /// The user has no record.
    Absent,
}

/// The authoritative record store, as seen by the sync runtime.
#[async_trait]
pub trait RecordGateway: Send + Sync {
    /// Read the current record of `user_id`. Absence is not an error.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Network` on transport failures.
    async fn read_record(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>>;

    /// Apply a partial update and return the stored record.
    ///
    /// # Errors
    ///
    /// - `GatewayError::NotFound` if the record does not exist.
    /// - `GatewayError::Conflict` if `patch.expected_credits` does not match.
    async fn update_record(
        &self,
        user_id: &UserId,
        patch: &RecordPatch,
    ) -> Result<SubscriptionRecord>;

    /// Atomically take one credit if the balance is positive.
    ///
    /// # Errors
    ///
    /// The default implementation returns `GatewayError::Unsupported`; callers
    /// fall back to a guarded read-modify-write.
    async fn decrement_credits(&self, user_id: &UserId) -> Result<Decrement> {
        let _ = user_id;
        Err(GatewayError::Unsupported("decrement_credits"))
    }

    /// Open a change feed filtered to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Subscription` if the feed cannot be established.
    async fn subscribe_changes(&self, user_id: &UserId) -> Result<ChangeStream>;

    /// Close a change feed. Unknown handles are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses the request.
    async fn unsubscribe(&self, handle: FeedHandle) -> Result<()>;
}
