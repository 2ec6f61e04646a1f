//! Client-side replica of a user's subscription and credit balance.
//!
//! This crate keeps a local copy of one signed-in user's subscription record in
//! sync with the authoritative record store, including:
//!
//! - First authoritative read when an identity becomes available
//! - A per-identity change feed applied on top of it
//! - Debiting one credit per completed billable action
//! - Publishing every replica change to readers in other tasks and threads
//!
//! # Lifecycle
//!
//! A session goes `Uninitialized → Initializing → Ready → TornDown`. Debits
//! and language changes are only accepted in `Ready`. Switching identity tears
//! the old session down completely before the new one subscribes, and every
//! late completion that belongs to an ended session is discarded.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use credit_sync::{CreditSync, Publisher, SyncOptions};
//! use credit_sync_core::UserId;
//! use credit_sync_gateway::MemoryGateway;
//!
//! # async fn example() -> credit_sync::Result<()> {
//! let sync = CreditSync::new(Arc::new(MemoryGateway::new()), Publisher::new(), SyncOptions::default());
//! let reader = sync.reader();
//!
//! sync.start_session(UserId::generate()).await?;
//! sync.on_billable_action_completed().await?;
//! println!("{} credits left", reader.latest().credits);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod controller;
pub mod debit;
pub mod error;
pub mod feed;
pub mod init;
pub mod publisher;
pub mod store;

pub use config::SyncConfig;
pub use controller::{CreditSync, SyncOptions};
pub use debit::DebitOutcome;
pub use error::{Result, SyncError};
pub use publisher::{Publisher, ReplicaReader};
pub use store::{SessionEpoch, StateStore};
