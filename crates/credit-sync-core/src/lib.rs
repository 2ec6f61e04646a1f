//! Core types for credit-sync.
//!
//! This crate provides the plain data shared by the gateway and the sync runtime:
//!
//! - **Identifiers**: `UserId`, `DebitId`
//! - **Records**: `SubscriptionRecord`, `RecordPatch`, `Language`
//! - **Feed**: `ChangeEvent`, `ChangeKind`
//! - **Replica**: `Replica`, `Phase`
//!
//! # Credits
//!
//! One credit pays for one billable action. Credits are stored as `u32`, so a
//! negative balance cannot be represented anywhere in the workspace. A user
//! without a subscription record is treated as a trial user holding
//! [`TRIAL_CREDITS`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod event;
pub mod ids;
pub mod record;
pub mod replica;

pub use error::CoreError;
pub use event::{ChangeEvent, ChangeKind};
pub use ids::{DebitId, IdError, UserId};
pub use record::{Language, RecordPatch, SubscriptionRecord};
pub use replica::{Phase, Replica, TRIAL_CREDITS};
