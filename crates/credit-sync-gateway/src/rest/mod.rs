//! REST gateway for a PostgREST-style record backend.
//!
//! The backend exposes the subscription table under `/rest/v1/{table}` and an
//! optional decrement function under `/rest/v1/rpc/{function}`. It has no push
//! channel we can consume over plain HTTP, so the change feed polls the record
//! and turns differences between successive snapshots into change events.

pub mod client;
pub mod poll;
pub mod types;

pub use client::{RestGateway, RestOptions};
pub use poll::diff_snapshots;
