//! Error types for credit-sync core types.

use crate::ids::IdError;

/// Errors raised while building or parsing core values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// The language name is not one of the supported output languages.
    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    /// A change event was built for a different user than its snapshots.
    #[error("change event snapshot belongs to {snapshot}, event is scoped to {event}")]
    MismatchedUser {
        /// The user the event is scoped to.
        event: String,
        /// The user named by the snapshot.
        snapshot: String,
    },
}
