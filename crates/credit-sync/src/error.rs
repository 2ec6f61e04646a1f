//! Sync error types.

use credit_sync_core::Phase;
use credit_sync_gateway::GatewayError;

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the sync runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Transient transport failure; the caller may retry.
    #[error("network failure: {0}")]
    Network(String),

    /// The record does not exist.
    #[error("record not found: {user_id}")]
    NotFound {
        /// The user whose record is missing.
        user_id: String,
    },

    /// A guarded debit kept losing against concurrent writers.
    #[error("debit lost against concurrent writers after {attempts} attempt(s)")]
    ConflictOrRace {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The change feed could not be established.
    #[error("change feed setup failed: {0}")]
    SubscriptionSetup(String),

    /// The operation needs an initialized replica.
    #[error("replica not ready (phase: {phase:?})")]
    NotReady {
        /// Phase the session was in.
        phase: Phase,
    },

    /// No identity is signed in.
    #[error("no signed-in identity")]
    NoIdentity,

    /// The session the call belonged to ended before it completed.
    #[error("session for {user_id} ended before the call completed")]
    StaleSession {
        /// The user of the ended session.
        user_id: String,
    },

    /// Any other gateway failure.
    #[error("gateway error: {0}")]
    Gateway(GatewayError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    /// Whether an operator-visible retry makes sense.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::SubscriptionSetup(_) | Self::ConflictOrRace { .. }
        )
    }
}

impl From<GatewayError> for SyncError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Network(msg) => Self::Network(msg),
            GatewayError::NotFound { user_id } => Self::NotFound { user_id },
            GatewayError::Conflict { .. } => Self::ConflictOrRace { attempts: 1 },
            GatewayError::Subscription(msg) => Self::SubscriptionSetup(msg),
            GatewayError::Api { status, message } if status >= 500 => {
                Self::Network(format!("HTTP {status}: {message}"))
            }
            other => Self::Gateway(other),
        }
    }
}
