//! Gateway error types.

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors that can occur when talking to the record store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Transport failure (timeout, connection refused, reset).
    #[error("network error: {0}")]
    Network(String),

    /// The record does not exist.
    #[error("record not found: {user_id}")]
    NotFound {
        /// The user whose record is missing.
        user_id: String,
    },

    /// A guarded update lost against a concurrent writer.
    #[error("conflicting update: expected credits={expected}")]
    Conflict {
        /// The balance the update was guarded on.
        expected: u32,
    },

    /// The change feed could not be established.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// The backend does not offer this primitive.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The backend answered with a payload we could not decode.
    #[error("decode error: {0}")]
    Decode(String),

    /// The backend answered with an error status.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },
}

impl GatewayError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Subscription(_) | Self::Conflict { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::NotFound { .. } | Self::Unsupported(_) | Self::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
