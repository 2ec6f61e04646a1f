//! Wire types of the REST backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use credit_sync_core::{Language, SubscriptionRecord, UserId};

/// One row of the subscription table as the backend returns it.
///
/// Columns are looser than our domain types: credits are a signed integer and
/// the language is free text.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordRow {
    /// Owner of the row.
    pub user_id: UserId,
    /// Remaining credits.
    pub credits: i64,
    /// Preferred language, if set.
    #[serde(default)]
    pub preferred_language: Option<String>,
    /// Last modification time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RecordRow {
    /// Convert to a domain record, clamping negative balances to zero and
    /// replacing unknown languages with the default.
    #[must_use]
    pub fn into_record(self) -> SubscriptionRecord {
        let credits = u32::try_from(self.credits.max(0)).unwrap_or(u32::MAX);
        if self.credits < 0 {
            tracing::warn!(
                user_id = %self.user_id,
                credits = self.credits,
                "Backend returned a negative balance, clamping to zero"
            );
        }

        let preferred_language = match self.preferred_language.as_deref() {
            None => Language::default(),
            Some(name) => name.parse().unwrap_or_else(|_| {
                tracing::warn!(user_id = %self.user_id, language = %name, "Unknown language, using default");
                Language::default()
            }),
        };

        SubscriptionRecord {
            user_id: self.user_id,
            credits,
            preferred_language,
            updated_at: self.updated_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Body of the decrement function call.
#[derive(Debug, Clone, Serialize)]
pub struct DecrementRequest {
    /// The user to debit.
    pub p_user_id: String,
}

/// Result of the decrement function.
#[derive(Debug, Clone, Deserialize)]
pub struct DecrementResponse {
    /// Whether the user has a record.
    pub found: bool,
    /// Whether a credit was taken.
    pub applied: bool,
    /// Balance after the call.
    #[serde(default)]
    pub remaining: i64,
}

/// Error body returned by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct RestErrorResponse {
    /// Human-readable message.
    pub message: String,
    /// Backend error code.
    #[serde(default)]
    pub code: Option<String>,
}
