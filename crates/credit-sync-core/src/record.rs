//! Subscription record types.
//!
//! The subscription record is the authoritative, remotely stored billing row of
//! one user. It is created by the billing process when a subscription starts,
//! updated by credit debits and language changes, and deleted on cancellation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, UserId};

/// The authoritative remote subscription record of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Owner of the record.
    pub user_id: UserId,

    /// Remaining usage credits.
    pub credits: u32,

    /// Language generated solutions are written in.
    #[serde(default)]
    pub preferred_language: Language,

    /// Last modification time as reported by the backend.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Create a record with the given credits and the default language.
    #[must_use]
    pub fn new(user_id: UserId, credits: u32) -> Self {
        Self {
            user_id,
            credits,
            preferred_language: Language::default(),
            updated_at: Utc::now(),
        }
    }

    /// Set the preferred language.
    #[must_use]
    pub fn with_language(mut self, language: Language) -> Self {
        self.preferred_language = language;
        self
    }

    /// Apply a patch in place. The compare-and-set guard is not checked here.
    pub fn apply(&mut self, patch: &RecordPatch) {
        if let Some(credits) = patch.credits {
            self.credits = credits;
        }
        if let Some(language) = patch.preferred_language {
            self.preferred_language = language;
        }
        self.updated_at = Utc::now();
    }
}

/// A partial update of a subscription record.
///
/// `expected_credits` turns the update into a compare-and-set: the gateway
/// must refuse the patch when the stored credits differ from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPatch {
    /// New credit balance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<u32>,

    /// New preferred language.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_language: Option<Language>,

    /// Only apply when the stored credits equal this value.
    #[serde(skip)]
    pub expected_credits: Option<u32>,
}

impl RecordPatch {
    /// Patch that sets the credits to `value`, guarded on the previously read balance.
    #[must_use]
    pub fn credits_from(expected: u32, value: u32) -> Self {
        Self {
            credits: Some(value),
            preferred_language: None,
            expected_credits: Some(expected),
        }
    }

    /// Patch that only changes the preferred language.
    #[must_use]
    pub fn language(language: Language) -> Self {
        Self {
            preferred_language: Some(language),
            ..Self::default()
        }
    }

    /// True when the patch would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credits.is_none() && self.preferred_language.is_none()
    }
}

/// Output languages a user can pick for generated solutions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python (default for new and trial users).
    #[default]
    Python,
    /// JavaScript.
    Javascript,
    /// TypeScript.
    Typescript,
    /// Java.
    Java,
    /// Go.
    Golang,
    /// C++.
    Cpp,
    /// C.
    C,
    /// C#.
    Csharp,
    /// Kotlin.
    Kotlin,
    /// Swift.
    Swift,
    /// Ruby.
    Ruby,
    /// Rust.
    Rust,
    /// SQL.
    Sql,
    /// R.
    R,
}

impl Language {
    /// Every supported language, in display order.
    pub const ALL: [Self; 14] = [
        Self::Python,
        Self::Javascript,
        Self::Typescript,
        Self::Java,
        Self::Golang,
        Self::Cpp,
        Self::C,
        Self::Csharp,
        Self::Kotlin,
        Self::Swift,
        Self::Ruby,
        Self::Rust,
        Self::Sql,
        Self::R,
    ];

    /// Wire name of the language.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Typescript => "typescript",
            Self::Java => "java",
            Self::Golang => "golang",
            Self::Cpp => "cpp",
            Self::C => "c",
            Self::Csharp => "csharp",
            Self::Kotlin => "kotlin",
            Self::Swift => "swift",
            Self::Ruby => "ruby",
            Self::Rust => "rust",
            Self::Sql => "sql",
            Self::R => "r",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|lang| lang.as_str() == wanted)
            .ok_or_else(|| CoreError::UnknownLanguage(s.to_string()))
    }
}
