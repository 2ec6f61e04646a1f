//! Runtime configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use credit_sync_core::UserId;
use credit_sync_gateway::{RestGateway, RestOptions};

use crate::controller::SyncOptions;
use crate::debit::DEFAULT_MAX_ATTEMPTS;
use crate::error::{Result, SyncError};

/// Paths probed for the backend secrets file, in order.
pub const SECRET_PATHS: [&str; 4] = [
    ".secrets/credit-sync.json",
    "credit-sync/.secrets/credit-sync.json",
    "crates/credit-sync/.secrets/credit-sync.json",
    "../.secrets/credit-sync.json",
];

/// Configuration loaded from a secrets file and environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Record backend URL.
    pub url: Option<String>,

    /// Record backend API key.
    pub api_key: Option<String>,

    /// User session token sent as bearer instead of the API key (optional).
    pub access_token: Option<String>,

    /// Table holding subscription records (default: "subscriptions").
    pub table: String,

    /// Name of the atomic decrement function (default: "`decrement_credits`").
    pub decrement_rpc: String,

    /// Change-feed poll interval in milliseconds (default: 2000).
    pub poll_interval_ms: u64,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Guarded debit attempts when the backend has no atomic decrement.
    pub debit_max_attempts: u32,

    /// Identity the daemon signs in as.
    pub user_id: Option<String>,
}

/// Backend secrets file structure.
#[derive(Debug, Deserialize)]
struct BackendSecrets {
    url: String,
    api_key: String,
    #[serde(default)]
    access_token: Option<String>,
}

impl SyncConfig {
    /// Load configuration from the secrets file and environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::load(&SECRET_PATHS, |key| std::env::var(key).ok())
    }

    /// Load configuration from the first readable file in `secret_paths`,
    /// taking everything else (and the credentials, if no file was found)
    /// from `lookup`.
    pub fn load<P: AsRef<Path>>(secret_paths: &[P], lookup: impl Fn(&str) -> Option<String>) -> Self {
        let (url, api_key, access_token) = load_backend_secrets(secret_paths, &lookup);
        let defaults = Self::default();

        Self {
            url,
            api_key,
            access_token,
            table: lookup("CREDIT_SYNC_TABLE").unwrap_or(defaults.table),
            decrement_rpc: lookup("CREDIT_SYNC_DECREMENT_RPC").unwrap_or(defaults.decrement_rpc),
            poll_interval_ms: parsed(&lookup, "CREDIT_SYNC_POLL_INTERVAL_MS")
                .unwrap_or(defaults.poll_interval_ms),
            request_timeout_seconds: parsed(&lookup, "CREDIT_SYNC_REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            debit_max_attempts: parsed(&lookup, "CREDIT_SYNC_DEBIT_MAX_ATTEMPTS")
                .unwrap_or(defaults.debit_max_attempts),
            user_id: lookup("CREDIT_SYNC_USER_ID"),
        }
    }

    /// Options for the REST gateway.
    #[must_use]
    pub fn rest_options(&self) -> RestOptions {
        RestOptions {
            table: self.table.clone(),
            decrement_rpc: self.decrement_rpc.clone(),
            timeout_seconds: self.request_timeout_seconds,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            access_token: self.access_token.clone(),
        }
    }

    /// Options for the controller.
    #[must_use]
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            debit_max_attempts: self.debit_max_attempts,
        }
    }

    /// Build the REST gateway.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Configuration` if the backend URL or API key is
    /// missing, or a gateway error if the HTTP client cannot be built.
    pub fn rest_gateway(&self) -> Result<RestGateway> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| SyncError::Configuration("CREDIT_SYNC_URL is not set".into()))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SyncError::Configuration("CREDIT_SYNC_API_KEY is not set".into()))?;
        Ok(RestGateway::with_options(url, api_key, self.rest_options())?)
    }

    /// The identity to sign in as.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Configuration` if it is missing or not a UUID.
    pub fn user_id(&self) -> Result<UserId> {
        self.user_id
            .as_deref()
            .ok_or_else(|| SyncError::Configuration("CREDIT_SYNC_USER_ID is not set".into()))?
            .parse()
            .map_err(|e| SyncError::Configuration(format!("CREDIT_SYNC_USER_ID: {e}")))
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable setting, using default");
            None
        }
    }
}

/// Load backend secrets from file or environment.
fn load_backend_secrets<P: AsRef<Path>>(
    secret_paths: &[P],
    lookup: &impl Fn(&str) -> Option<String>,
) -> (Option<String>, Option<String>, Option<String>) {
    for path in secret_paths {
        let path = path.as_ref();
        if let Ok(secrets) = load_secrets_file::<BackendSecrets>(path) {
            tracing::info!(path = %path.display(), "Loaded backend secrets from file");
            return (Some(secrets.url), Some(secrets.api_key), secrets.access_token);
        }
    }

    tracing::debug!("Backend secrets file not found, using environment variables");
    (
        lookup("CREDIT_SYNC_URL"),
        lookup("CREDIT_SYNC_API_KEY"),
        lookup("CREDIT_SYNC_ACCESS_TOKEN"),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &Path) -> std::result::Result<T, std::io::Error> {
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            access_token: None,
            table: "subscriptions".into(),
            decrement_rpc: "decrement_credits".into(),
            poll_interval_ms: 2000,
            request_timeout_seconds: 30,
            debit_max_attempts: DEFAULT_MAX_ATTEMPTS,
            user_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const NO_FILES: [&str; 0] = [];

    #[test]
    fn defaults_apply_without_settings() {
        let config = SyncConfig::load(&NO_FILES, env(&[]));
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.rest_options().poll_interval, Duration::from_secs(2));
        assert_eq!(config.sync_options().debit_max_attempts, 3);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = SyncConfig::load(
            &NO_FILES,
            env(&[
                ("CREDIT_SYNC_URL", "https://records.example.com"),
                ("CREDIT_SYNC_API_KEY", "anon"),
                ("CREDIT_SYNC_TABLE", "plans"),
                ("CREDIT_SYNC_POLL_INTERVAL_MS", "250"),
                ("CREDIT_SYNC_DEBIT_MAX_ATTEMPTS", "5"),
            ]),
        );
        assert_eq!(config.url.as_deref(), Some("https://records.example.com"));
        assert_eq!(config.table, "plans");
        assert_eq!(config.rest_options().poll_interval, Duration::from_millis(250));
        assert_eq!(config.debit_max_attempts, 5);
        assert!(config.rest_gateway().is_ok());
    }

    #[test]
    fn unparsable_numbers_fall_back() {
        let config = SyncConfig::load(
            &NO_FILES,
            env(&[("CREDIT_SYNC_REQUEST_TIMEOUT_SECONDS", "soon")]),
        );
        assert_eq!(config.request_timeout_seconds, 30);
    }

    #[test]
    fn secrets_file_wins_over_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credit-sync.json");
        std::fs::write(
            &path,
            r#"{"url": "https://file.example.com", "api_key": "from-file"}"#,
        )
        .unwrap();

        let missing = dir.path().join("missing.json");
        let config = SyncConfig::load(
            &[missing, path],
            env(&[("CREDIT_SYNC_API_KEY", "from-env")]),
        );
        assert_eq!(config.url.as_deref(), Some("https://file.example.com"));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn malformed_secrets_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credit-sync.json");
        std::fs::write(&path, "not json").unwrap();

        let config = SyncConfig::load(&[path], env(&[("CREDIT_SYNC_URL", "https://env.example.com")]));
        assert_eq!(config.url.as_deref(), Some("https://env.example.com"));
    }

    #[test]
    fn missing_credentials_are_a_configuration_error() {
        let err = SyncConfig::default().rest_gateway().unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn user_id_must_be_a_uuid() {
        let mut config = SyncConfig::default();
        assert!(matches!(config.user_id(), Err(SyncError::Configuration(_))));

        config.user_id = Some("not-a-uuid".into());
        assert!(matches!(config.user_id(), Err(SyncError::Configuration(_))));

        let user = UserId::generate();
        config.user_id = Some(user.to_string());
        assert_eq!(config.user_id().unwrap(), user);
    }
}
