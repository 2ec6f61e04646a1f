//! REST gateway implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use credit_sync_core::{RecordPatch, SubscriptionRecord, UserId};

use super::poll::poll_loop;
use super::types::{DecrementRequest, DecrementResponse, RecordRow, RestErrorResponse};
use crate::error::{GatewayError, Result};
use crate::{ChangeStream, Decrement, FeedHandle, RecordGateway};

/// Options for the REST gateway.
#[derive(Debug, Clone)]
pub struct RestOptions {
    /// Table holding subscription records (default: `subscriptions`).
    pub table: String,
    /// Name of the decrement function (default: `decrement_credits`).
    pub decrement_rpc: String,
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Interval between change-feed polls (default: 2s).
    pub poll_interval: Duration,
    /// User session token; the API key is used as bearer when absent.
    pub access_token: Option<String>,
}

impl Default for RestOptions {
    fn default() -> Self {
        Self {
            table: "subscriptions".to_string(),
            decrement_rpc: "decrement_credits".to_string(),
            timeout_seconds: 30,
            poll_interval: Duration::from_secs(2),
            access_token: None,
        }
    }
}

/// The part of the gateway a polling task needs: enough to read one record.
#[derive(Clone)]
pub(crate) struct Fetcher {
    client: Client,
    table_url: String,
    api_key: String,
    bearer: String,
}

impl Fetcher {
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.bearer))
    }

    pub(crate) async fn fetch_record(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionRecord>> {
        let response = self
            .authorize(self.client.get(&self.table_url))
            .query(&[("user_id", format!("eq.{user_id}")), ("select", "*".to_string())])
            .send()
            .await?;

        let rows: Vec<RecordRow> = handle_response(response).await?;
        Ok(rows.into_iter().next().map(RecordRow::into_record))
    }
}

struct Inner {
    fetcher: Fetcher,
    base_url: String,
    options: RestOptions,
    feeds: Arc<Mutex<FeedTasks>>,
    next_handle: AtomicU64,
}

type FeedTasks = HashMap<FeedHandle, JoinHandle<()>>;

fn lock_feeds(feeds: &Mutex<FeedTasks>) -> MutexGuard<'_, FeedTasks> {
    feeds.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, task) in lock_feeds(&self.feeds).drain() {
            task.abort();
        }
    }
}

/// HTTP gateway for a PostgREST-style backend.
///
/// Cheap to clone; clones share the HTTP client and the set of live feeds.
#[derive(Clone)]
pub struct RestGateway {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestGateway")
            .field("base_url", &self.inner.base_url)
            .field("table", &self.inner.options.table)
            .finish_non_exhaustive()
    }
}

impl RestGateway {
    /// Create a gateway with default options.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Backend URL (e.g., `"https://records.example.com"`)
    /// * `api_key` - Project API key sent as `apikey`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        Self::with_options(base_url, api_key, RestOptions::default())
    }

    /// Create a gateway with custom options.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: RestOptions,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build HTTP client: {e}")))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        let api_key = api_key.into();
        let fetcher = Fetcher {
            client,
            table_url: format!("{base_url}/rest/v1/{}", options.table),
            bearer: options.access_token.clone().unwrap_or_else(|| api_key.clone()),
            api_key,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                fetcher,
                base_url,
                options,
                feeds: Arc::new(Mutex::new(HashMap::new())),
                next_handle: AtomicU64::new(1),
            }),
        })
    }

    /// Base URL with any trailing slash removed.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Number of feeds currently polling.
    #[must_use]
    pub fn live_feeds(&self) -> usize {
        self.feeds().len()
    }

    fn feeds(&self) -> MutexGuard<'_, FeedTasks> {
        lock_feeds(&self.inner.feeds)
    }

    fn table_url(&self) -> &str {
        &self.inner.fetcher.table_url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        self.inner.fetcher.authorize(request)
    }

    fn client(&self) -> &Client {
        &self.inner.fetcher.client
    }
}

/// Handle a response and convert error statuses.
async fn handle_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if status.is_success() {
        let body = response.bytes().await?;
        return Ok(serde_json::from_slice(&body)?);
    }

    let message = match response.json::<RestErrorResponse>().await {
        Ok(body) => match body.code {
            Some(code) => format!("{code}: {}", body.message),
            None => body.message,
        },
        Err(_) => format!("HTTP {status}"),
    };

    Err(GatewayError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl RecordGateway for RestGateway {
    async fn read_record(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>> {
        self.inner.fetcher.fetch_record(user_id).await
    }

    async fn update_record(
        &self,
        user_id: &UserId,
        patch: &RecordPatch,
    ) -> Result<SubscriptionRecord> {
        let mut filters = vec![("user_id", format!("eq.{user_id}"))];
        if let Some(expected) = patch.expected_credits {
            filters.push(("credits", format!("eq.{expected}")));
        }

        let response = self
            .authorize(self.client().patch(self.table_url()))
            .header("Prefer", "return=representation")
            .query(&filters)
            .json(patch)
            .send()
            .await?;

        let rows: Vec<RecordRow> = handle_response(response).await?;
        match rows.into_iter().next() {
            Some(row) => Ok(row.into_record()),
            // No row matched: either the record is gone or the guard failed.
            None => match patch.expected_credits {
                Some(expected) if self.inner.fetcher.fetch_record(user_id).await?.is_some() => {
                    Err(GatewayError::Conflict { expected })
                }
                _ => Err(GatewayError::NotFound {
                    user_id: user_id.to_string(),
                }),
            },
        }
    }

    async fn decrement_credits(&self, user_id: &UserId) -> Result<Decrement> {
        let url = format!(
            "{}/rest/v1/rpc/{}",
            self.inner.base_url, self.inner.options.decrement_rpc
        );
        let response = self
            .authorize(self.client().post(&url))
            .json(&DecrementRequest {
                p_user_id: user_id.to_string(),
            })
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(rpc = %self.inner.options.decrement_rpc, "Decrement function not available");
            return Err(GatewayError::Unsupported("decrement_credits"));
        }

        let body: DecrementResponse = handle_response(response).await?;
        Ok(match (body.found, body.applied) {
            (false, _) => Decrement::Absent,
            (true, false) => Decrement::Exhausted,
            (true, true) => Decrement::Applied {
                remaining: u32::try_from(body.remaining.max(0)).unwrap_or(u32::MAX),
            },
        })
    }

    async fn subscribe_changes(&self, user_id: &UserId) -> Result<ChangeStream> {
        let baseline = self
            .inner
            .fetcher
            .fetch_record(user_id)
            .await
            .map_err(|e| GatewayError::Subscription(format!("baseline read failed: {e}")))?;

        let handle = FeedHandle::new(self.inner.next_handle.fetch_add(1, Ordering::Relaxed));
        let (sender, events) = mpsc::unbounded_channel();
        let poll = poll_loop(
            self.inner.fetcher.clone(),
            *user_id,
            baseline,
            self.inner.options.poll_interval,
            sender,
        );
        // The loop ends on its own once the receiver is dropped; deregister then.
        let registry = Arc::downgrade(&self.inner.feeds);
        let mut feeds = self.feeds();
        let task = tokio::spawn(async move {
            poll.await;
            if let Some(feeds) = registry.upgrade() {
                lock_feeds(&feeds).remove(&handle);
            }
        });
        feeds.insert(handle, task);
        drop(feeds);

        tracing::info!(%handle, %user_id, interval = ?self.inner.options.poll_interval, "Polling feed started");
        Ok(ChangeStream { handle, events })
    }

    async fn unsubscribe(&self, handle: FeedHandle) -> Result<()> {
        if let Some(task) = self.feeds().remove(&handle) {
            task.abort();
            tracing::info!(%handle, "Polling feed stopped");
        }
        Ok(())
    }
}
