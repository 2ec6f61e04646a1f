//! Lifecycle controller.
//!
//! [`CreditSync`] is the entry point collaborators hold. It ties the change
//! feed to the signed-in identity: starting a session subscribes and performs
//! the first read, switching identity tears the old feed down completely
//! before the new one opens, and teardown unsubscribes and resets the replica.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;

use credit_sync_core::{Language, Phase, RecordPatch, Replica, UserId};
use credit_sync_gateway::{GatewayError, RecordGateway};

use crate::debit::{self, DebitOutcome, DEFAULT_MAX_ATTEMPTS};
use crate::error::{Result, SyncError};
use crate::feed::FeedListener;
use crate::init;
use crate::publisher::{self, Publisher, ReplicaReader};
use crate::store::{SessionEpoch, StateStore};

/// Runtime knobs of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Guarded read-modify-write attempts per debit when the gateway has no
    /// atomic decrement.
    pub debit_max_attempts: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            debit_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

struct ActiveSession {
    user_id: UserId,
    epoch: SessionEpoch,
    feed: Option<FeedListener>,
}

struct Inner {
    gateway: Arc<dyn RecordGateway>,
    store: Arc<StateStore>,
    publisher: Publisher,
    options: SyncOptions,
    // Held across gateway calls so lifecycle transitions never interleave.
    session: Mutex<Option<ActiveSession>>,
}

/// Client-side replica of one user's subscription and credits.
#[derive(Clone)]
pub struct CreditSync {
    inner: Arc<Inner>,
}

impl fmt::Debug for CreditSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreditSync")
            .field("session", &self.inner.store.session())
            .field("replica", &self.inner.store.replica())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl CreditSync {
    /// Create a controller with no signed-in identity.
    #[must_use]
    pub fn new(gateway: Arc<dyn RecordGateway>, publisher: Publisher, options: SyncOptions) -> Self {
        let store = Arc::new(StateStore::new(publisher.clone()));
        Self {
            inner: Arc::new(Inner {
                gateway,
                store,
                publisher,
                options,
                session: Mutex::new(None),
            }),
        }
    }

    /// Create a controller publishing into the process-wide cell.
    #[must_use]
    pub fn with_global_publisher(gateway: Arc<dyn RecordGateway>, options: SyncOptions) -> Self {
        Self::new(gateway, publisher::global().clone(), options)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Bind `user_id`, subscribe to its changes and perform the first read.
    ///
    /// A different identity that is still bound is torn down first. Calling
    /// this again for the identity that is already ready does nothing; for an
    /// identity whose setup failed it retries.
    ///
    /// # Errors
    ///
    /// - `SyncError::SubscriptionSetup` if the feed could not be opened.
    /// - `SyncError::Network` (or another mapped gateway error) if the first read failed.
    ///
    /// In both cases the identity stays bound and uninitialized; call
    /// [`initialize`](Self::initialize) to retry.
    pub async fn start_session(&self, user_id: UserId) -> Result<Replica> {
        let mut guard = self.inner.session.lock().await;

        if let Some(active) = guard.as_ref() {
            if active.user_id == user_id {
                if self.inner.store.phase().is_ready() {
                    tracing::debug!(%user_id, "Session already ready");
                    return Ok(self.inner.store.replica());
                }
            } else {
                tracing::info!(from = %active.user_id, to = %user_id, "Switching identity");
                if let Some(previous) = guard.take() {
                    self.close(previous).await;
                }
            }
        }

        let active = guard.get_or_insert_with(|| {
            let epoch = self.inner.store.begin_session(user_id);
            tracing::info!(%user_id, %epoch, "Session started");
            ActiveSession {
                user_id,
                epoch,
                feed: None,
            }
        });

        self.bring_up(active).await
    }

    /// Retry setup of the bound identity after a failed feed subscription or
    /// first read. Returns the current replica if it is already ready.
    ///
    /// # Errors
    ///
    /// - `SyncError::NoIdentity` if no identity is bound.
    /// - Setup errors as for [`start_session`](Self::start_session).
    pub async fn initialize(&self) -> Result<Replica> {
        let mut guard = self.inner.session.lock().await;
        let active = guard.as_mut().ok_or(SyncError::NoIdentity)?;
        if self.inner.store.phase().is_ready() {
            return Ok(self.inner.store.replica());
        }
        self.bring_up(active).await
    }

    /// Unsubscribe, unbind the identity and reset the replica.
    ///
    /// Debits still in flight are not cancelled; their results are discarded
    /// when they come back.
    pub async fn teardown(&self) {
        let mut guard = self.inner.session.lock().await;
        match guard.take() {
            Some(active) => {
                let user_id = active.user_id;
                self.close(active).await;
                tracing::info!(%user_id, "Session torn down");
            }
            None => tracing::debug!("Teardown without a bound identity"),
        }
    }

    async fn bring_up(&self, active: &mut ActiveSession) -> Result<Replica> {
        if active.feed.is_none() {
            let feed = FeedListener::start(
                self.inner.gateway.as_ref(),
                Arc::clone(&self.inner.store),
                active.user_id,
                active.epoch,
            )
            .await?;
            active.feed = Some(feed);
        }
        init::initialize(self.inner.gateway.as_ref(), &self.inner.store, active.epoch).await
    }

    async fn close(&self, active: ActiveSession) {
        if let Some(feed) = active.feed {
            feed.stop(self.inner.gateway.as_ref()).await;
        }
        self.inner.store.end_session();
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The bound identity, if any.
    #[must_use]
    pub fn identity(&self) -> Option<UserId> {
        self.inner.store.session().map(|session| session.user_id)
    }

    /// Lifecycle phase of the bound identity.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.store.phase()
    }

    /// Current replica, without waiting.
    #[must_use]
    pub fn replica(&self) -> Replica {
        self.inner.store.replica()
    }

    /// A reader of the published replica, usable from other tasks and threads.
    #[must_use]
    pub fn reader(&self) -> ReplicaReader {
        self.inner.publisher.reader()
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Take one credit for a completed billable action.
    ///
    /// # Errors
    ///
    /// Failed gateway calls and `SyncError::ConflictOrRace`. The replica is
    /// left unchanged and nothing is retried.
    pub async fn on_billable_action_completed(&self) -> Result<DebitOutcome> {
        debit::debit(
            self.inner.gateway.as_ref(),
            &self.inner.store,
            self.inner.options.debit_max_attempts,
        )
        .await
    }

    /// Change the preferred language.
    ///
    /// The replica is updated right away; the change feed later confirms it.
    /// A user without a record keeps the choice locally.
    ///
    /// # Errors
    ///
    /// - `SyncError::NoIdentity` / `SyncError::NotReady` outside a ready session.
    /// - Mapped gateway errors; the previous language is restored unless a
    ///   newer one arrived through the feed in the meantime.
    pub async fn set_preferred_language(&self, language: Language) -> Result<Replica> {
        let session = self.inner.store.session().ok_or(SyncError::NoIdentity)?;
        if !session.phase.is_ready() {
            return Err(SyncError::NotReady {
                phase: session.phase,
            });
        }

        let user_id = session.user_id;
        let previous = self.inner.store.replica().preferred_language;
        let replica = self.inner.store.apply_language(session.epoch, language)?;

        match self
            .inner
            .gateway
            .update_record(&user_id, &RecordPatch::language(language))
            .await
        {
            Ok(_) => {
                tracing::info!(%user_id, %language, "Preferred language updated");
                Ok(self.inner.store.replica())
            }
            Err(GatewayError::NotFound { .. }) => {
                tracing::debug!(%user_id, %language, "No record, keeping language locally");
                Ok(replica)
            }
            Err(e) => {
                tracing::error!(%user_id, %language, error = %e, "Language update failed");
                match self.inner.store.revert_language(session.epoch, language, previous) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(%user_id, "Newer language arrived meanwhile, not reverting");
                    }
                    Err(_) => tracing::warn!(%user_id, "Session ended during language update"),
                }
                Err(e.into())
            }
        }
    }
}
