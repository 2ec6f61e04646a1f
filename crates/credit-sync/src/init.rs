//! Initialization sequencer.

use credit_sync_core::Replica;
use credit_sync_gateway::RecordGateway;

use crate::error::Result;
use crate::store::{SessionEpoch, StateStore};

/// Perform the first authoritative read for the session `epoch` and publish it.
///
/// A missing record is a valid answer (trial user). A failed read puts the
/// session back to `Uninitialized` and is returned to the caller; defaults are
/// never assumed.
///
/// # Errors
///
/// - `SyncError::Network` (or another mapped gateway error) if the read fails.
/// - `SyncError::StaleSession` if the session ended while the read was in flight.
/// - `SyncError::NotReady` if the session already initialized or is initializing.
pub async fn initialize(
    gateway: &dyn RecordGateway,
    store: &StateStore,
    epoch: SessionEpoch,
) -> Result<Replica> {
    let user_id = store.mark_initializing(epoch)?;
    tracing::debug!(%user_id, %epoch, "Reading subscription record");

    match gateway.read_record(&user_id).await {
        Ok(record) => store.complete_initialization(epoch, record.as_ref()),
        Err(e) => {
            store.abort_initialization(epoch);
            tracing::error!(%user_id, %epoch, error = %e, "Initial read failed, replica stays uninitialized");
            Err(e.into())
        }
    }
}
