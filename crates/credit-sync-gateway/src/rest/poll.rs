//! Polling change feed.

use std::time::Duration;

use tokio::sync::mpsc;

use credit_sync_core::{ChangeEvent, SubscriptionRecord, UserId};

use super::client::Fetcher;

/// Turn two successive snapshots of one user's record into a change event.
///
/// Returns `None` when nothing the replica tracks has changed.
#[must_use]
pub fn diff_snapshots(
    user_id: UserId,
    previous: Option<&SubscriptionRecord>,
    current: Option<&SubscriptionRecord>,
) -> Option<ChangeEvent> {
    match (previous, current) {
        (None, None) => None,
        (None, Some(new)) => Some(ChangeEvent::inserted(new.clone())),
        (Some(old), None) => Some(ChangeEvent::deleted(user_id, Some(old.clone()))),
        (Some(old), Some(new)) => {
            let changed = old.credits != new.credits
                || old.preferred_language != new.preferred_language;
            changed.then(|| ChangeEvent::updated(Some(old.clone()), new.clone()))
        }
    }
}

/// Poll `user_id`'s record every `interval`, forwarding differences to `sender`.
///
/// Runs until the receiver is dropped or the task is aborted. Read failures
/// are logged and skipped; the baseline is kept so the next successful read
/// still produces the right event.
pub(crate) async fn poll_loop(
    fetcher: Fetcher,
    user_id: UserId,
    baseline: Option<SubscriptionRecord>,
    interval: Duration,
    sender: mpsc::UnboundedSender<ChangeEvent>,
) {
    let mut previous = baseline;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately; the baseline already covers it.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if sender.is_closed() {
            break;
        }

        let current = match fetcher.fetch_record(&user_id).await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(%user_id, error = %e, "Feed poll failed");
                continue;
            }
        };

        if let Some(event) = diff_snapshots(user_id, previous.as_ref(), current.as_ref()) {
            tracing::debug!(%user_id, kind = event.kind_name(), "Feed poll detected change");
            if sender.send(event).is_err() {
                break;
            }
        }
        previous = current;
    }

    tracing::debug!(%user_id, "Feed poll loop stopped");
}
