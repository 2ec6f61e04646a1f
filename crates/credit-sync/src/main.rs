//! credit-syncd - keeps one user's credit replica in sync and logs every change.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credit_sync::{CreditSync, SyncConfig};

const RETRY_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,credit_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting credit-syncd");

    let config = SyncConfig::from_env();
    let user_id = config.user_id()?;
    let gateway = config.rest_gateway()?;

    tracing::info!(
        url = %gateway.base_url(),
        table = %config.table,
        poll_interval_ms = config.poll_interval_ms,
        debit_max_attempts = config.debit_max_attempts,
        "Configuration loaded"
    );

    let sync = CreditSync::with_global_publisher(Arc::new(gateway), config.sync_options());
    let mut replicas = Box::pin(sync.reader().into_stream());

    if let Err(e) = sync.start_session(user_id).await {
        // The session stays bound; a later retry can still succeed.
        tracing::error!(%user_id, error = %e, retryable = e.is_retryable(), "Session setup failed");
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut retry = tokio::time::interval(RETRY_INTERVAL);
    retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    retry.tick().await;

    loop {
        tokio::select! {
            replica = replicas.next() => {
                let Some(replica) = replica else { break };
                tracing::info!(
                    subscribed = replica.is_subscribed,
                    credits = replica.credits,
                    language = %replica.preferred_language,
                    initialized = replica.is_initialized,
                    "Replica"
                );
            }
            _ = retry.tick(), if !sync.phase().is_ready() => {
                match sync.initialize().await {
                    Ok(replica) => tracing::info!(%user_id, credits = replica.credits, "Session setup recovered"),
                    Err(e) => tracing::warn!(%user_id, error = %e, "Session setup retry failed"),
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    sync.teardown().await;
    Ok(())
}
