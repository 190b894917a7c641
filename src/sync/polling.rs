//! Polling strategy: fetch the full order list on a fixed interval.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ConnectionState, SyncCommand, SyncEngine, SyncSettings};
use crate::api::{ApiClient, ApiError};
use crate::orders::parse_snapshot;

/// Anything that can hand back the raw order collection.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_orders(&self) -> Result<Value, ApiError>;
}

#[async_trait]
impl OrderSource for ApiClient {
    async fn fetch_orders(&self) -> Result<Value, ApiError> {
        ApiClient::fetch_orders(self).await
    }
}

/// Session task body. The first tick fires immediately; a cycle always
/// finishes before the next one starts, so a slow fetch skips ticks rather
/// than overlapping.
pub(crate) async fn run(
    mut engine: SyncEngine,
    source: Arc<dyn OrderSource>,
    settings: SyncSettings,
    cancel: CancellationToken,
    mut commands: UnboundedReceiver<SyncCommand>,
) {
    info!(
        interval_secs = settings.poll_interval.as_secs(),
        "Order polling started"
    );
    let mut ticker = tokio::time::interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(command) = commands.recv() => match command {
                SyncCommand::Refresh => {
                    debug!("Manual refresh requested");
                    poll_once(&mut engine, source.as_ref(), &settings, &cancel).await;
                    ticker.reset();
                }
                SyncCommand::Forget(id) => engine.forget(&id),
            },
            _ = ticker.tick() => {
                poll_once(&mut engine, source.as_ref(), &settings, &cancel).await;
            }
        }
    }
    info!("Order polling stopped");
}

async fn poll_once(
    engine: &mut SyncEngine,
    source: &dyn OrderSource,
    settings: &SyncSettings,
    cancel: &CancellationToken,
) {
    let fetch = tokio::time::timeout(settings.fetch_timeout, source.fetch_orders());
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = fetch => result,
    };

    match result {
        Ok(Ok(payload)) => match parse_snapshot(&payload) {
            Some(snapshot) => {
                engine.set_connection(ConnectionState::Connected);
                engine.apply_snapshot(snapshot);
            }
            None => {
                warn!("Order feed returned a non-array payload, keeping last snapshot");
                engine.record_failure("order feed returned a non-array payload".to_string());
            }
        },
        Ok(Err(e)) => {
            warn!(error = %e, "Order fetch failed, keeping last snapshot");
            engine.set_connection(ConnectionState::Disconnected);
            engine.record_failure(e.to_string());
        }
        Err(_) => {
            warn!(
                timeout_secs = settings.fetch_timeout.as_secs(),
                "Order fetch timed out, keeping last snapshot"
            );
            engine.set_connection(ConnectionState::Disconnected);
            engine.record_failure("order fetch timed out".to_string());
        }
    }
}
