//! Background removal of expired and exhausted resources.

use crate::services::storage_service::StorageService;
use chrono::Utc;
use std::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

/// Spawn a task purging expired resources every `interval`.
pub fn spawn(storage: StorageService, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match storage.purge_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!("Purged {} expired resources", removed),
                Err(err) => tracing::error!("Expiry sweep failed: {}", err),
            }
        }
    })
}
