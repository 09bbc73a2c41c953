//! Background job: purge read notifications past the retention period.
//!
//! Runs hourly. Unread notifications are never touched, however old.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time;

use crate::store::NotificationStore;

/// Spawn the background cleanup task. Call this once at startup.
pub fn spawn(store: Arc<dyn NotificationStore>, retention: chrono::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(3600)); // every hour
        loop {
            interval.tick().await;
            if let Err(e) = purge_expired(store.as_ref(), retention).await {
                tracing::error!("cleanup job failed: {}", e);
            }
        }
    })
}

pub async fn purge_expired(
    store: &dyn NotificationStore,
    retention: chrono::Duration,
) -> anyhow::Result<u64> {
    let cutoff = Utc::now() - retention;
    let purged = store.purge_read_before(cutoff).await?;
    if purged > 0 {
        tracing::info!(rows = purged, %cutoff, "purged read notifications");
    }
    Ok(purged)
}
