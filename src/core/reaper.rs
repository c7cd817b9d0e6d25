// src/core/reaper.rs

use crate::metrics;
use crate::storage::PoolStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Periodically deletes used backups whose retention has run out.
pub struct BackupReaper {
    store: Arc<dyn PoolStore>,
    interval: Duration,
}

impl BackupReaper {
    pub fn new(store: Arc<dyn PoolStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// One sweep. Returns how many backups were removed.
    pub async fn run_once(&self) -> usize {
        match self.store.reap_backups(Utc::now()).await {
            Ok(reaped) if reaped.is_empty() => {
                debug!("Reaper found no expired backups");
                0
            }
            Ok(reaped) => {
                metrics::record_backups_reaped(reaped.len());
                info!(count = reaped.len(), ids = ?reaped, "Reaped expired backups");
                reaped.len()
            }
            Err(e) => {
                // Следующий тик попробует снова
                error!(error = %e, "Backup reaper sweep failed");
                0
            }
        }
    }

    /// Runs until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = self.interval.as_secs(), "Backup reaper started");
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = timer.tick() => {
                        self.run_once().await;
                    }
                }
            }
            info!("Backup reaper stopped");
        })
    }
}
