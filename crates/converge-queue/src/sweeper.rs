// Visibility reclamation sweep.
//
// One sweeper per job: periodically returns processing items whose
// visibility window has expired back to pending. Handles workers that
// crashed after pop; reclaim never counts as a retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::WorkQueue;

/// Background task reclaiming expired items for one job.
pub struct VisibilitySweeper {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl VisibilitySweeper {
    /// Spawn a sweep loop for `job_id` running every `interval`.
    pub fn spawn(queue: Arc<dyn WorkQueue>, job_id: String, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => {
                        debug!(jobId = %job_id, "visibility sweeper stopping");
                        return;
                    }
                }
                match queue.reclaim_expired(&job_id).await {
                    Ok(reclaimed) if !reclaimed.is_empty() => {
                        debug!(jobId = %job_id, count = reclaimed.len(), "reclaimed expired items");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(jobId = %job_id, error = %e, "visibility sweep failed");
                    }
                }
            }
        });
        Self {
            handle,
            shutdown_tx,
        }
    }

    /// Signal the sweep loop to stop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}
