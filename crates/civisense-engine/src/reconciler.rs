//! Retry reconciler (C14): periodic safety net that re-enqueues complaints
//! the change-stream path missed (startup backlog, missed events), and
//! promotes `failed` complaints back to `pending` up to a per-cid attempt
//! cap.
//!
//! Runs an immediate sweep at startup -- before the first interval tick --
//! since a restart is exactly the moment a backlog is most likely to exist.

use std::sync::Arc;

use civisense_core::traits::DocumentStore;
use civisense_core::{RuntimeStats, Settings};

use crate::queue::ProcessingQueue;

/// Sweeps `pending` and `failed` complaints on a timer, requeuing and
/// enqueuing as needed.
pub struct RetryReconciler {
    store: Arc<dyn DocumentStore>,
    queue: Arc<ProcessingQueue>,
    stats: Arc<RuntimeStats>,
    settings: Settings,
}

impl RetryReconciler {
    /// Builds a reconciler over `store`, feeding `queue`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, queue: Arc<ProcessingQueue>, stats: Arc<RuntimeStats>, settings: Settings) -> Self {
        Self {
            store,
            queue,
            stats,
            settings,
        }
    }

    /// Runs until `stopping` fires: one sweep immediately, then one per
    /// `retry_interval`.
    pub async fn run(&self, mut stopping: tokio::sync::broadcast::Receiver<()>) {
        self.sweep_once().await;

        let mut ticker = tokio::time::interval(self.settings.retry_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; we've already swept above.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = stopping.recv() => return,
                _ = ticker.tick() => self.sweep_once().await,
            }
        }
    }

    async fn sweep_once(&self) {
        self.sweep_pending().await;
        self.sweep_failed().await;
    }

    async fn sweep_pending(&self) {
        let pending = match self.store.find_claimable_pending(self.settings.retry_batch_size).await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::warn!(error = %err, "reconciler failed to list pending complaints");
                return;
            }
        };

        for complaint_id in pending {
            self.queue.enqueue(complaint_id).await;
        }
    }

    async fn sweep_failed(&self) {
        let failed = match self.store.find_failed_for_retry(self.settings.retry_batch_size).await {
            Ok(failed) => failed,
            Err(err) => {
                tracing::warn!(error = %err, "reconciler failed to list failed complaints");
                return;
            }
        };

        for complaint_id in failed {
            if self.stats.retry_attempts(&complaint_id) >= self.settings.max_retry_attempts {
                tracing::debug!(complaint_id = %complaint_id, "max retry attempts exhausted, leaving failed");
                continue;
            }

            match self.store.requeue_failed(&complaint_id).await {
                Ok(true) => {
                    self.stats.increment_retry_attempts(&complaint_id);
                    self.stats.record_retry();
                    self.queue.enqueue(complaint_id).await;
                }
                Ok(false) => {
                    // Already moved on (reclaimed or reprocessed elsewhere).
                }
                Err(err) => {
                    tracing::warn!(complaint_id = %complaint_id, error = %err, "failed to requeue failed complaint");
                }
            }
        }
    }
}
