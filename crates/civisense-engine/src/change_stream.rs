//! Change-stream listener (C13): pushes newly inserted pending complaints
//! onto the processing queue as they're written, so they don't wait for the
//! retry reconciler's next sweep.
//!
//! Only meaningful against a replica set. Against a standalone deployment
//! [`civisense_core::traits::DocumentStore::watch_pending_inserts`] returns
//! `Ok(None)` and this listener sits idle forever -- the reconciler's
//! periodic pending sweep is the only delivery path in that configuration.

use std::sync::Arc;
use std::time::Duration;

use civisense_core::traits::DocumentStore;
use civisense_core::RuntimeStats;

use crate::queue::ProcessingQueue;

/// Reconnect backoff after a change stream errors or closes unexpectedly.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Subscribes to the document store's change stream and feeds the queue.
pub struct ChangeStreamListener {
    store: Arc<dyn DocumentStore>,
    queue: Arc<ProcessingQueue>,
    stats: Arc<RuntimeStats>,
}

impl ChangeStreamListener {
    /// Builds a listener over `store`, feeding `queue`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, queue: Arc<ProcessingQueue>, stats: Arc<RuntimeStats>) -> Self {
        Self { store, queue, stats }
    }

    /// Runs until `stopping` fires. Idle no-op if the store isn't a replica
    /// set; otherwise subscribes, reconnecting with [`RECONNECT_BACKOFF`] on
    /// any error or unexpected stream close.
    pub async fn run(&self, mut stopping: tokio::sync::broadcast::Receiver<()>) {
        if !self.store.is_replica_set() {
            tracing::info!("document store is not a replica set, change-stream listener staying idle");
            let _ = stopping.recv().await;
            return;
        }

        loop {
            let stream = tokio::select! {
                biased;
                _ = stopping.recv() => return,
                opened = self.store.watch_pending_inserts() => opened,
            };

            let mut stream = match stream {
                Ok(Some(stream)) => stream,
                Ok(None) => {
                    tracing::warn!("watch_pending_inserts returned no stream despite replica-set detection, backing off");
                    if self.wait_or_stop(&mut stopping).await {
                        return;
                    }
                    continue;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to open change stream, retrying");
                    if self.wait_or_stop(&mut stopping).await {
                        return;
                    }
                    continue;
                }
            };

            self.stats.set_change_stream_running(true);
            tracing::info!("change-stream listener connected");

            loop {
                let next = tokio::select! {
                    biased;
                    _ = stopping.recv() => {
                        self.stats.set_change_stream_running(false);
                        return;
                    }
                    next = stream.next_complaint_id() => next,
                };

                match next {
                    Ok(Some(complaint_id)) => {
                        self.queue.enqueue(complaint_id).await;
                    }
                    Ok(None) => {
                        tracing::warn!("change stream closed, reconnecting");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "change stream errored, reconnecting");
                        break;
                    }
                }
            }

            self.stats.set_change_stream_running(false);
            if self.wait_or_stop(&mut stopping).await {
                return;
            }
        }
    }

    /// Sleeps for [`RECONNECT_BACKOFF`], returning `true` if `stopping` fired
    /// first (caller should exit rather than reconnect).
    async fn wait_or_stop(&self, stopping: &mut tokio::sync::broadcast::Receiver<()>) -> bool {
        tokio::select! {
            biased;
            _ = stopping.recv() => true,
            () = tokio::time::sleep(RECONNECT_BACKOFF) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use civisense_core::domain::{AiMeta, BlacklistEntry, Complaint};
    use civisense_core::priority::PriorityResult;
    use civisense_core::traits::{ComplaintChangeStream, DuplicateCandidate};
    use civisense_core::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;
    use tokio::time::{timeout, Duration as StdDuration};

    struct FakeChangeStream {
        delivered: bool,
    }

    #[async_trait]
    impl ComplaintChangeStream for FakeChangeStream {
        async fn next_complaint_id(&mut self) -> Result<Option<String>> {
            if self.delivered {
                return Ok(None);
            }
            self.delivered = true;
            Ok(Some("c1".to_string()))
        }
    }

    struct FakeStore {
        replica_set: bool,
        watch_calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for FakeStore {
        async fn claim_pending(&self, _complaint_id: &str) -> Result<Option<Complaint>> {
            Ok(None)
        }

        async fn find_duplicate_candidates(
            &self,
            _exclude_id: &str,
            _lookback_start: chrono::DateTime<chrono::Utc>,
            _limit: i64,
        ) -> Result<Vec<DuplicateCandidate>> {
            Ok(Vec::new())
        }

        async fn count_pending(&self) -> Result<i64> {
            Ok(0)
        }

        async fn mark_success(
            &self,
            _complaint_id: &str,
            _priority: &PriorityResult,
            _reason_sentence: &str,
            _ai_meta: &AiMeta,
        ) -> Result<()> {
            Ok(())
        }

        async fn mark_failed(&self, _complaint_id: &str, _error_message: &str) -> Result<()> {
            Ok(())
        }

        async fn find_claimable_pending(&self, _limit: i64) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn find_failed_for_retry(&self, _limit: i64) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn requeue_failed(&self, _complaint_id: &str) -> Result<bool> {
            Ok(false)
        }

        async fn record_semantic_mismatch(&self, user_id: &str) -> Result<BlacklistEntry> {
            Ok(BlacklistEntry {
                user_id: user_id.to_string(),
                mismatch_count: 0,
                blacklisted: false,
                updated_at: chrono::Utc::now(),
            })
        }

        async fn watch_pending_inserts(&self) -> Result<Option<Box<dyn ComplaintChangeStream>>> {
            let call = self.watch_calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(Some(Box::new(FakeChangeStream { delivered: false })))
            } else {
                std::future::pending::<()>().await;
                unreachable!("listener should have been stopped before a second reconnect");
            }
        }

        fn is_replica_set(&self) -> bool {
            self.replica_set
        }
    }

    #[tokio::test]
    async fn idle_listener_exits_as_soon_as_stopping_fires() {
        let store: Arc<dyn DocumentStore> = Arc::new(FakeStore {
            replica_set: false,
            watch_calls: AtomicUsize::new(0),
        });
        let stats = Arc::new(RuntimeStats::new());
        let queue = Arc::new(ProcessingQueue::new(Arc::clone(&stats)));
        let listener = ChangeStreamListener::new(store, queue, stats);

        let (stopping_tx, stopping_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { listener.run(stopping_rx).await });
        stopping_tx.send(()).unwrap();

        timeout(StdDuration::from_millis(500), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn enqueues_complaint_ids_delivered_by_the_open_change_stream() {
        let store: Arc<dyn DocumentStore> = Arc::new(FakeStore {
            replica_set: true,
            watch_calls: AtomicUsize::new(0),
        });
        let stats = Arc::new(RuntimeStats::new());
        let queue = Arc::new(ProcessingQueue::new(Arc::clone(&stats)));
        let listener = ChangeStreamListener::new(store, Arc::clone(&queue), stats);

        let (stopping_tx, stopping_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { listener.run(stopping_rx).await });

        timeout(StdDuration::from_millis(500), async {
            loop {
                if queue.len().await == 1 {
                    return;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        stopping_tx.send(()).unwrap();
        timeout(StdDuration::from_millis(500), handle).await.unwrap().unwrap();
    }
}
