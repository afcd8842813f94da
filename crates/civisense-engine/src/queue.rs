//! Deduplicated FIFO processing queue (C12).
//!
//! A bounded channel carries cids to a single worker; a side-set tracks which
//! cids are currently queued so a duplicate enqueue (the same complaint
//! re-announced by both the change-stream listener and the retry reconciler)
//! is a no-op rather than a second trip through the pipeline. The in-flight
//! marker lives on [`RuntimeStats`] rather than here, since the monitoring
//! surface reads it directly.

use std::collections::HashSet;
use std::sync::Arc;

use civisense_core::RuntimeStats;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};

use crate::processor::AiProcessor;

const QUEUE_CAPACITY: usize = 1024;

/// Bounded, deduplicated FIFO of complaint ids awaiting processing.
pub struct ProcessingQueue {
    sender: mpsc::Sender<String>,
    receiver: Mutex<mpsc::Receiver<String>>,
    queued: Mutex<HashSet<String>>,
    stats: Arc<RuntimeStats>,
}

impl ProcessingQueue {
    /// Builds an empty queue backed by [`RuntimeStats`] for telemetry.
    #[must_use]
    pub fn new(stats: Arc<RuntimeStats>) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            sender,
            receiver: Mutex::new(receiver),
            queued: Mutex::new(HashSet::new()),
            stats,
        }
    }

    /// Enqueues `complaint_id` unless it is already queued or currently
    /// in-flight. Returns `true` if this call actually enqueued it.
    pub async fn enqueue(&self, complaint_id: String) -> bool {
        if self.stats.in_flight().as_deref() == Some(complaint_id.as_str()) {
            return false;
        }

        {
            let mut queued = self.queued.lock().await;
            if !queued.insert(complaint_id.clone()) {
                return false;
            }
        }

        if self.sender.send(complaint_id.clone()).await.is_err() {
            // Receiver side only drops when the worker loop has ended, which
            // only happens at process shutdown.
            self.queued.lock().await.remove(&complaint_id);
            return false;
        }

        self.stats.record_enqueued();
        true
    }

    /// Current queue depth (queued, not yet dequeued into the worker).
    pub async fn len(&self) -> usize {
        self.queued.lock().await.len()
    }

    /// Runs the single worker loop: dequeue, mark in-flight, process, clear.
    /// Exits once `stopping` fires or the channel is closed.
    pub async fn run(&self, processor: &AiProcessor, mut stopping: tokio::sync::broadcast::Receiver<()>) {
        loop {
            let complaint_id = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = stopping.recv() => return,
                    next = receiver.recv() => match next {
                        Some(cid) => cid,
                        None => return,
                    },
                }
            };

            self.queued.lock().await.remove(&complaint_id);
            self.stats.set_in_flight(Some(complaint_id.clone()));

            let outcome = std::panic::AssertUnwindSafe(processor.process(&complaint_id))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(complaint_id = %complaint_id, error = %err, "AI processing failed");
                }
                Err(_) => {
                    tracing::error!(complaint_id = %complaint_id, "AI processing panicked");
                }
            }

            self.stats.set_in_flight(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_dedupes_against_queued_set() {
        let stats = Arc::new(RuntimeStats::new());
        let queue = ProcessingQueue::new(stats);
        assert!(queue.enqueue("c1".to_string()).await);
        assert!(!queue.enqueue("c1".to_string()).await);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn enqueue_dedupes_against_in_flight_marker() {
        let stats = Arc::new(RuntimeStats::new());
        stats.set_in_flight(Some("c1".to_string()));
        let queue = ProcessingQueue::new(stats);
        assert!(!queue.enqueue("c1".to_string()).await);
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn distinct_ids_both_enqueue() {
        let stats = Arc::new(RuntimeStats::new());
        let queue = ProcessingQueue::new(stats);
        assert!(queue.enqueue("c1".to_string()).await);
        assert!(queue.enqueue("c2".to_string()).await);
        assert_eq!(queue.len().await, 2);
    }
}
