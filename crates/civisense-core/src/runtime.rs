//! Process-wide runtime telemetry (C1).
//!
//! A single [`RuntimeStats`] instance is shared (behind an `Arc`) across the
//! change-stream listener, the queue worker, the retry reconciler, and the
//! monitoring HTTP surface. Fields are exposed behind atomics and a
//! `DashMap` rather than free globals.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

/// Process-wide counters and in-flight marker.
#[derive(Debug)]
pub struct RuntimeStats {
    started_at: Instant,
    processed_success: AtomicU64,
    processed_failed: AtomicU64,
    retried: AtomicU64,
    queue_enqueued: AtomicU64,
    in_flight_complaint_id: Mutex<Option<String>>,
    change_stream_running: AtomicBool,
    replica_set_enabled: AtomicBool,
    /// cid -> number of bounded reattempts already made.
    retry_attempts: DashMap<String, u32>,
}

impl Default for RuntimeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeStats {
    /// Constructs a fresh, zeroed set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            processed_success: AtomicU64::new(0),
            processed_failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            queue_enqueued: AtomicU64::new(0),
            in_flight_complaint_id: Mutex::new(None),
            change_stream_running: AtomicBool::new(false),
            replica_set_enabled: AtomicBool::new(false),
            retry_attempts: DashMap::new(),
        }
    }

    /// Seconds since this instance was constructed.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Increments the successful-completion counter.
    pub fn record_success(&self) {
        self.processed_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the failed-completion counter.
    pub fn record_failure(&self) {
        self.processed_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the reconciler-retry counter.
    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the queue-enqueue counter. Called once per successful
    /// (non-deduplicated) `enqueue`.
    pub fn record_enqueued(&self) {
        self.queue_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Sets the in-flight marker. Written only by the queue worker.
    pub fn set_in_flight(&self, cid: Option<String>) {
        *self.in_flight_complaint_id.lock() = cid;
    }

    /// Reads the in-flight marker.
    #[must_use]
    pub fn in_flight(&self) -> Option<String> {
        self.in_flight_complaint_id.lock().clone()
    }

    /// Sets whether the change-stream listener is currently connected.
    pub fn set_change_stream_running(&self, running: bool) {
        self.change_stream_running.store(running, Ordering::Relaxed);
    }

    /// Whether the change-stream listener is currently connected.
    #[must_use]
    pub fn change_stream_running(&self) -> bool {
        self.change_stream_running.load(Ordering::Relaxed)
    }

    /// Sets whether the document store was detected to be a replica set.
    pub fn set_replica_set_enabled(&self, enabled: bool) {
        self.replica_set_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether the document store was detected to be a replica set.
    #[must_use]
    pub fn replica_set_enabled(&self) -> bool {
        self.replica_set_enabled.load(Ordering::Relaxed)
    }

    /// The current reattempt count for `cid`, or 0 if never retried.
    #[must_use]
    pub fn retry_attempts(&self, cid: &str) -> u32 {
        self.retry_attempts.get(cid).map(|v| *v).unwrap_or(0)
    }

    /// Increments and returns the reattempt count for `cid`.
    pub fn increment_retry_attempts(&self, cid: &str) -> u32 {
        let mut entry = self.retry_attempts.entry(cid.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Clears the reattempt count for `cid`, on success or once the bounded
    /// cap is reached.
    pub fn clear_retry_attempts(&self, cid: &str) {
        self.retry_attempts.remove(cid);
    }

    /// Number of distinct cids currently tracked in the retry-attempt map.
    #[must_use]
    pub fn tracked_retry_attempts(&self) -> usize {
        self.retry_attempts.len()
    }

    /// A point-in-time, serializable snapshot for the `/stats` endpoint.
    #[must_use]
    pub fn snapshot(&self, queue_size: usize) -> RuntimeStatsSnapshot {
        RuntimeStatsSnapshot {
            uptime_seconds: self.uptime_seconds(),
            processed_success: self.processed_success.load(Ordering::Relaxed),
            processed_failed: self.processed_failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            queue_enqueued: self.queue_enqueued.load(Ordering::Relaxed),
            queue_size,
            in_flight_complaint_id: self.in_flight(),
            change_stream_running: self.change_stream_running(),
            replica_set_enabled: self.replica_set_enabled(),
            tracked_retry_attempts: self.tracked_retry_attempts(),
        }
    }
}

/// Serialized form of [`RuntimeStats`], returned by `GET /stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatsSnapshot {
    /// Seconds since process start.
    pub uptime_seconds: u64,
    /// Total complaints processed successfully.
    pub processed_success: u64,
    /// Total complaints that ended in a failed write-back.
    pub processed_failed: u64,
    /// Total reconciler-driven reattempts.
    pub retried: u64,
    /// Total successful (non-deduplicated) enqueues.
    pub queue_enqueued: u64,
    /// Current queue depth.
    pub queue_size: usize,
    /// cid currently being processed by the single worker, if any.
    pub in_flight_complaint_id: Option<String>,
    /// Whether the change-stream listener is connected.
    pub change_stream_running: bool,
    /// Whether the document store was detected to be a replica set.
    pub replica_set_enabled: bool,
    /// Number of cids with a nonzero retry-attempt count.
    pub tracked_retry_attempts: usize,
}
