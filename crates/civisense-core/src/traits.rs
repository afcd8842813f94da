//! Async seams between pure decision logic (this crate) and the concrete
//! adapters in `civisense-store` and `civisense-vision`. Polymorphism lives
//! at the collection-backend/inference-backend boundary, not in the
//! scoring logic itself -- callers depend on these traits, never on
//! `mongodb` or `ort` types directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbImage;

use crate::domain::{BlacklistEntry, Complaint};
use crate::error::Result;

/// A single object-detector bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Class label.
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

/// A classifier's top label plus its runner-up labels.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    /// Most confident label.
    pub label: String,
    /// Confidence of `label`, in `[0, 1]`.
    pub confidence: f32,
    /// Up to 3 labels, most confident first (including `label`).
    pub top_labels: Vec<String>,
}

/// Object detection over a decoded image.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Runs detection, returning zero or more boxes above the configured
    /// confidence floor.
    async fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>>;
}

/// Scene classification over a decoded image.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classifies the image, returning the top label and its runners-up.
    async fn classify(&self, image: &RgbImage) -> Result<ClassificationResult>;
}

/// Embedding extraction over a decoded image, for legacy cosine-similarity
/// duplicate comparisons.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Extracts an L2-normalized feature vector.
    async fn embed(&self, image: &RgbImage) -> Result<Vec<f32>>;
}

/// Fetches and decodes a complaint's attached image.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Downloads `url`, enforcing a byte-size cap and content-type check,
    /// and decodes it to RGB.
    async fn fetch(&self, url: &str) -> Result<RgbImage>;
}

/// A duplicate-check candidate, pre-filtered to complaints with some
/// similarity fingerprint already recorded.
#[derive(Debug, Clone)]
pub struct DuplicateCandidate {
    /// The candidate complaint's id.
    pub id: String,
    /// The candidate's perceptual hash, if recorded.
    pub image_fingerprint: Option<String>,
    /// The candidate's embedding, if recorded (legacy method).
    pub embedding: Option<Vec<f32>>,
    /// The candidate's coordinates, if any.
    pub coordinates: Option<(f64, f64)>,
    /// The candidate's category, as persisted (not necessarily parseable).
    pub category: Option<String>,
}

/// The complaint document store: claim/write-back lifecycle, candidate
/// lookups for the priority and duplicate-validation stages, and the
/// change-stream / retry-reconciler data paths.
///
/// A single implementation (`civisense-store`) backs this with MongoDB; the
/// geo-index-vs-fallback-scan degradation lives entirely inside that
/// implementation, behind [`crate::geo::SensitiveLocationLookup`] and
/// [`crate::cluster::NearbyComplaintCounter`], both of which this trait's
/// implementations are expected to also implement.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Atomically transitions a pending, unprocessed complaint to
    /// `processing` and returns it. Returns `Ok(None)` if the complaint is
    /// missing or not claimable (already claimed, already done, or not
    /// found by id).
    async fn claim_pending(&self, complaint_id: &str) -> Result<Option<Complaint>>;

    /// Candidates for duplicate comparison: complaints other than
    /// `exclude_id`, created on or after `lookback_start`, that have
    /// recorded a fingerprint or embedding, most recent first, capped at
    /// `limit`.
    async fn find_duplicate_candidates(
        &self,
        exclude_id: &str,
        lookback_start: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DuplicateCandidate>>;

    /// Count of complaints still in `pending` status, for the monitoring
    /// surface.
    async fn count_pending(&self) -> Result<i64>;

    /// Marks `complaint_id` as successfully processed, writing the final
    /// priority and `aiMeta`.
    async fn mark_success(
        &self,
        complaint_id: &str,
        priority: &crate::priority::PriorityResult,
        reason_sentence: &str,
        ai_meta: &crate::domain::AiMeta,
    ) -> Result<()>;

    /// Marks `complaint_id` as failed, recording a truncated error message.
    /// The complaint stays in `failed` status until the retry reconciler
    /// promotes it back to `pending` via [`Self::requeue_failed`].
    async fn mark_failed(&self, complaint_id: &str, error_message: &str) -> Result<()>;

    /// Lists complaint ids still in `pending` status, oldest first, up to
    /// `limit` -- the reconciler's "never got enqueued" sweep.
    async fn find_claimable_pending(&self, limit: i64) -> Result<Vec<String>>;

    /// Lists complaint ids in `failed` status, oldest first, up to `limit`
    /// -- candidates for [`Self::requeue_failed`].
    async fn find_failed_for_retry(&self, limit: i64) -> Result<Vec<String>>;

    /// Atomically transitions `complaint_id` from `failed` back to
    /// `pending`. Returns `true` if this call performed the transition
    /// (i.e. the complaint was still `failed`), `false` if it had already
    /// moved on (e.g. concurrently reclaimed).
    async fn requeue_failed(&self, complaint_id: &str) -> Result<bool>;

    /// Upserts a blacklist mismatch-count increment for `user_id`. Only
    /// called when the `blacklist-writeback` feature is enabled.
    async fn record_semantic_mismatch(&self, user_id: &str) -> Result<BlacklistEntry>;

    /// Opens a change stream over newly inserted, still-pending complaints.
    /// Returns `Ok(None)` when the backing store is not a replica set (no
    /// change-stream support); the caller falls back to the retry
    /// reconciler's periodic sweep in that case.
    async fn watch_pending_inserts(&self) -> Result<Option<Box<dyn ComplaintChangeStream>>>;

    /// Whether the backing store was detected to be a replica set (and
    /// therefore supports change streams without a standalone rewrite).
    fn is_replica_set(&self) -> bool;
}

/// An open change-stream cursor over newly inserted, pending complaints.
#[async_trait]
pub trait ComplaintChangeStream: Send {
    /// Awaits the next inserted complaint id, or `Ok(None)` if the stream
    /// ended (the caller should reopen it).
    async fn next_complaint_id(&mut self) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_and_classification_are_plain_data() {
        let detection = Detection {
            label: "pothole".to_string(),
            confidence: 0.8,
        };
        assert_eq!(detection.label, "pothole");

        let classification = ClassificationResult {
            label: "manhole".to_string(),
            confidence: 0.5,
            top_labels: vec!["manhole".to_string(), "drain".to_string()],
        };
        assert_eq!(classification.top_labels.len(), 2);
    }
}
