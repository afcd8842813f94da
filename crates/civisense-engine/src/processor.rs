//! AI processing pipeline (C11): claim, fetch/decode, inference, semantic
//! check, priority compute, duplicate check, rule apply, write-back.
//!
//! Each inference stage (embed, classify, detect) is wrapped in its own
//! [`tokio::time::timeout`] and tolerated independently -- a slow or failing
//! model does not take down the whole complaint, it just leaves that
//! stage's `aiMeta` fields unset. A failed image fetch is treated the same
//! way: the complaint is scored on text/geo/cluster evidence alone, the same
//! as a complaint with no attached image.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use civisense_core::cluster::NearbyComplaintCounter;
use civisense_core::domain::{AiMeta, Complaint, DetectionSummary};
use civisense_core::geo::SensitiveLocationLookup;
use civisense_core::priority::{self, PriorityResult};
use civisense_core::text_scoring::TextScoringEngine;
use civisense_core::traits::{ClassificationResult, Classifier, Detection, Detector, DocumentStore, Embedder, ImageFetcher};
use civisense_core::validator;
use civisense_core::{Result, RuntimeStats, Settings};
use image::RgbImage;

/// Outcome of the best-effort image evidence gathering step: whatever
/// succeeded within its timeout, `None` where it didn't.
#[derive(Default)]
struct ImageEvidence {
    fingerprint: Option<String>,
    embedding: Option<Vec<f32>>,
    detections: Vec<Detection>,
    classification: Option<ClassificationResult>,
    /// Overrides the validator's semantic note when there was never a chance
    /// to gather visual evidence, rather than surfacing its generic
    /// "no signals" note.
    forced_semantic_note: Option<&'static str>,
}

/// Wires the document store, vision adapters, and pure scoring logic into a
/// single per-complaint pipeline.
pub struct AiProcessor {
    store: Arc<dyn DocumentStore>,
    geo_lookup: Arc<dyn SensitiveLocationLookup>,
    cluster_counter: Arc<dyn NearbyComplaintCounter>,
    image_fetcher: Arc<dyn ImageFetcher>,
    detector: Arc<dyn Detector>,
    classifier: Arc<dyn Classifier>,
    embedder: Arc<dyn Embedder>,
    text_engine: TextScoringEngine,
    settings: Settings,
    stats: Arc<RuntimeStats>,
}

impl AiProcessor {
    /// Builds a processor from its concrete adapters and configuration.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        geo_lookup: Arc<dyn SensitiveLocationLookup>,
        cluster_counter: Arc<dyn NearbyComplaintCounter>,
        image_fetcher: Arc<dyn ImageFetcher>,
        detector: Arc<dyn Detector>,
        classifier: Arc<dyn Classifier>,
        embedder: Arc<dyn Embedder>,
        settings: Settings,
        stats: Arc<RuntimeStats>,
    ) -> Self {
        Self {
            store,
            geo_lookup,
            cluster_counter,
            image_fetcher,
            detector,
            classifier,
            embedder,
            text_engine: TextScoringEngine::new(),
            settings,
            stats,
        }
    }

    /// Runs the full pipeline for `complaint_id`. Returns `Ok(())` once the
    /// document store reflects a terminal (`done` or `failed`) outcome --
    /// write-back failures surface as `Err` so the caller can log them, but
    /// the complaint's own failure has already been recorded in the store.
    pub async fn process(&self, complaint_id: &str) -> Result<()> {
        let Some(complaint) = self.store.claim_pending(complaint_id).await? else {
            tracing::debug!(complaint_id, "complaint no longer claimable, skipping");
            return Ok(());
        };

        match self.run_pipeline(&complaint).await {
            Ok(()) => {
                self.stats.record_success();
                self.stats.clear_retry_attempts(complaint_id);
                Ok(())
            }
            Err(err) => {
                self.stats.record_failure();
                let message = err.to_string();
                if let Err(store_err) = self.store.mark_failed(complaint_id, &message).await {
                    tracing::error!(complaint_id, error = %store_err, "failed to record AI processing failure");
                }
                Err(err)
            }
        }
    }

    async fn run_pipeline(&self, complaint: &Complaint) -> Result<()> {
        let evidence = self.gather_image_evidence(complaint).await;

        let (semantic_match, semantic_note) = match evidence.forced_semantic_note {
            Some(note) => (None, note.to_string()),
            None => validator::validate_category_semantics(
                &complaint.category,
                &evidence.detections,
                self.settings.yolo_min_confidence_for_severity,
                evidence.classification.as_ref(),
            ),
        };

        let now = Utc::now();
        let base_priority = priority::compute(
            &self.text_engine,
            complaint.title.as_deref(),
            complaint.description.as_deref(),
            complaint.coordinates(),
            complaint.created_at,
            Some(&complaint.id),
            now,
            self.geo_lookup.as_ref(),
            self.cluster_counter.as_ref(),
        )
        .await?;

        let lookback_start = now - chrono::Duration::days(self.settings.duplicate_lookback_days);
        let candidates = self
            .store
            .find_duplicate_candidates(&complaint.id, lookback_start, self.settings.duplicate_compare_limit)
            .await?;
        let duplicate = validator::check_duplicate(
            evidence.fingerprint.as_deref(),
            evidence.embedding.as_deref(),
            &complaint.category,
            complaint.coordinates(),
            &candidates,
            self.settings.duplicate_similarity_threshold,
        );

        let final_priority = if duplicate.is_duplicate {
            priority::force_low(
                &base_priority,
                "Duplicate complaint",
                "Flagged as a duplicate of a recently reported, nearby complaint in the same category.",
            )
        } else if semantic_match == Some(false) {
            append_semantic_fallback_note(&base_priority)
        } else {
            base_priority
        };

        // ai_blacklist persistence is opt-in: off the `blacklist-writeback` feature,
        // civisense-store::record_semantic_mismatch is never called, so the priority
        // pipeline never reads or writes it regardless of this complaint's outcome.
        #[cfg(feature = "blacklist-writeback")]
        if semantic_match == Some(false) {
            if let Some(user_id) = complaint.reported_by.as_deref() {
                if let Err(err) = self.store.record_semantic_mismatch(user_id).await {
                    tracing::warn!(
                        complaint_id = %complaint.id,
                        error = %err,
                        "failed to record semantic mismatch for blacklist tracking"
                    );
                }
            }
        }

        let ai_meta = AiMeta {
            processed_at: Some(now),
            is_ai_duplicate: Some(duplicate.is_duplicate),
            duplicate_similarity: Some(duplicate.similarity),
            duplicate_complaint_id: duplicate.matched_complaint_id,
            duplicate_distance_meters: duplicate.matched_distance_meters,
            duplicate_category_match: duplicate.category_match,
            duplicate_method: duplicate.method.map(str::to_string),
            image_fingerprint: evidence.fingerprint,
            embedding: evidence.embedding,
            yolo_top_detections: top_detections(&evidence.detections),
            mobilenet_top_label: evidence.classification.as_ref().map(|c| c.label.clone()),
            mobilenet_confidence: evidence.classification.as_ref().map(|c| c.confidence),
            mobilenet_top_labels: evidence.classification.as_ref().map(|c| c.top_labels.clone()),
            semantic_category_match: semantic_match,
            semantic_fallback_used: Some(semantic_match == Some(false)),
            semantic_note: Some(semantic_note),
            error: None,
        };

        self.store
            .mark_success(&complaint.id, &final_priority, &final_priority.reason_sentence, &ai_meta)
            .await
    }

    async fn gather_image_evidence(&self, complaint: &Complaint) -> ImageEvidence {
        let Some(url) = complaint.first_image_url() else {
            return ImageEvidence {
                forced_semantic_note: Some("no_image"),
                ..ImageEvidence::default()
            };
        };

        let image = match self.image_fetcher.fetch(url).await {
            Ok(image) => image,
            Err(err) => {
                tracing::warn!(complaint_id = %complaint.id, error = %err, "image fetch failed, scoring without visual evidence");
                return ImageEvidence {
                    forced_semantic_note: Some("image_unavailable"),
                    ..ImageEvidence::default()
                };
            }
        };

        let fingerprint = Some(civisense_core::math_utils::difference_hash(&image));
        let timeout = self.settings.inference_timeout();

        let embedding = self.run_embed(&image, timeout).await;
        let detections = self.run_detect(&image, timeout).await.unwrap_or_default();
        let classification = self.run_classify(&image, timeout).await;

        ImageEvidence {
            fingerprint,
            embedding,
            detections,
            classification,
            forced_semantic_note: None,
        }
    }

    async fn run_embed(&self, image: &RgbImage, timeout: Duration) -> Option<Vec<f32>> {
        match tokio::time::timeout(timeout, self.embedder.embed(image)).await {
            Ok(Ok(embedding)) => Some(embedding),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "embedding stage failed");
                None
            }
            Err(_) => {
                tracing::warn!(?timeout, "embedding stage timed out");
                None
            }
        }
    }

    async fn run_detect(&self, image: &RgbImage, timeout: Duration) -> Option<Vec<Detection>> {
        match tokio::time::timeout(timeout, self.detector.detect(image)).await {
            Ok(Ok(detections)) => Some(detections),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "detection stage failed");
                None
            }
            Err(_) => {
                tracing::warn!(?timeout, "detection stage timed out");
                None
            }
        }
    }

    async fn run_classify(&self, image: &RgbImage, timeout: Duration) -> Option<ClassificationResult> {
        match tokio::time::timeout(timeout, self.classifier.classify(image)).await {
            Ok(Ok(classification)) => Some(classification),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "classification stage failed");
                None
            }
            Err(_) => {
                tracing::warn!(?timeout, "classification stage timed out");
                None
            }
        }
    }
}

fn append_semantic_fallback_note(result: &PriorityResult) -> PriorityResult {
    PriorityResult {
        reason: format!("{}; Image semantic mismatch fallback applied", result.reason),
        reason_sentence: format!(
            "{} The attached image did not visually match the reported category.",
            result.reason_sentence
        ),
        ..result.clone()
    }
}

fn top_detections(detections: &[Detection]) -> Option<Vec<DetectionSummary>> {
    if detections.is_empty() {
        return None;
    }
    Some(
        detections
            .iter()
            .take(3)
            .map(|detection| DetectionSummary {
                label: detection.label.clone(),
                confidence: detection.confidence,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use civisense_core::domain::{BlacklistEntry, ComplaintImage, Priority};
    use civisense_core::traits::{ComplaintChangeStream, DuplicateCandidate};
    use std::sync::Mutex;

    struct FakeStore {
        complaint: Mutex<Option<Complaint>>,
        candidates: Vec<DuplicateCandidate>,
        success_calls: Mutex<Vec<(String, AiMeta)>>,
        failure_calls: Mutex<Vec<(String, String)>>,
        fail_duplicate_lookup: bool,
    }

    impl FakeStore {
        fn new(complaint: Complaint, candidates: Vec<DuplicateCandidate>) -> Self {
            Self {
                complaint: Mutex::new(Some(complaint)),
                candidates,
                success_calls: Mutex::new(Vec::new()),
                failure_calls: Mutex::new(Vec::new()),
                fail_duplicate_lookup: false,
            }
        }
    }

    #[async_trait]
    impl DocumentStore for FakeStore {
        async fn claim_pending(&self, _complaint_id: &str) -> Result<Option<Complaint>> {
            Ok(self.complaint.lock().unwrap().take())
        }

        async fn find_duplicate_candidates(
            &self,
            _exclude_id: &str,
            _lookback_start: chrono::DateTime<Utc>,
            _limit: i64,
        ) -> Result<Vec<DuplicateCandidate>> {
            if self.fail_duplicate_lookup {
                return Err(civisense_core::Error::Store("candidate lookup down".to_string()));
            }
            Ok(self.candidates.clone())
        }

        async fn count_pending(&self) -> Result<i64> {
            Ok(0)
        }

        async fn mark_success(
            &self,
            complaint_id: &str,
            _priority: &PriorityResult,
            _reason_sentence: &str,
            ai_meta: &AiMeta,
        ) -> Result<()> {
            self.success_calls
                .lock()
                .unwrap()
                .push((complaint_id.to_string(), ai_meta.clone()));
            Ok(())
        }

        async fn mark_failed(&self, complaint_id: &str, error_message: &str) -> Result<()> {
            self.failure_calls
                .lock()
                .unwrap()
                .push((complaint_id.to_string(), error_message.to_string()));
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
                updated_at: Utc::now(),
            })
        }

        async fn watch_pending_inserts(&self) -> Result<Option<Box<dyn ComplaintChangeStream>>> {
            Ok(None)
        }

        fn is_replica_set(&self) -> bool {
            false
        }
    }

    struct NoGeoMatch;

    #[async_trait]
    impl SensitiveLocationLookup for NoGeoMatch {
        async fn is_near_location_type(
            &self,
            _lng: f64,
            _lat: f64,
            _keywords: &[&str],
            _radius_meters: f64,
        ) -> Result<bool> {
            Ok(false)
        }
    }

    struct NoCluster;

    #[async_trait]
    impl NearbyComplaintCounter for NoCluster {
        async fn count_nearby_complaints(
            &self,
            _lng: f64,
            _lat: f64,
            _radius_meters: f64,
            _lookback_start: chrono::DateTime<Utc>,
            _excluded_id: Option<&str>,
            _limit: i64,
        ) -> Result<i64> {
            Ok(0)
        }
    }

    struct FakeImageFetcher {
        image: RgbImage,
    }

    #[async_trait]
    impl ImageFetcher for FakeImageFetcher {
        async fn fetch(&self, _url: &str) -> Result<RgbImage> {
            Ok(self.image.clone())
        }
    }

    struct NoImageFetcher;

    #[async_trait]
    impl ImageFetcher for NoImageFetcher {
        async fn fetch(&self, _url: &str) -> Result<RgbImage> {
            Err(civisense_core::Error::FetchFailed("connection refused".to_string()))
        }
    }

    struct FakeDetector(Vec<Detection>);

    #[async_trait]
    impl Detector for FakeDetector {
        async fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    struct FakeClassifier(Option<ClassificationResult>);

    #[async_trait]
    impl Classifier for FakeClassifier {
        async fn classify(&self, _image: &RgbImage) -> Result<ClassificationResult> {
            self.0
                .clone()
                .ok_or_else(|| civisense_core::Error::Inference("model unavailable".to_string()))
        }
    }

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, _image: &RgbImage) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    fn test_settings() -> Settings {
        Settings {
            mongo_uri: "mongodb://localhost:27017/civisense".to_string(),
            mongo_database: "civisense".to_string(),
            monitoring_bind_addr: "0.0.0.0:8080".to_string(),
            mongo_server_selection_timeout_ms: 5000,
            mongo_connect_timeout_ms: 10_000,
            mongo_allow_standalone_fallback: true,
            yolo_confidence_threshold: 0.25,
            yolo_image_size: 640,
            yolo_max_image_dimension: 1024,
            yolo_min_confidence_for_severity: 0.4,
            yolo_model_path: "models/yolov8n.onnx".to_string(),
            yolo_labels_path: "models/coco_classes.txt".to_string(),
            mobilenet_model_path: "models/mobilenetv2.onnx".to_string(),
            mobilenet_labels_path: "models/imagenet_classes.txt".to_string(),
            image_download_timeout_seconds: 15,
            image_max_bytes: 10 * 1024 * 1024,
            school_radius_meters: 2000,
            duplicate_similarity_threshold: 0.92,
            duplicate_lookback_days: 7,
            duplicate_compare_limit: 50,
            retry_interval_seconds: 60,
            max_retry_attempts: 3,
            retry_batch_size: 25,
            inference_timeout_seconds: 30,
        }
    }

    fn test_complaint(category: &str, image_url: Option<&str>) -> Complaint {
        Complaint {
            id: "507f1f77bcf86cd799439011".to_string(),
            category: category.to_string(),
            title: Some("Pothole".to_string()),
            description: Some("A pothole on the main road".to_string()),
            location: Some(civisense_core::domain::GeoPoint::new(77.5946, 12.9716)),
            created_at: Some(Utc::now() - chrono::Duration::hours(1)),
            images: image_url
                .map(|url| vec![ComplaintImage { url: url.to_string() }])
                .unwrap_or_default(),
            reported_by: Some("user-1".to_string()),
            priority: Priority::pending(),
        }
    }

    fn build_processor(store: Arc<FakeStore>, fetcher: Arc<dyn ImageFetcher>, detector: Arc<dyn Detector>, classifier: Arc<dyn Classifier>) -> AiProcessor {
        AiProcessor::new(
            store,
            Arc::new(NoGeoMatch),
            Arc::new(NoCluster),
            fetcher,
            detector,
            classifier,
            Arc::new(FakeEmbedder),
            test_settings(),
            Arc::new(RuntimeStats::new()),
        )
    }

    #[tokio::test]
    async fn no_candidates_is_not_a_duplicate_and_marks_success() {
        let store = Arc::new(FakeStore::new(test_complaint("pothole", None), Vec::new()));
        let processor = build_processor(
            Arc::clone(&store),
            Arc::new(NoImageFetcher),
            Arc::new(FakeDetector(Vec::new())),
            Arc::new(FakeClassifier(None)),
        );

        processor.process("507f1f77bcf86cd799439011").await.unwrap();

        let calls = store.success_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.is_ai_duplicate, Some(false));
    }

    #[tokio::test]
    async fn matching_fingerprint_nearby_same_category_is_flagged_duplicate() {
        let image = RgbImage::from_pixel(16, 16, image::Rgb([200, 50, 10]));
        let fingerprint = civisense_core::math_utils::difference_hash(&image);
        let candidate = DuplicateCandidate {
            id: "507f1f77bcf86cd799439099".to_string(),
            image_fingerprint: Some(fingerprint),
            embedding: None,
            coordinates: Some((77.5946, 12.9716)),
            category: Some("pothole".to_string()),
        };
        let store = Arc::new(FakeStore::new(
            test_complaint("pothole", Some("https://example.com/photo.jpg")),
            vec![candidate],
        ));
        let processor = build_processor(
            Arc::clone(&store),
            Arc::new(FakeImageFetcher { image }),
            Arc::new(FakeDetector(vec![Detection {
                label: "pothole".to_string(),
                confidence: 0.9,
            }])),
            Arc::new(FakeClassifier(Some(ClassificationResult {
                label: "street".to_string(),
                confidence: 0.8,
                top_labels: vec!["street".to_string()],
            }))),
        );

        processor.process("507f1f77bcf86cd799439011").await.unwrap();

        let calls = store.success_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.is_ai_duplicate, Some(true));
        assert_eq!(
            calls[0].1.duplicate_complaint_id,
            Some("507f1f77bcf86cd799439099".to_string())
        );
    }

    #[tokio::test]
    async fn semantic_mismatch_is_annotated_but_does_not_change_duplicate_status() {
        let store = Arc::new(FakeStore::new(
            test_complaint("garbage", Some("https://example.com/photo.jpg")),
            Vec::new(),
        ));
        let image = RgbImage::from_pixel(16, 16, image::Rgb([10, 10, 10]));
        let processor = build_processor(
            Arc::clone(&store),
            Arc::new(FakeImageFetcher { image }),
            Arc::new(FakeDetector(Vec::new())),
            Arc::new(FakeClassifier(Some(ClassificationResult {
                label: "sofa".to_string(),
                confidence: 0.9,
                top_labels: vec!["sofa".to_string(), "television".to_string()],
            }))),
        );

        processor.process("507f1f77bcf86cd799439011").await.unwrap();

        let calls = store.success_calls.lock().unwrap();
        assert_eq!(calls[0].1.semantic_category_match, Some(false));
        assert_eq!(calls[0].1.semantic_fallback_used, Some(true));
        assert_eq!(calls[0].1.is_ai_duplicate, Some(false));
    }

    #[tokio::test]
    async fn no_longer_claimable_complaint_is_skipped_without_write_back() {
        let store = Arc::new(FakeStore {
            complaint: Mutex::new(None),
            candidates: Vec::new(),
            success_calls: Mutex::new(Vec::new()),
            failure_calls: Mutex::new(Vec::new()),
            fail_duplicate_lookup: false,
        });
        let processor = build_processor(
            Arc::clone(&store),
            Arc::new(NoImageFetcher),
            Arc::new(FakeDetector(Vec::new())),
            Arc::new(FakeClassifier(None)),
        );

        processor.process("507f1f77bcf86cd799439011").await.unwrap();

        assert!(store.success_calls.lock().unwrap().is_empty());
        assert!(store.failure_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_error_after_claim_records_failure_and_returns_err() {
        let store = Arc::new(FakeStore {
            complaint: Mutex::new(Some(test_complaint("pothole", None))),
            candidates: Vec::new(),
            success_calls: Mutex::new(Vec::new()),
            failure_calls: Mutex::new(Vec::new()),
            fail_duplicate_lookup: true,
        });
        let processor = build_processor(
            Arc::clone(&store),
            Arc::new(NoImageFetcher),
            Arc::new(FakeDetector(Vec::new())),
            Arc::new(FakeClassifier(None)),
        );

        let result = processor.process("507f1f77bcf86cd799439011").await;

        assert!(result.is_err());
        assert_eq!(store.failure_calls.lock().unwrap().len(), 1);
        assert!(store.success_calls.lock().unwrap().is_empty());
    }
}
