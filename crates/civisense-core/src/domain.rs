//! Document-model types. Field names match the persisted BSON spellings
//! (`aiProcessed`, not `ai_processed`) since the backing store is
//! document-oriented and the wire format is the persisted format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The six complaint categories the system understands, case-insensitive on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// A pothole or similar road-surface hazard.
    Pothole,
    /// Uncollected garbage or litter.
    Garbage,
    /// Blocked or overflowing drainage.
    Drainage,
    /// A broken or non-functional streetlight.
    Streetlight,
    /// A leaking water main or pipe.
    WaterLeak,
    /// Road damage distinct from a single pothole.
    RoadDamage,
}

impl Category {
    /// Parses a category from free-form, case-insensitive text.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "pothole" => Some(Self::Pothole),
            "garbage" => Some(Self::Garbage),
            "drainage" => Some(Self::Drainage),
            "streetlight" => Some(Self::Streetlight),
            "water_leak" | "water-leak" | "waterleak" => Some(Self::WaterLeak),
            "road_damage" | "road-damage" | "roaddamage" => Some(Self::RoadDamage),
            _ => None,
        }
    }

    /// The canonical lowercase, snake_case spelling used in semantic
    /// profile lookups and equality comparisons.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pothole => "pothole",
            Self::Garbage => "garbage",
            Self::Drainage => "drainage",
            Self::Streetlight => "streetlight",
            Self::WaterLeak => "water_leak",
            Self::RoadDamage => "road_damage",
        }
    }
}

/// A GeoJSON-like point: `{type: "Point", coordinates: [lng, lat]}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Longitude, then latitude (GeoJSON order).
    pub coordinates: (f64, f64),
}

impl GeoPoint {
    /// Constructs a point from (longitude, latitude).
    #[must_use]
    pub fn new(lng: f64, lat: f64) -> Self {
        Self {
            coordinates: (lng, lat),
        }
    }

    /// Longitude.
    #[must_use]
    pub fn lng(&self) -> f64 {
        self.coordinates.0
    }

    /// Latitude.
    #[must_use]
    pub fn lat(&self) -> f64 {
        self.coordinates.1
    }
}

/// An attached image reference; only `url` is consumed by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplaintImage {
    /// The image URL. May be empty; the first non-empty entry across
    /// `images` is the one the core fetches.
    pub url: String,
}

/// Processing status of a complaint's AI priority assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProcessingStatus {
    /// Claimable: not yet picked up by a worker.
    Pending,
    /// Claimed by a worker; pipeline in flight.
    Processing,
    /// Pipeline completed successfully.
    Done,
    /// Completed, flagged for human review.
    ReviewRequired,
    /// Pipeline failed; eligible for bounded reattempt.
    Failed,
}

/// The priority sub-document: both the claim state and, once written, the
/// computed priority fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Priority {
    /// Whether the AI pipeline has produced a final result for this complaint.
    #[serde(rename = "aiProcessed")]
    pub ai_processed: bool,
    /// The claim/processing state machine's current value.
    #[serde(rename = "aiProcessingStatus")]
    pub ai_processing_status: AiProcessingStatus,
    /// Final composed score, once processed.
    pub score: Option<f64>,
    /// Mapped level (`low`/`medium`/`high`), once processed.
    pub level: Option<String>,
    /// Machine-oriented explanation of how the score was composed.
    pub reason: Option<String>,
    /// One-sentence, human-facing explanation.
    #[serde(rename = "reasonSentence")]
    pub reason_sentence: Option<String>,
}

impl Priority {
    /// A fresh, unprocessed priority sub-document.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            ai_processed: false,
            ai_processing_status: AiProcessingStatus::Pending,
            score: None,
            level: None,
            reason: None,
            reason_sentence: None,
        }
    }
}

/// A top-3 detector label with its confidence, as persisted in `aiMeta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSummary {
    /// The detector's label for this bounding box.
    pub label: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Metadata written back by the AI processor, on both success and failure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AiMeta {
    /// When the write-back occurred.
    #[serde(rename = "processedAt", skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// Whether the duplicate validator flagged this complaint as a repeat.
    #[serde(rename = "isAIDuplicate", skip_serializing_if = "Option::is_none")]
    pub is_ai_duplicate: Option<bool>,
    /// Similarity score against the best-matching candidate, in `[0, 1]`.
    #[serde(rename = "duplicateSimilarity", skip_serializing_if = "Option::is_none")]
    pub duplicate_similarity: Option<f64>,
    /// cid of the best-matching candidate, if any.
    #[serde(rename = "duplicateComplaintId", skip_serializing_if = "Option::is_none")]
    pub duplicate_complaint_id: Option<String>,
    /// Distance in meters to the best-matching candidate.
    #[serde(
        rename = "duplicateDistanceMeters",
        skip_serializing_if = "Option::is_none"
    )]
    pub duplicate_distance_meters: Option<f64>,
    /// Whether the best-matching candidate shares this complaint's category.
    #[serde(
        rename = "duplicateCategoryMatch",
        skip_serializing_if = "Option::is_none"
    )]
    pub duplicate_category_match: Option<bool>,
    /// Which similarity method produced the best match.
    #[serde(rename = "duplicateMethod", skip_serializing_if = "Option::is_none")]
    pub duplicate_method: Option<String>,
    /// The 64-bit perceptual hash of this complaint's image, hex-encoded.
    #[serde(rename = "imageFingerprint", skip_serializing_if = "Option::is_none")]
    pub image_fingerprint: Option<String>,
    /// The embedding vector, when successfully extracted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Top-3 detector outputs by confidence.
    #[serde(rename = "yoloTopDetections", skip_serializing_if = "Option::is_none")]
    pub yolo_top_detections: Option<Vec<DetectionSummary>>,
    /// The classifier's top label.
    #[serde(rename = "mobilenetTopLabel", skip_serializing_if = "Option::is_none")]
    pub mobilenet_top_label: Option<String>,
    /// The classifier's confidence in its top label.
    #[serde(
        rename = "mobilenetConfidence",
        skip_serializing_if = "Option::is_none"
    )]
    pub mobilenet_confidence: Option<f32>,
    /// Up to 3 classifier labels, most confident first.
    #[serde(rename = "mobilenetTopLabels", skip_serializing_if = "Option::is_none")]
    pub mobilenet_top_labels: Option<Vec<String>>,
    /// Ternary semantic-match outcome for category vs. visual content.
    #[serde(
        rename = "semanticCategoryMatch",
        skip_serializing_if = "Option::is_none"
    )]
    pub semantic_category_match: Option<bool>,
    /// Whether the semantic-mismatch annotation was applied to `reason`.
    #[serde(rename = "semanticFallbackUsed", skip_serializing_if = "Option::is_none")]
    pub semantic_fallback_used: Option<bool>,
    /// Short machine-readable reason for the semantic outcome.
    #[serde(rename = "semanticNote", skip_serializing_if = "Option::is_none")]
    pub semantic_note: Option<String>,
    /// The trimmed, truncated error message, set only on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The unit of work: a civic complaint record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Complaint {
    /// Opaque identifier, serialized as a hex string at this crate's
    /// boundary; `civisense-store` is responsible for mapping to/from
    /// `bson::oid::ObjectId`.
    #[serde(rename = "_id")]
    pub id: String,
    /// One of the six known categories, free text if parsing failed.
    pub category: String,
    /// Optional headline.
    pub title: Option<String>,
    /// Optional free-text body.
    pub description: Option<String>,
    /// Optional GeoJSON point.
    pub location: Option<GeoPoint>,
    /// Submission timestamp; naive values are treated as UTC.
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    /// Ordered image references; the first non-empty URL is used.
    #[serde(default)]
    pub images: Vec<ComplaintImage>,
    /// Opaque submitting-user id.
    #[serde(rename = "reportedBy")]
    pub reported_by: Option<String>,
    /// Claim state and, once processed, priority fields.
    pub priority: Priority,
}

impl Complaint {
    /// The first non-empty image URL, per the "first non-empty URL is
    /// used" rule -- the full `images` list is scanned, not merely index 0.
    #[must_use]
    pub fn first_image_url(&self) -> Option<&str> {
        self.images
            .iter()
            .map(|image| image.url.trim())
            .find(|url| !url.is_empty())
    }

    /// The complaint's coordinates, if a location is present.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.location.map(|point| point.coordinates)
    }

    /// The category, case-folded, or an empty string if absent.
    #[must_use]
    pub fn category_lower(&self) -> String {
        self.category.trim().to_lowercase()
    }
}

/// A read-only sensitive location, matched by keyword and proximity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitiveLocation {
    /// Display name.
    pub name: String,
    /// Free-text type, e.g. `"school"`, `"hospital"`.
    #[serde(rename = "type")]
    pub location_type: String,
    /// Free-text category, e.g. matches against the same rule keywords as
    /// `type` and `name`.
    pub category: Option<String>,
    /// Location of the sensitive site.
    pub location: Option<GeoPoint>,
}

/// Historical blacklist entry; writes are gated behind the
/// `blacklist-writeback` feature and this type is never read by the
/// priority pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    /// The submitting user id, unique.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Running count of semantic mismatches attributed to this user.
    #[serde(rename = "mismatchCount")]
    pub mismatch_count: u32,
    /// Whether this user has crossed the (unread) blacklist threshold.
    pub blacklisted: bool,
    /// Last time this entry was updated.
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}
