//! Duplicate & semantic validator (C10).
//!
//! Two independent checks applied after inference: whether this complaint
//! is a visual duplicate of a recent nearby complaint in the same category,
//! and whether the detector/classifier output plausibly matches the
//! claimed category.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::math_utils::{cosine_similarity, fingerprint_similarity, haversine_meters};
use crate::traits::{ClassificationResult, Detection, DuplicateCandidate};

/// Beyond this distance, two visually-similar complaints are treated as
/// coincidental rather than duplicate reports of the same incident.
pub const DUPLICATE_MAX_DISTANCE_METERS: f64 = 300.0;

/// Detector/classifier labels too generic to confirm OR refute any
/// category -- matching only these never counts as a semantic mismatch.
static GENERIC_TRAFFIC_TERMS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "person",
        "car",
        "truck",
        "bus",
        "motorcycle",
        "bicycle",
        "scooter",
        "vehicle",
        "traffic",
        "street",
        "road",
    ]
    .into_iter()
    .collect()
});

struct SemanticProfile {
    positive: &'static [&'static str],
    negative: &'static [&'static str],
}

const DEFAULT_NEGATIVE_TERMS: &[&str] = &[
    "bedroom",
    "kitchen",
    "sofa",
    "laptop",
    "keyboard",
    "television",
];

static SEMANTIC_PROFILES: LazyLock<HashMap<&'static str, SemanticProfile>> = LazyLock::new(|| {
    HashMap::from([
        (
            "garbage",
            SemanticProfile {
                positive: &[
                    "garbage", "trash", "waste", "litter", "bin", "dumpster", "refuse",
                    "landfill",
                ],
                negative: DEFAULT_NEGATIVE_TERMS,
            },
        ),
        (
            "drainage",
            SemanticProfile {
                positive: &["drain", "sewer", "gutter", "manhole", "pipe", "water", "flood", "hydrant"],
                negative: DEFAULT_NEGATIVE_TERMS,
            },
        ),
        (
            "water_leak",
            SemanticProfile {
                positive: &["leak", "pipe", "water", "flood", "hydrant", "valve", "tap"],
                negative: DEFAULT_NEGATIVE_TERMS,
            },
        ),
        (
            "pothole",
            SemanticProfile {
                positive: &["pothole", "road", "street", "asphalt", "pavement", "crack", "hole"],
                negative: DEFAULT_NEGATIVE_TERMS,
            },
        ),
        (
            "road_damage",
            SemanticProfile {
                positive: &["road", "street", "asphalt", "pavement", "crack", "damage", "hole"],
                negative: DEFAULT_NEGATIVE_TERMS,
            },
        ),
        (
            "streetlight",
            SemanticProfile {
                positive: &["traffic light", "streetlight", "street lamp", "lamp post", "lamppost"],
                negative: DEFAULT_NEGATIVE_TERMS,
            },
        ),
    ])
});

/// Outcome of the duplicate check.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateMatch {
    /// Whether all three duplicate conditions held.
    pub is_duplicate: bool,
    /// Best similarity found across all candidates, in `[0, 1]`.
    pub similarity: f64,
    /// The best-matching candidate's id, if any candidate had a comparable
    /// fingerprint/embedding.
    pub matched_complaint_id: Option<String>,
    /// Distance to the best-matching candidate, in meters.
    pub matched_distance_meters: Option<f64>,
    /// Whether the best-matching candidate shares this complaint's category.
    pub category_match: Option<bool>,
    /// Which comparison method produced the best match.
    pub method: Option<&'static str>,
}

fn no_match() -> DuplicateMatch {
    DuplicateMatch {
        is_duplicate: false,
        similarity: 0.0,
        matched_complaint_id: None,
        matched_distance_meters: None,
        category_match: None,
        method: None,
    }
}

/// Evaluates `candidates` against the current complaint's fingerprint and/or
/// embedding, keeping the single best-similarity match, then applies the
/// three duplicate conditions: similarity above `similarity_threshold`,
/// distance within [`DUPLICATE_MAX_DISTANCE_METERS`], and matching category.
#[must_use]
pub fn check_duplicate(
    current_fingerprint: Option<&str>,
    current_embedding: Option<&[f32]>,
    source_category: &str,
    source_coordinates: Option<(f64, f64)>,
    candidates: &[DuplicateCandidate],
    similarity_threshold: f64,
) -> DuplicateMatch {
    if current_fingerprint.is_none() && current_embedding.is_none() {
        return no_match();
    }

    let source_category = source_category.trim().to_lowercase();
    let mut best: Option<(f64, &DuplicateCandidate, &'static str)> = None;

    for candidate in candidates {
        let Some((similarity, method)) =
            similarity_and_method(current_fingerprint, current_embedding, candidate)
        else {
            continue;
        };

        let is_better = match &best {
            Some((best_similarity, _, _)) => similarity > *best_similarity,
            None => true,
        };
        if is_better {
            best = Some((similarity, candidate, method));
        }
    }

    let Some((similarity, candidate, method)) = best else {
        return no_match();
    };

    let distance = distance_between(source_coordinates, candidate.coordinates);
    let category_match = same_category(&source_category, candidate.category.as_deref());

    let duplicate_from_image = similarity > similarity_threshold;
    let duplicate_in_same_area = distance.is_some_and(|d| d <= DUPLICATE_MAX_DISTANCE_METERS);
    let duplicate_same_category = category_match.unwrap_or(false);

    DuplicateMatch {
        is_duplicate: duplicate_from_image && duplicate_in_same_area && duplicate_same_category,
        similarity: round6(similarity),
        matched_complaint_id: Some(candidate.id.clone()),
        matched_distance_meters: distance.map(round2),
        category_match,
        method: Some(method),
    }
}

/// Prefers the perceptual-hash comparison (`"dhash64"`) over the legacy
/// embedding cosine similarity (`"mobilenet_cosine_legacy"`) whenever both
/// sides have a fingerprint recorded.
fn similarity_and_method(
    current_fingerprint: Option<&str>,
    current_embedding: Option<&[f32]>,
    candidate: &DuplicateCandidate,
) -> Option<(f64, &'static str)> {
    if let (Some(current), Some(other)) = (current_fingerprint, candidate.image_fingerprint.as_deref()) {
        return Some((fingerprint_similarity(current, other), "dhash64"));
    }

    if let (Some(current), Some(other)) = (current_embedding, candidate.embedding.as_deref()) {
        return Some((cosine_similarity(current, other), "mobilenet_cosine_legacy"));
    }

    None
}

fn distance_between(source: Option<(f64, f64)>, other: Option<(f64, f64)>) -> Option<f64> {
    let (source_lng, source_lat) = source?;
    let (other_lng, other_lat) = other?;
    Some(haversine_meters(source_lng, source_lat, other_lng, other_lat))
}

fn same_category(source_category: &str, other_category: Option<&str>) -> Option<bool> {
    let other = other_category.unwrap_or_default().trim().to_lowercase();
    if source_category.is_empty() || other.is_empty() {
        return None;
    }
    Some(source_category == other)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Checks whether detector/classifier output plausibly matches `category`.
///
/// Returns `Some(true)` on a positive-term hit, `Some(false)` on a
/// negative-term hit with at least two signal phrases, and `None` when the
/// evidence is inconclusive (no profile for the category, no signals at
/// all, or every signal phrase is a generic traffic/street term).
#[must_use]
pub fn validate_category_semantics(
    category: &str,
    detections: &[Detection],
    detection_confidence_floor: f32,
    classification: Option<&ClassificationResult>,
) -> (Option<bool>, String) {
    let category = category.trim().to_lowercase();
    let Some(profile) = SEMANTIC_PROFILES.get(category.as_str()) else {
        return (None, "category_profile_missing".to_string());
    };

    let mut phrases: Vec<String> = detections
        .iter()
        .filter(|detection| detection.confidence >= detection_confidence_floor)
        .map(|detection| detection.label.to_lowercase())
        .collect();

    if let Some(classification) = classification {
        phrases.push(classification.label.to_lowercase());
        phrases.extend(classification.top_labels.iter().take(3).map(|l| l.to_lowercase()));
    }

    let normalized_phrases: Vec<String> = phrases
        .iter()
        .map(|phrase| normalize_phrase(phrase))
        .filter(|phrase| !phrase.is_empty())
        .collect();

    if normalized_phrases.is_empty() {
        return (None, "no_semantic_signals".to_string());
    }

    let positive_hits = match_terms(profile.positive, &normalized_phrases);
    if !positive_hits.is_empty() {
        return (Some(true), format!("positive:{}", joined_sorted(&positive_hits)));
    }

    let token_pool = token_pool(&normalized_phrases);
    if !token_pool.is_empty() && token_pool.iter().all(|t| GENERIC_TRAFFIC_TERMS.contains(t.as_str())) {
        return (None, format!("generic_only:{}", joined_sorted(&token_pool)));
    }

    let negative_hits = match_terms(profile.negative, &normalized_phrases);
    if !negative_hits.is_empty() && normalized_phrases.len() >= 2 {
        return (Some(false), format!("negative:{}", joined_sorted(&negative_hits)));
    }

    (None, "insufficient_semantic_signal".to_string())
}

fn normalize_phrase(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn match_terms(terms: &[&str], phrases: &[String]) -> HashSet<String> {
    terms
        .iter()
        .filter(|term| {
            let normalized = term.to_lowercase();
            phrases.iter().any(|phrase| phrase.contains(&normalized))
        })
        .map(|term| (*term).to_string())
        .collect()
}

fn token_pool(phrases: &[String]) -> HashSet<String> {
    phrases
        .iter()
        .flat_map(|phrase| phrase.split_whitespace().map(str::to_string))
        .collect()
}

fn joined_sorted(values: &HashSet<String>) -> String {
    let mut sorted: Vec<&str> = values.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        id: &str,
        fingerprint: Option<&str>,
        coordinates: Option<(f64, f64)>,
        category: Option<&str>,
    ) -> DuplicateCandidate {
        DuplicateCandidate {
            id: id.to_string(),
            image_fingerprint: fingerprint.map(str::to_string),
            embedding: None,
            coordinates,
            category: category.map(str::to_string),
        }
    }

    #[test]
    fn no_fingerprint_or_embedding_yields_no_match() {
        let result = check_duplicate(None, None, "pothole", None, &[], 0.9);
        assert!(!result.is_duplicate);
        assert_eq!(result.matched_complaint_id, None);
    }

    #[test]
    fn identical_fingerprint_nearby_same_category_is_duplicate() {
        let candidates = vec![candidate(
            "c1",
            Some("00ff00ff00ff00ff"),
            Some((77.5946, 12.9716)),
            Some("pothole"),
        )];
        let result = check_duplicate(
            Some("00ff00ff00ff00ff"),
            None,
            "pothole",
            Some((77.5946, 12.9716)),
            &candidates,
            0.9,
        );
        assert!(result.is_duplicate);
        assert_eq!(result.method, Some("dhash64"));
        assert_eq!(result.matched_complaint_id, Some("c1".to_string()));
    }

    #[test]
    fn far_away_match_is_not_duplicate() {
        let candidates = vec![candidate(
            "c1",
            Some("00ff00ff00ff00ff"),
            Some((80.2707, 13.0827)),
            Some("pothole"),
        )];
        let result = check_duplicate(
            Some("00ff00ff00ff00ff"),
            None,
            "pothole",
            Some((77.5946, 12.9716)),
            &candidates,
            0.9,
        );
        assert!(!result.is_duplicate);
    }

    #[test]
    fn mismatched_category_is_not_duplicate() {
        let candidates = vec![candidate(
            "c1",
            Some("00ff00ff00ff00ff"),
            Some((77.5946, 12.9716)),
            Some("garbage"),
        )];
        let result = check_duplicate(
            Some("00ff00ff00ff00ff"),
            None,
            "pothole",
            Some((77.5946, 12.9716)),
            &candidates,
            0.9,
        );
        assert!(!result.is_duplicate);
        assert_eq!(result.category_match, Some(false));
    }

    #[test]
    fn fingerprint_is_preferred_over_embedding_when_both_present() {
        let mut far_embedding_candidate = candidate("c1", None, Some((77.5946, 12.9716)), Some("pothole"));
        far_embedding_candidate.embedding = Some(vec![1.0, 0.0]);
        let near_fingerprint_candidate = candidate(
            "c2",
            Some("0000000000000000"),
            Some((77.5946, 12.9716)),
            Some("pothole"),
        );
        let candidates = vec![far_embedding_candidate, near_fingerprint_candidate];

        let result = check_duplicate(
            Some("0000000000000000"),
            Some(&[1.0, 0.0]),
            "pothole",
            Some((77.5946, 12.9716)),
            &candidates,
            0.5,
        );
        assert_eq!(result.method, Some("dhash64"));
        assert_eq!(result.matched_complaint_id, Some("c2".to_string()));
    }

    #[test]
    fn positive_detection_confirms_category() {
        let detections = vec![Detection {
            label: "pothole".to_string(),
            confidence: 0.9,
        }];
        let (outcome, note) = validate_category_semantics("pothole", &detections, 0.4, None);
        assert_eq!(outcome, Some(true));
        assert!(note.starts_with("positive:"));
    }

    #[test]
    fn low_confidence_detection_is_ignored() {
        let detections = vec![Detection {
            label: "pothole".to_string(),
            confidence: 0.1,
        }];
        let (outcome, note) = validate_category_semantics("pothole", &detections, 0.4, None);
        assert_eq!(outcome, None);
        assert_eq!(note, "no_semantic_signals");
    }

    #[test]
    fn unrelated_objects_flag_a_mismatch() {
        let classification = ClassificationResult {
            label: "sofa".to_string(),
            confidence: 0.8,
            top_labels: vec!["sofa".to_string(), "television".to_string()],
        };
        let (outcome, note) =
            validate_category_semantics("garbage", &[], 0.4, Some(&classification));
        assert_eq!(outcome, Some(false));
        assert!(note.starts_with("negative:"));
    }

    #[test]
    fn generic_traffic_terms_alone_are_inconclusive() {
        let detections = vec![Detection {
            label: "car".to_string(),
            confidence: 0.9,
        }];
        let (outcome, note) = validate_category_semantics("pothole", &detections, 0.4, None);
        assert_eq!(outcome, None);
        assert!(note.starts_with("generic_only:"));
    }

    #[test]
    fn unknown_category_has_no_profile() {
        let (outcome, note) = validate_category_semantics("unknown_category", &[], 0.4, None);
        assert_eq!(outcome, None);
        assert_eq!(note, "category_profile_missing");
    }
}
