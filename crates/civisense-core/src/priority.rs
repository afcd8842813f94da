//! Priority Engine (C9): composes text, geo, cluster, and time-decay scores
//! into a final priority score, level, and machine-readable reason.

use chrono::{DateTime, Utc};

use crate::cluster::{self, NearbyComplaintCounter};
use crate::error::Result;
use crate::geo::{self, SensitiveLocationLookup};
use crate::text_scoring::TextScoringEngine;

/// Time-decay score is capped at this value, matching the cap on the text
/// base score's contribution from the other two terms.
const MAX_TIME_SCORE: f64 = 3.0;

/// A fully-composed priority result, ready to be written into
/// [`crate::domain::Priority`].
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityResult {
    /// Text-keyword base score, pre-multiplier.
    pub base_score: f64,
    /// Geo rule multiplier applied to `base_score`.
    pub geo_multiplier: f64,
    /// Label of the matched geo rule, or `"none"`.
    pub geo_context: String,
    /// Time-decay score, capped at [`MAX_TIME_SCORE`].
    pub time_score: f64,
    /// Number of nearby complaints found (see [`cluster::ClusterResult`]).
    pub cluster_count: i64,
    /// `1.0` or `0.0`.
    pub cluster_boost: f64,
    /// `round((base_score * geo_multiplier) + time_score + cluster_boost, 2)`.
    pub priority_score: f64,
    /// `"low"`, `"medium"`, or `"high"`.
    pub priority_level: &'static str,
    /// Machine-readable explanation of how the score was composed.
    pub reason: String,
    /// One-sentence, human-facing explanation of `reason`.
    pub reason_sentence: String,
}

/// Yields a copy of `result` with `priority_score` zeroed, `priority_level`
/// forced to `"low"`, and `reason`/`reason_sentence` replaced -- every
/// other component (text/geo/cluster/time breakdown) is preserved so the
/// written-back document still shows how the pre-override score was
/// composed.
#[must_use]
pub fn force_low(
    result: &PriorityResult,
    reason: impl Into<String>,
    reason_sentence: impl Into<String>,
) -> PriorityResult {
    PriorityResult {
        priority_score: 0.0,
        priority_level: "low",
        reason: reason.into(),
        reason_sentence: reason_sentence.into(),
        ..result.clone()
    }
}

/// Computes the full priority result for a complaint.
///
/// `title`/`description` are the complaint's text fields; `coordinates` its
/// location, if any; `created_at` its submission time, if any; `self_id` its
/// own id (excluded from the cluster count); `now` the evaluation instant.
#[allow(clippy::too_many_arguments)]
pub async fn compute(
    text_engine: &TextScoringEngine,
    title: Option<&str>,
    description: Option<&str>,
    coordinates: Option<(f64, f64)>,
    created_at: Option<DateTime<Utc>>,
    self_id: Option<&str>,
    now: DateTime<Utc>,
    geo_lookup: &dyn SensitiveLocationLookup,
    cluster_counter: &dyn NearbyComplaintCounter,
) -> Result<PriorityResult> {
    let text_result = text_engine.score(title, description);
    let geo_result = geo::resolve(coordinates, geo_lookup).await?;
    let cluster_result = cluster::detect(coordinates, self_id, now, cluster_counter).await?;
    let time_score = time_score(created_at, now);

    let priority_score = round2(
        (text_result.base_score * geo_result.multiplier) + time_score + cluster_result.cluster_boost,
    );
    let priority_level = map_level(priority_score);

    let reason = format!(
        "Text score={:.2} (high={}, medium={}, normal={}); Geo multiplier={:.2} ({}); \
         Time score={:.2}; Cluster boost={:.2} (count={})",
        text_result.base_score,
        text_result.high_count,
        text_result.medium_count,
        text_result.normal_count,
        geo_result.multiplier,
        geo_result.matched_type,
        time_score,
        cluster_result.cluster_boost,
        cluster_result.nearby_count,
    );
    let reason_sentence = reason_sentence(priority_level, priority_score, &geo_result.matched_type);

    Ok(PriorityResult {
        base_score: text_result.base_score,
        geo_multiplier: geo_result.multiplier,
        geo_context: geo_result.matched_type,
        time_score,
        cluster_count: cluster_result.nearby_count,
        cluster_boost: cluster_result.cluster_boost,
        priority_score,
        priority_level,
        reason,
        reason_sentence,
    })
}

/// Builds the one-sentence, human-facing counterpart to `reason`.
fn reason_sentence(level: &str, score: f64, geo_context: &str) -> String {
    let level_title = match level {
        "low" => "Low",
        "medium" => "Medium",
        _ => "High",
    };
    if geo_context == "none" {
        format!("Priority {level_title} with a composed score of {score:.2}.")
    } else {
        format!(
            "Priority {level_title} with a composed score of {score:.2}, raised by proximity to a {geo_context}."
        )
    }
}

/// `round(min(3.0, ln(days_pending + 1) * 2), 2)`, or `0.0` if `created_at`
/// is absent or in the future relative to `now`.
fn time_score(created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(created_at) = created_at else {
        return 0.0;
    };

    let elapsed_seconds = (now - created_at).num_milliseconds().max(0) as f64 / 1000.0;
    let days_pending = elapsed_seconds / 86_400.0;
    let score = (days_pending + 1.0).ln() * 2.0;
    round2(score.min(MAX_TIME_SCORE))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn map_level(score: f64) -> &'static str {
    if score < 3.0 {
        "low"
    } else if score <= 6.0 {
        "medium"
    } else {
        "high"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;

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
            _lookback_start: DateTime<Utc>,
            _excluded_id: Option<&str>,
            _limit: i64,
        ) -> Result<i64> {
            Ok(0)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 27, 12, 0, 0).unwrap()
    }

    #[test]
    fn time_score_is_zero_when_absent() {
        assert!((time_score(None, now()) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn time_score_grows_with_age() {
        let created = now() - chrono::Duration::days(10);
        let score = time_score(Some(created), now());
        assert!(score > 0.0);
        assert!(score <= MAX_TIME_SCORE);
    }

    #[test]
    fn time_score_caps_at_three() {
        let created = now() - chrono::Duration::days(3650);
        let score = time_score(Some(created), now());
        assert!((score - MAX_TIME_SCORE).abs() < 1e-9);
    }

    #[test]
    fn level_boundaries() {
        assert_eq!(map_level(2.99), "low");
        assert_eq!(map_level(3.0), "medium");
        assert_eq!(map_level(6.0), "medium");
        assert_eq!(map_level(6.01), "high");
    }

    #[tokio::test]
    async fn plain_recent_pothole_report_is_low_priority() {
        let engine = TextScoringEngine::new();
        let result = compute(
            &engine,
            Some("Pothole"),
            Some("small pothole near junction"),
            None,
            Some(now()),
            None,
            now(),
            &NoGeoMatch,
            &NoCluster,
        )
        .await
        .unwrap();
        assert_eq!(result.priority_level, "low");
        assert!((result.priority_score - result.base_score).abs() < 1e-9);
    }
}
