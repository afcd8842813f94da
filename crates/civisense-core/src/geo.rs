//! Sensitive-location geo multiplier rule table (C7).
//!
//! The rule table and keyword matching are pure; the actual "is there a
//! sensitive location of this type within range" lookup is delegated to a
//! [`SensitiveLocationLookup`] implementation (the concrete Mongo-backed
//! geo-index/fallback-scan machinery lives in `civisense-store`, mirroring
//! the polymorphism-over-collection-backends design).

use async_trait::async_trait;

use crate::error::Result;

/// Radius, in meters, within which a sensitive location counts as "near".
pub const GEO_RADIUS_METERS: f64 = 2000.0;

/// One row of the geo multiplier rule table: the matched type's label, its
/// score multiplier, and the keywords checked against a location's
/// `type`/`name`/`category` fields.
#[derive(Debug, Clone, Copy)]
pub struct GeoRule {
    /// Label surfaced in [`GeoMultiplierResult::matched_type`].
    pub location_type: &'static str,
    /// Multiplier applied to the text base score when matched.
    pub multiplier: f64,
    /// Case-insensitive substrings checked against a candidate location.
    pub keywords: &'static [&'static str],
}

/// Rule table, evaluated in order; the first matching rule wins.
pub const GEO_RULES: &[GeoRule] = &[
    GeoRule {
        location_type: "school",
        multiplier: 1.5,
        keywords: &["school"],
    },
    GeoRule {
        location_type: "hospital",
        multiplier: 1.4,
        keywords: &["hospital", "clinic", "medical"],
    },
    GeoRule {
        location_type: "metro",
        multiplier: 1.2,
        keywords: &["metro", "subway", "station"],
    },
];

/// Outcome of resolving a complaint's geo multiplier.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMultiplierResult {
    /// The multiplier to apply to the text base score.
    pub multiplier: f64,
    /// The matched rule's label, or `"none"` if no rule matched.
    pub matched_type: String,
}

/// Abstraction over "is a sensitive location matching any of `keywords`
/// within `radius_meters` of `(lng, lat)`", backed by a geo index when
/// available and a linear fallback scan otherwise.
#[async_trait]
pub trait SensitiveLocationLookup: Send + Sync {
    /// Returns whether any sensitive location matching `keywords` lies
    /// within `radius_meters` of `(lng, lat)`.
    async fn is_near_location_type(
        &self,
        lng: f64,
        lat: f64,
        keywords: &[&str],
        radius_meters: f64,
    ) -> Result<bool>;
}

/// Resolves the geo multiplier for a complaint's coordinates by walking
/// [`GEO_RULES`] in order and returning the first match.
pub async fn resolve(
    coordinates: Option<(f64, f64)>,
    lookup: &dyn SensitiveLocationLookup,
) -> Result<GeoMultiplierResult> {
    let Some((lng, lat)) = coordinates else {
        return Ok(none_result());
    };

    for rule in GEO_RULES {
        if lookup
            .is_near_location_type(lng, lat, rule.keywords, GEO_RADIUS_METERS)
            .await?
        {
            return Ok(GeoMultiplierResult {
                multiplier: rule.multiplier,
                matched_type: rule.location_type.to_string(),
            });
        }
    }

    Ok(none_result())
}

fn none_result() -> GeoMultiplierResult {
    GeoMultiplierResult {
        multiplier: 1.0,
        matched_type: "none".to_string(),
    }
}

/// Whether a sensitive location's `type`/`name`/`category` text contains any
/// of `keywords`, case-insensitively. Used by the fallback-scan path in
/// `civisense-store`.
#[must_use]
pub fn matches_keywords(type_name_category: &[&str], keywords: &[&str]) -> bool {
    let joined = type_name_category
        .iter()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    keywords.iter().any(|keyword| joined.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFalse;

    #[async_trait]
    impl SensitiveLocationLookup for AlwaysFalse {
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

    struct MatchesType(&'static str);

    #[async_trait]
    impl SensitiveLocationLookup for MatchesType {
        async fn is_near_location_type(
            &self,
            _lng: f64,
            _lat: f64,
            keywords: &[&str],
            _radius_meters: f64,
        ) -> Result<bool> {
            Ok(keywords.contains(&self.0))
        }
    }

    #[tokio::test]
    async fn no_coordinates_yields_none_result() {
        let lookup = AlwaysFalse;
        let result = resolve(None, &lookup).await.unwrap();
        assert_eq!(result.matched_type, "none");
        assert!((result.multiplier - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn no_match_yields_none_result() {
        let lookup = AlwaysFalse;
        let result = resolve(Some((77.5, 12.9)), &lookup).await.unwrap();
        assert_eq!(result.matched_type, "none");
    }

    #[tokio::test]
    async fn school_rule_wins_when_first_matching() {
        let lookup = MatchesType("school");
        let result = resolve(Some((77.5, 12.9)), &lookup).await.unwrap();
        assert_eq!(result.matched_type, "school");
        assert!((result.multiplier - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn hospital_rule_matches_clinic_keyword() {
        let lookup = MatchesType("clinic");
        let result = resolve(Some((77.5, 12.9)), &lookup).await.unwrap();
        assert_eq!(result.matched_type, "hospital");
        assert!((result.multiplier - 1.4).abs() < 1e-9);
    }

    #[test]
    fn matches_keywords_is_case_insensitive() {
        assert!(matches_keywords(
            &["Govt Primary SCHOOL", ""],
            &["school"]
        ));
        assert!(!matches_keywords(&["community hall"], &["school"]));
    }
}
