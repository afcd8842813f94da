//! Nearby-complaint cluster boost (C8).
//!
//! As with [`crate::geo`], the rule constants and boost mapping are pure;
//! counting nearby complaints (geo-indexed `$nearSphere` when available,
//! linear fallback scan otherwise) is delegated to a
//! [`NearbyComplaintCounter`] implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Radius, in meters, within which another complaint counts towards the
/// cluster.
pub const CLUSTER_RADIUS_METERS: f64 = 500.0;

/// How many days back to look for clustering peers.
pub const CLUSTER_LOOKBACK_DAYS: i64 = 3;

/// Minimum nearby-complaint count (excluding self) that triggers the boost.
pub const CLUSTER_THRESHOLD: i64 = 3;

/// Outcome of the cluster check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterResult {
    /// Number of other complaints found within the radius and lookback
    /// window, capped at [`CLUSTER_THRESHOLD`] (counting stops once the
    /// threshold is reached).
    pub nearby_count: i64,
    /// `1.0` if `nearby_count >= CLUSTER_THRESHOLD`, else `0.0`.
    pub cluster_boost: f64,
}

/// Abstraction over "how many other complaints lie within
/// [`CLUSTER_RADIUS_METERS`] of `(lng, lat)`, created on or after
/// `lookback_start`, excluding `excluded_id`" -- capped at `limit` since the
/// boost is a threshold check, not an exact count.
#[async_trait]
pub trait NearbyComplaintCounter: Send + Sync {
    /// Counts nearby complaints, short-circuiting at `limit`.
    async fn count_nearby_complaints(
        &self,
        lng: f64,
        lat: f64,
        radius_meters: f64,
        lookback_start: DateTime<Utc>,
        excluded_id: Option<&str>,
        limit: i64,
    ) -> Result<i64>;
}

/// Detects a complaint cluster around `coordinates`, excluding
/// `excluded_id` (the complaint being scored), as of `now`.
pub async fn detect(
    coordinates: Option<(f64, f64)>,
    excluded_id: Option<&str>,
    now: DateTime<Utc>,
    counter: &dyn NearbyComplaintCounter,
) -> Result<ClusterResult> {
    let Some((lng, lat)) = coordinates else {
        return Ok(ClusterResult {
            nearby_count: 0,
            cluster_boost: 0.0,
        });
    };

    let lookback_start = now - chrono::Duration::days(CLUSTER_LOOKBACK_DAYS);
    let count = counter
        .count_nearby_complaints(
            lng,
            lat,
            CLUSTER_RADIUS_METERS,
            lookback_start,
            excluded_id,
            CLUSTER_THRESHOLD,
        )
        .await?;

    let cluster_boost = if count >= CLUSTER_THRESHOLD { 1.0 } else { 0.0 };
    Ok(ClusterResult {
        nearby_count: count,
        cluster_boost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FixedCount(i64);

    #[async_trait]
    impl NearbyComplaintCounter for FixedCount {
        async fn count_nearby_complaints(
            &self,
            _lng: f64,
            _lat: f64,
            _radius_meters: f64,
            _lookback_start: DateTime<Utc>,
            _excluded_id: Option<&str>,
            _limit: i64,
        ) -> Result<i64> {
            Ok(self.0)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 27, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn no_coordinates_yields_zero_boost() {
        let counter = FixedCount(10);
        let result = detect(None, None, now(), &counter).await.unwrap();
        assert_eq!(result.nearby_count, 0);
        assert!((result.cluster_boost - 0.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn below_threshold_yields_zero_boost() {
        let counter = FixedCount(2);
        let result = detect(Some((77.5, 12.9)), None, now(), &counter)
            .await
            .unwrap();
        assert_eq!(result.nearby_count, 2);
        assert!((result.cluster_boost - 0.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn at_threshold_yields_full_boost() {
        let counter = FixedCount(3);
        let result = detect(Some((77.5, 12.9)), None, now(), &counter)
            .await
            .unwrap();
        assert_eq!(result.nearby_count, 3);
        assert!((result.cluster_boost - 1.0).abs() < 1e-9);
    }
}
