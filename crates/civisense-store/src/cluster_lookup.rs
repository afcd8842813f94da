//! Geo-indexed nearby-complaint counting for the cluster boost, with a
//! fallback linear scan (C3 + C8's store-backed half).

use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{doc, Document};
use chrono::{DateTime, Utc};
use civisense_core::cluster::NearbyComplaintCounter;
use civisense_core::math_utils::haversine_meters;
use civisense_core::{Error, Result};
use futures::stream::TryStreamExt;
use mongodb::Collection;
use tokio::sync::OnceCell;

use crate::geo_lookup::probe_location_geo_index;

/// Counts complaints near `(lng, lat)` created since `lookback_start`,
/// excluding `excluded_id`, using `$nearSphere` when a geo index on
/// `complaints.location` exists and a linear scan otherwise.
pub struct MongoNearbyComplaintCounter {
    collection: Collection<Document>,
    geo_index_supported: Arc<OnceCell<bool>>,
}

impl MongoNearbyComplaintCounter {
    /// Wraps a `complaints` collection handle.
    #[must_use]
    pub fn new(collection: Collection<Document>) -> Self {
        Self {
            collection,
            geo_index_supported: Arc::new(OnceCell::new()),
        }
    }

    async fn geo_index_supported(&self) -> bool {
        *self
            .geo_index_supported
            .get_or_init(|| async { probe_location_geo_index(&self.collection).await })
            .await
    }
}

#[async_trait::async_trait]
impl NearbyComplaintCounter for MongoNearbyComplaintCounter {
    async fn count_nearby_complaints(
        &self,
        lng: f64,
        lat: f64,
        radius_meters: f64,
        lookback_start: DateTime<Utc>,
        excluded_id: Option<&str>,
        limit: i64,
    ) -> Result<i64> {
        let excluded_object_id = excluded_id.and_then(|id| ObjectId::parse_str(id).ok());

        if self.geo_index_supported().await {
            geo_count(
                &self.collection,
                lng,
                lat,
                radius_meters,
                lookback_start,
                excluded_object_id,
                limit,
            )
            .await
        } else {
            fallback_count(
                &self.collection,
                lng,
                lat,
                radius_meters,
                lookback_start,
                excluded_object_id,
                limit,
            )
            .await
        }
    }
}

async fn geo_count(
    collection: &Collection<Document>,
    lng: f64,
    lat: f64,
    radius_meters: f64,
    lookback_start: DateTime<Utc>,
    excluded_id: Option<ObjectId>,
    limit: i64,
) -> Result<i64> {
    let mut filter = doc! {
        "createdAt": { "$gte": bson::DateTime::from_chrono(lookback_start) },
        "location": {
            "$nearSphere": {
                "$geometry": { "type": "Point", "coordinates": [lng, lat] },
                "$maxDistance": radius_meters,
            }
        },
    };
    if let Some(id) = excluded_id {
        filter.insert("_id", doc! { "$ne": id });
    }

    match collection
        .find(filter.clone())
        .projection(doc! {"_id": 1})
        .limit(limit)
        .await
    {
        Ok(mut cursor) => {
            let mut count = 0_i64;
            while cursor
                .try_next()
                .await
                .map_err(|err| Error::Store(err.to_string()))?
                .is_some()
            {
                count += 1;
            }
            Ok(count)
        }
        Err(err) => {
            tracing::warn!(error = %err, "cluster query failed; falling back to scan");
            fallback_count(collection, lng, lat, radius_meters, lookback_start, excluded_id, limit).await
        }
    }
}

async fn fallback_count(
    collection: &Collection<Document>,
    lng: f64,
    lat: f64,
    radius_meters: f64,
    lookback_start: DateTime<Utc>,
    excluded_id: Option<ObjectId>,
    limit: i64,
) -> Result<i64> {
    let mut filter = doc! { "createdAt": { "$gte": bson::DateTime::from_chrono(lookback_start) } };
    if let Some(id) = excluded_id {
        filter.insert("_id", doc! { "$ne": id });
    }

    let mut cursor = collection
        .find(filter)
        .projection(doc! {"location": 1})
        .await
        .map_err(|err| Error::Store(err.to_string()))?;

    let mut count = 0_i64;
    while let Some(document) = cursor
        .try_next()
        .await
        .map_err(|err| Error::Store(err.to_string()))?
    {
        let Some((doc_lng, doc_lat)) = extract_coordinates(&document) else {
            continue;
        };

        if haversine_meters(lng, lat, doc_lng, doc_lat) <= radius_meters {
            count += 1;
            if count >= limit {
                break;
            }
        }
    }

    Ok(count)
}

fn extract_coordinates(document: &Document) -> Option<(f64, f64)> {
    let location = document.get_document("location").ok()?;
    let coordinates = location.get_array("coordinates").ok()?;
    if coordinates.len() != 2 {
        return None;
    }
    let lng = coordinates[0].as_f64()?;
    let lat = coordinates[1].as_f64()?;
    Some((lng, lat))
}
