//! Geo-indexed lookup for the sensitive-location multiplier, with a
//! fallback linear scan when the collection has no `2dsphere`/`2d` index on
//! `location` (C3 + C7's store-backed half).

use std::sync::Arc;

use bson::{doc, Document};
use civisense_core::geo::{matches_keywords, SensitiveLocationLookup};
use civisense_core::math_utils::haversine_meters;
use civisense_core::Result;
use futures::stream::TryStreamExt;
use mongodb::Collection;
use tokio::sync::OnceCell;

/// Queries `sensitive_locations` for a document of one of `keywords`'
/// location types within `radius_meters`, using `$nearSphere` when a geo
/// index is present and a keyword-filtered full scan with haversine
/// distance otherwise.
pub struct MongoSensitiveLocationLookup {
    collection: Collection<Document>,
    geo_index_supported: Arc<OnceCell<bool>>,
}

impl MongoSensitiveLocationLookup {
    /// Wraps a `sensitive_locations` collection handle.
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

    async fn geo_query(&self, lng: f64, lat: f64, keywords: &[&str], radius_meters: f64) -> Result<bool> {
        let conditions: Vec<Document> = keywords
            .iter()
            .flat_map(|keyword| {
                ["type", "name", "category"].map(|field| {
                    doc! { field: { "$regex": keyword, "$options": "i" } }
                })
            })
            .collect();

        let filter = doc! {
            "location": {
                "$nearSphere": {
                    "$geometry": { "type": "Point", "coordinates": [lng, lat] },
                    "$maxDistance": radius_meters,
                }
            },
            "$or": conditions,
        };

        match self
            .collection
            .find_one(filter)
            .projection(doc! {"_id": 1})
            .await
        {
            Ok(found) => Ok(found.is_some()),
            Err(err) => {
                tracing::warn!(error = %err, "geo multiplier query failed; falling back to scan");
                self.fallback_scan(lng, lat, keywords, radius_meters).await
            }
        }
    }

    async fn fallback_scan(
        &self,
        lng: f64,
        lat: f64,
        keywords: &[&str],
        radius_meters: f64,
    ) -> Result<bool> {
        let mut cursor = self
            .collection
            .find(doc! {})
            .projection(doc! {"location": 1, "type": 1, "name": 1, "category": 1})
            .await
            .map_err(|err| civisense_core::Error::Store(err.to_string()))?;

        while let Some(document) = cursor
            .try_next()
            .await
            .map_err(|err| civisense_core::Error::Store(err.to_string()))?
        {
            let parts = text_parts(&document);
            if parts.is_empty() || !matches_keywords(&parts.iter().map(String::as_str).collect::<Vec<_>>(), keywords) {
                continue;
            }

            let Some((doc_lng, doc_lat)) = extract_coordinates(&document) else {
                continue;
            };

            if haversine_meters(lng, lat, doc_lng, doc_lat) <= radius_meters {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

#[async_trait::async_trait]
impl SensitiveLocationLookup for MongoSensitiveLocationLookup {
    async fn is_near_location_type(
        &self,
        lng: f64,
        lat: f64,
        keywords: &[&str],
        radius_meters: f64,
    ) -> Result<bool> {
        if self.geo_index_supported().await {
            self.geo_query(lng, lat, keywords, radius_meters).await
        } else {
            self.fallback_scan(lng, lat, keywords, radius_meters).await
        }
    }
}

/// Inspects `index_information`-equivalent output for a `2dsphere`/`2d`
/// index on `location`. Any failure inspecting indexes is treated as "not
/// supported", logged once by the caller via [`OnceCell`] memoization.
pub(crate) async fn probe_location_geo_index(collection: &Collection<Document>) -> bool {
    let mut cursor = match collection.list_indexes().await {
        Ok(cursor) => cursor,
        Err(err) => {
            tracing::warn!(error = %err, "index inspection failed; using fallback scan");
            return false;
        }
    };

    loop {
        match cursor.try_next().await {
            Ok(Some(index)) => {
                if has_location_geo_key(&index.keys) {
                    return true;
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "index inspection failed; using fallback scan");
                return false;
            }
        }
    }

    tracing::warn!("missing geo index on location field; using fallback scan");
    false
}

fn has_location_geo_key(keys: &Document) -> bool {
    match keys.get("location") {
        Some(bson::Bson::String(kind)) => kind == "2dsphere" || kind == "2d",
        _ => false,
    }
}

fn text_parts(document: &Document) -> Vec<String> {
    ["type", "name", "category"]
        .iter()
        .filter_map(|field| document.get_str(field).ok().map(str::to_lowercase))
        .collect()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_coordinates_requires_two_element_array() {
        let document = doc! {"location": {"type": "Point", "coordinates": [77.5]}};
        assert_eq!(extract_coordinates(&document), None);
    }

    #[test]
    fn extract_coordinates_reads_lng_lat_order() {
        let document = doc! {"location": {"type": "Point", "coordinates": [77.5, 12.9]}};
        assert_eq!(extract_coordinates(&document), Some((77.5, 12.9)));
    }

    #[test]
    fn text_parts_skips_missing_fields() {
        let document = doc! {"type": "School"};
        assert_eq!(text_parts(&document), vec!["school".to_string()]);
    }

    #[test]
    fn has_location_geo_key_accepts_2dsphere_and_2d() {
        assert!(has_location_geo_key(&doc! {"location": "2dsphere"}));
        assert!(has_location_geo_key(&doc! {"location": "2d"}));
        assert!(!has_location_geo_key(&doc! {"location": 1}));
        assert!(!has_location_geo_key(&doc! {"other": "2dsphere"}));
    }
}
