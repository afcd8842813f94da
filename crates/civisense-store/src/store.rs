//! [`DocumentStore`] implementation backed by MongoDB (C3, C11's write-back
//! half, C13's change-stream source, C14's sweep queries).

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Document};
use chrono::{DateTime, Utc};
use civisense_core::domain::{AiMeta, BlacklistEntry, Complaint};
use civisense_core::priority::PriorityResult;
use civisense_core::traits::{ComplaintChangeStream, DocumentStore, DuplicateCandidate};
use civisense_core::{Error, Result};
use futures::stream::TryStreamExt;
use mongodb::options::{ChangeStreamOptions, FullDocumentType, ReturnDocument};
use mongodb::Collection;

use crate::connection::Connection;

const MAX_ERROR_MESSAGE_LEN: usize = 240;

/// MongoDB-backed [`DocumentStore`].
pub struct MongoDocumentStore {
    connection: Connection,
}

impl MongoDocumentStore {
    /// Wraps an established [`Connection`].
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    fn complaints(&self) -> &Collection<Document> {
        &self.connection.complaints
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn claim_pending(&self, complaint_id: &str) -> Result<Option<Complaint>> {
        let object_id = parse_object_id(complaint_id)?;

        let updated = self
            .complaints()
            .find_one_and_update(
                doc! {
                    "_id": object_id,
                    "priority.aiProcessed": false,
                    "priority.aiProcessingStatus": "pending",
                },
                doc! { "$set": { "priority.aiProcessingStatus": "processing" } },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(|err| Error::Store(err.to_string()))?;

        updated.map(document_to_complaint).transpose()
    }

    async fn find_duplicate_candidates(
        &self,
        exclude_id: &str,
        lookback_start: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DuplicateCandidate>> {
        let exclude_object_id = parse_object_id(exclude_id)?;

        let filter = doc! {
            "_id": { "$ne": exclude_object_id },
            "createdAt": { "$gte": bson::DateTime::from_chrono(lookback_start) },
            "$or": [
                { "aiMeta.imageFingerprint": { "$exists": true } },
                { "aiMeta.embedding": { "$exists": true } },
            ],
        };

        let mut cursor = self
            .complaints()
            .find(filter)
            .projection(doc! {
                "_id": 1,
                "aiMeta.embedding": 1,
                "aiMeta.imageFingerprint": 1,
                "location": 1,
                "category": 1,
            })
            .sort(doc! {"createdAt": -1})
            .limit(limit)
            .await
            .map_err(|err| Error::Store(err.to_string()))?;

        let mut candidates = Vec::new();
        while let Some(document) = cursor
            .try_next()
            .await
            .map_err(|err| Error::Store(err.to_string()))?
        {
            candidates.push(document_to_candidate(&document));
        }
        Ok(candidates)
    }

    async fn count_pending(&self) -> Result<i64> {
        self.complaints()
            .count_documents(pending_filter())
            .await
            .map(|count| count as i64)
            .map_err(|err| Error::Store(err.to_string()))
    }

    async fn mark_success(
        &self,
        complaint_id: &str,
        priority: &PriorityResult,
        reason_sentence: &str,
        ai_meta: &AiMeta,
    ) -> Result<()> {
        let object_id = parse_object_id(complaint_id)?;
        let ai_meta_doc = bson::to_document(ai_meta).map_err(|err| Error::Store(err.to_string()))?;

        self.complaints()
            .update_one(
                doc! {"_id": object_id},
                doc! {
                    "$set": {
                        "severityScore": priority.priority_score,
                        "priority.score": priority.priority_score,
                        "priority.level": priority.priority_level,
                        "priority.reason": &priority.reason,
                        "priority.reasonSentence": reason_sentence,
                        "priority.aiProcessed": true,
                        "priority.aiProcessingStatus": "done",
                        "aiMeta": ai_meta_doc,
                    }
                },
            )
            .await
            .map_err(|err| Error::Store(err.to_string()))?;
        Ok(())
    }

    async fn mark_failed(&self, complaint_id: &str, error_message: &str) -> Result<()> {
        let object_id = parse_object_id(complaint_id)?;
        let safe_message: String = error_message
            .trim()
            .replace('\n', " ")
            .chars()
            .take(MAX_ERROR_MESSAGE_LEN)
            .collect();

        self.complaints()
            .update_one(
                doc! {"_id": object_id},
                doc! {
                    "$set": {
                        "priority.reason": format!("AI processing failed: {safe_message}"),
                        "priority.reasonSentence": "Priority could not be computed due to an AI processing error.",
                        "priority.aiProcessed": false,
                        "priority.aiProcessingStatus": "failed",
                        "aiMeta": {
                            "processedAt": bson::DateTime::from_chrono(Utc::now()),
                            "error": safe_message,
                        },
                    }
                },
            )
            .await
            .map_err(|err| Error::Store(err.to_string()))?;
        Ok(())
    }

    async fn find_claimable_pending(&self, limit: i64) -> Result<Vec<String>> {
        find_ids(self.complaints(), pending_filter(), limit).await
    }

    async fn find_failed_for_retry(&self, limit: i64) -> Result<Vec<String>> {
        find_ids(self.complaints(), failed_filter(), limit).await
    }

    async fn requeue_failed(&self, complaint_id: &str) -> Result<bool> {
        let object_id = parse_object_id(complaint_id)?;

        let result = self
            .complaints()
            .update_one(
                doc! {
                    "_id": object_id,
                    "priority.aiProcessed": false,
                    "priority.aiProcessingStatus": "failed",
                },
                doc! {
                    "$set": {
                        "priority.aiProcessed": false,
                        "priority.aiProcessingStatus": "pending",
                    }
                },
            )
            .await
            .map_err(|err| Error::Store(err.to_string()))?;

        Ok(result.modified_count == 1)
    }

    async fn record_semantic_mismatch(&self, user_id: &str) -> Result<BlacklistEntry> {
        let now = bson::DateTime::from_chrono(Utc::now());
        let updated = self
            .connection
            .ai_blacklist
            .find_one_and_update(
                doc! {"userId": user_id},
                doc! {
                    "$inc": {"mismatchCount": 1},
                    "$set": {"updatedAt": now},
                    "$setOnInsert": {"blacklisted": false},
                },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|err| Error::Store(err.to_string()))?
            .ok_or_else(|| Error::Store("blacklist upsert returned no document".to_string()))?;

        document_to_blacklist_entry(&updated)
    }

    async fn watch_pending_inserts(&self) -> Result<Option<Box<dyn ComplaintChangeStream>>> {
        if !self.connection.replica_set_enabled {
            return Ok(None);
        }

        let pipeline = [doc! {
            "$match": {
                "operationType": "insert",
                "fullDocument.priority.aiProcessed": false,
                "fullDocument.priority.aiProcessingStatus": "pending",
            }
        }];

        let options = ChangeStreamOptions::builder()
            .full_document(Some(FullDocumentType::UpdateLookup))
            .max_await_time(Some(std::time::Duration::from_millis(1000)))
            .build();

        let stream = self
            .complaints()
            .watch()
            .pipeline(pipeline)
            .with_options(options)
            .await
            .map_err(|err| Error::Store(err.to_string()))?;

        Ok(Some(Box::new(MongoChangeStream { stream })))
    }

    fn is_replica_set(&self) -> bool {
        self.connection.replica_set_enabled
    }
}

struct MongoChangeStream {
    stream: mongodb::change_stream::ChangeStream<mongodb::change_stream::event::ChangeStreamEvent<Document>>,
}

#[async_trait]
impl ComplaintChangeStream for MongoChangeStream {
    async fn next_complaint_id(&mut self) -> Result<Option<String>> {
        match self.stream.try_next().await {
            Ok(Some(event)) => {
                let Some(document) = event.full_document else {
                    return Ok(None);
                };
                Ok(document.get_object_id("_id").ok().map(|id| id.to_hex()))
            }
            Ok(None) => Ok(None),
            Err(err) => Err(Error::Store(err.to_string())),
        }
    }
}

fn pending_filter() -> Document {
    doc! {
        "priority.aiProcessed": false,
        "priority.aiProcessingStatus": "pending",
    }
}

fn failed_filter() -> Document {
    doc! {
        "priority.aiProcessed": false,
        "priority.aiProcessingStatus": "failed",
    }
}

async fn find_ids(collection: &Collection<Document>, filter: Document, limit: i64) -> Result<Vec<String>> {
    let mut cursor = collection
        .find(filter)
        .projection(doc! {"_id": 1})
        .sort(doc! {"createdAt": 1})
        .limit(limit)
        .await
        .map_err(|err| Error::Store(err.to_string()))?;

    let mut ids = Vec::new();
    while let Some(document) = cursor
        .try_next()
        .await
        .map_err(|err| Error::Store(err.to_string()))?
    {
        if let Ok(id) = document.get_object_id("_id") {
            ids.push(id.to_hex());
        }
    }
    Ok(ids)
}

fn parse_object_id(complaint_id: &str) -> Result<ObjectId> {
    ObjectId::parse_str(complaint_id).map_err(|_| Error::Store(format!("invalid complaint id: {complaint_id}")))
}

fn document_to_complaint(document: Document) -> Result<Complaint> {
    let id = document
        .get_object_id("_id")
        .map_err(|_| Error::Store("complaint document missing _id".to_string()))?
        .to_hex();

    let mut patched = document;
    patched.insert("_id", id.clone());
    bson::from_document(patched).map_err(|err| Error::Store(format!("failed to decode complaint: {err}")))
}

fn document_to_candidate(document: &Document) -> DuplicateCandidate {
    let id = document
        .get_object_id("_id")
        .map(|id| id.to_hex())
        .unwrap_or_default();

    let ai_meta = document.get_document("aiMeta").ok();
    let image_fingerprint = ai_meta
        .and_then(|meta| meta.get_str("imageFingerprint").ok())
        .map(str::to_string);
    let embedding = ai_meta.and_then(|meta| meta.get_array("embedding").ok()).map(|values| {
        values
            .iter()
            .filter_map(bson::Bson::as_f64)
            .map(|v| v as f32)
            .collect()
    });
    let coordinates = document
        .get_document("location")
        .ok()
        .and_then(|location| location.get_array("coordinates").ok())
        .filter(|coordinates| coordinates.len() == 2)
        .and_then(|coordinates| Some((coordinates[0].as_f64()?, coordinates[1].as_f64()?)));
    let category = document.get_str("category").ok().map(str::to_string);

    DuplicateCandidate {
        id,
        image_fingerprint,
        embedding,
        coordinates,
        category,
    }
}

fn document_to_blacklist_entry(document: &Document) -> Result<BlacklistEntry> {
    bson::from_document(document.clone()).map_err(|err| Error::Store(format!("failed to decode blacklist entry: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_object_id_rejects_malformed_ids() {
        assert!(parse_object_id("not-an-object-id").is_err());
    }

    #[test]
    fn document_to_candidate_handles_missing_fields() {
        let document = doc! {"_id": ObjectId::new()};
        let candidate = document_to_candidate(&document);
        assert_eq!(candidate.image_fingerprint, None);
        assert_eq!(candidate.embedding, None);
        assert_eq!(candidate.coordinates, None);
    }

    #[test]
    fn document_to_candidate_extracts_fingerprint_and_location() {
        let document = doc! {
            "_id": ObjectId::new(),
            "aiMeta": {"imageFingerprint": "00ff00ff00ff00ff"},
            "location": {"type": "Point", "coordinates": [77.5, 12.9]},
            "category": "pothole",
        };
        let candidate = document_to_candidate(&document);
        assert_eq!(candidate.image_fingerprint.as_deref(), Some("00ff00ff00ff00ff"));
        assert_eq!(candidate.coordinates, Some((77.5, 12.9)));
        assert_eq!(candidate.category.as_deref(), Some("pothole"));
    }
}
