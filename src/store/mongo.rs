//! MongoDB-backed store
//!
//! Every write is a single-document (or single `update_many`) operation, so the
//! server's per-document atomicity is the only concurrency control needed.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, DateTime, Document};

use super::{ItemCommit, ItemStore, ReviewSignal, ReviewStore};
use crate::db::schemas::{Flag, ItemDoc, ItemStatus, ReviewDoc, ITEM_COLLECTION, META_PREDICTION, REVIEW_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{Result, VeritasError};

/// Item and review collections
#[derive(Clone)]
pub struct MongoStore {
    items: MongoCollection<ItemDoc>,
    reviews: MongoCollection<ReviewDoc>,
}

impl MongoStore {
    /// Open both collections, creating indexes as needed
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            items: client.collection(ITEM_COLLECTION).await?,
            reviews: client.collection(REVIEW_COLLECTION).await?,
        })
    }
}

/// Filter matching an item at a given revision.
///
/// Documents created by the CRUD service carry no revision yet; they count as 0.
fn revision_filter(item_id: ObjectId, expected_revision: i64) -> Document {
    if expected_revision == 0 {
        doc! { "_id": item_id, "revision": { "$in": [0_i64, Bson::Null] } }
    } else {
        doc! { "_id": item_id, "revision": expected_revision }
    }
}

/// Filter for a conditional item write. An item taken down after the commit's
/// snapshot was loaded no longer matches.
fn commit_filter(commit: &ItemCommit) -> Document {
    let mut filter = revision_filter(commit.item_id, commit.expected_revision);
    if commit.expected_status != ItemStatus::Takedown {
        filter.insert("status", doc! { "$ne": ItemStatus::Takedown.to_string() });
    }
    filter
}

fn commit_update(commit: &ItemCommit) -> Result<Document> {
    Ok(doc! {
        "$set": {
            "trustScore": bson::to_bson(&commit.trust_score)?,
            "riskLevel": bson::to_bson(&commit.risk_level)?,
            "status": bson::to_bson(&commit.status)?,
            "flags": bson::to_bson(&commit.flags)?,
            "signalBreakdown": bson::to_bson(&commit.signal_breakdown)?,
            "updatedAt": DateTime::now(),
        },
        "$push": {
            "statusHistory": { "$each": bson::to_bson(&commit.appended_history)? },
        },
        "$inc": { "revision": 1_i64 },
    })
}

fn review_signal_update(signal: &ReviewSignal) -> Document {
    let mut set = doc! {
        "confidence": signal.confidence,
        "aiFlag": signal.ai_flag,
        "updatedAt": DateTime::now(),
    };
    if let Some(pred) = signal.prediction {
        set.insert(format!("aiAnalysisMeta.{}", META_PREDICTION), f64::from(pred));
    }
    doc! { "$set": set }
}

#[async_trait]
impl ItemStore for MongoStore {
    async fn load_item(&self, id: ObjectId) -> Result<Option<ItemDoc>> {
        self.items.find_one(doc! { "_id": id }).await
    }

    async fn commit_item(&self, commit: &ItemCommit) -> Result<bool> {
        let result = self
            .items
            .update_one(
                commit_filter(commit),
                commit_update(commit)?,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn add_item_flag(&self, id: ObjectId, flag: &Flag) -> Result<bool> {
        let result = self
            .items
            .update_one(
                doc! { "_id": id, "flags": { "$ne": flag.as_str() } },
                doc! {
                    "$addToSet": { "flags": flag.as_str() },
                    "$inc": { "revision": 1_i64 },
                    "$set": { "updatedAt": DateTime::now() },
                },
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn insert_item(&self, item: ItemDoc) -> Result<ObjectId> {
        self.items.insert_one(item).await
    }
}

#[async_trait]
impl ReviewStore for MongoStore {
    async fn load_review(&self, id: ObjectId) -> Result<Option<ReviewDoc>> {
        self.reviews.find_one(doc! { "_id": id }).await
    }

    async fn record_review_signal(&self, id: ObjectId, signal: &ReviewSignal) -> Result<bool> {
        let result = self
            .reviews
            .update_one(doc! { "_id": id }, review_signal_update(signal))
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn flagged_reviews_since(
        &self,
        item_id: ObjectId,
        since: DateTime,
    ) -> Result<Vec<ReviewDoc>> {
        self.reviews
            .find_many(doc! {
                "product": item_id,
                "aiFlag": true,
                "createdAt": { "$gte": since },
            })
            .await
    }

    async fn mark_takedown(&self, ids: &[ObjectId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = self
            .reviews
            .update_many(
                doc! { "_id": { "$in": ids.to_vec() }, "takedownFlag": { "$ne": true } },
                doc! { "$set": { "takedownFlag": true, "updatedAt": DateTime::now() } },
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn upsert_review(&self, review: ReviewDoc) -> Result<ObjectId> {
        let filter = doc! { "product": review.item_id, "user": review.author_id };
        let now = DateTime::now();
        let result = self
            .reviews
            .upsert_one(
                filter.clone(),
                doc! {
                    "$set": {
                        "rating": review.rating,
                        "comment": review.comment.as_str(),
                        "updatedAt": now,
                    },
                    "$setOnInsert": {
                        "createdAt": review.metadata.created_at.unwrap_or(now),
                        "aiFlag": false,
                        "takedownFlag": false,
                    },
                },
            )
            .await?;

        if let Some(id) = result.upserted_id.as_ref().and_then(Bson::as_object_id) {
            return Ok(id);
        }

        self.reviews
            .find_one(filter)
            .await?
            .and_then(|r| r._id)
            .ok_or_else(|| VeritasError::Database("upserted review not found".into()))
    }
}
