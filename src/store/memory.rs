//! In-process store
//!
//! Same semantics as the MongoDB store, held in memory. Used by tests and for
//! running the workers against canned data.

use async_trait::async_trait;
use bson::{oid::ObjectId, DateTime};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ItemCommit, ItemStore, ReviewSignal, ReviewStore};
use crate::db::schemas::{Flag, ItemDoc, ReviewDoc, META_PREDICTION};
use crate::types::{Result, VeritasError};

/// In-memory item and review store
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<ObjectId, ItemDoc>>,
    reviews: RwLock<HashMap<ObjectId, ReviewDoc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn load_item(&self, id: ObjectId) -> Result<Option<ItemDoc>> {
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn commit_item(&self, commit: &ItemCommit) -> Result<bool> {
        let mut items = self.items.write().await;
        let Some(item) = items.get_mut(&commit.item_id) else {
            return Ok(false);
        };

        if item.revision != commit.expected_revision
            || commit.overrides_takedown(item.status)
        {
            return Ok(false);
        }

        item.trust_score = commit.trust_score;
        item.risk_level = commit.risk_level;
        item.status = commit.status;
        item.flags = commit.flags.clone();
        item.signal_breakdown = commit.signal_breakdown.clone();
        item.status_history
            .extend(commit.appended_history.iter().cloned());
        item.revision += 1;
        item.metadata.touch();
        Ok(true)
    }

    async fn add_item_flag(&self, id: ObjectId, flag: &Flag) -> Result<bool> {
        let mut items = self.items.write().await;
        let Some(item) = items.get_mut(&id) else {
            return Ok(false);
        };

        if !item.flags.insert(flag.clone()) {
            return Ok(false);
        }
        item.revision += 1;
        item.metadata.touch();
        Ok(true)
    }

    async fn insert_item(&self, mut item: ItemDoc) -> Result<ObjectId> {
        let id = *item._id.get_or_insert_with(ObjectId::new);
        let mut items = self.items.write().await;
        if items.contains_key(&id) {
            return Err(VeritasError::Database(format!("duplicate item {}", id)));
        }
        items.insert(id, item);
        Ok(id)
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn load_review(&self, id: ObjectId) -> Result<Option<ReviewDoc>> {
        Ok(self.reviews.read().await.get(&id).cloned())
    }

    async fn record_review_signal(&self, id: ObjectId, signal: &ReviewSignal) -> Result<bool> {
        let mut reviews = self.reviews.write().await;
        let Some(review) = reviews.get_mut(&id) else {
            return Ok(false);
        };

        review.confidence = Some(signal.confidence);
        review.ai_flag = signal.ai_flag;
        if let Some(pred) = signal.prediction {
            review
                .ai_analysis_meta
                .insert(META_PREDICTION.to_string(), f64::from(pred));
        }
        review.metadata.touch();
        Ok(true)
    }

    async fn flagged_reviews_since(
        &self,
        item_id: ObjectId,
        since: DateTime,
    ) -> Result<Vec<ReviewDoc>> {
        let reviews = self.reviews.read().await;
        let mut window: Vec<ReviewDoc> = reviews
            .values()
            .filter(|r| r.item_id == item_id && r.ai_flag)
            .filter(|r| r.metadata.created_at.is_some_and(|created| created >= since))
            .cloned()
            .collect();
        window.sort_by_key(|r| r.metadata.created_at);
        Ok(window)
    }

    async fn mark_takedown(&self, ids: &[ObjectId]) -> Result<u64> {
        let mut reviews = self.reviews.write().await;
        let mut changed = 0;
        for id in ids {
            if let Some(review) = reviews.get_mut(id) {
                if !review.takedown_flag {
                    review.takedown_flag = true;
                    review.metadata.touch();
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn upsert_review(&self, mut review: ReviewDoc) -> Result<ObjectId> {
        let mut reviews = self.reviews.write().await;

        if let Some(existing) = reviews
            .values_mut()
            .find(|r| r.item_id == review.item_id && r.author_id == review.author_id)
        {
            existing.rating = review.rating;
            existing.comment = review.comment;
            existing.metadata.touch();
            return existing
                ._id
                .ok_or_else(|| VeritasError::Internal("stored review has no _id".into()));
        }

        let id = *review._id.get_or_insert_with(ObjectId::new);
        if review.metadata.created_at.is_none() {
            review.metadata.created_at = Some(DateTime::now());
        }
        reviews.insert(id, review);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::ItemStatus;
    use crate::store::{record_admin_decision, update_item_versioned};
    use crate::trust::AdminDecision;
    use crate::trust;
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn seeded_item(store: &MemoryStore) -> ObjectId {
        store
            .insert_item(ItemDoc::new("Bag".into(), "Leather tote".into()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_stale_commit_is_rejected() {
        let store = MemoryStore::new();
        let id = seeded_item(&store).await;

        let first = store.load_item(id).await.unwrap().unwrap();
        let second = store.load_item(id).await.unwrap().unwrap();

        let mut a = first.clone();
        trust::apply_trust_update(&mut a, 0.9, "a", DateTime::now());
        assert!(store.commit_item(&ItemCommit::from_item(&a, 0, first.status).unwrap()).await.unwrap());

        let mut b = second.clone();
        trust::apply_trust_update(&mut b, 0.1, "b", DateTime::now());
        assert!(!store.commit_item(&ItemCommit::from_item(&b, 0, second.status).unwrap()).await.unwrap());

        let stored = store.load_item(id).await.unwrap().unwrap();
        assert_eq!(stored.trust_score, Some(0.9));
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.status_history.len(), 1);
    }

    /// Store that lets another writer sneak in before the first commit
    struct ContendedStore {
        inner: MemoryStore,
        interfered: AtomicBool,
    }

    #[async_trait]
    impl ItemStore for ContendedStore {
        async fn load_item(&self, id: ObjectId) -> Result<Option<ItemDoc>> {
            self.inner.load_item(id).await
        }

        async fn commit_item(&self, commit: &ItemCommit) -> Result<bool> {
            if !self.interfered.swap(true, Ordering::SeqCst) {
                self.inner.add_item_flag(commit.item_id, &Flag::AiReviewBurst).await?;
            }
            self.inner.commit_item(commit).await
        }

        async fn add_item_flag(&self, id: ObjectId, flag: &Flag) -> Result<bool> {
            self.inner.add_item_flag(id, flag).await
        }

        async fn insert_item(&self, item: ItemDoc) -> Result<ObjectId> {
            self.inner.insert_item(item).await
        }
    }

    #[tokio::test]
    async fn test_versioned_update_retries_and_keeps_concurrent_write() {
        let store = ContendedStore {
            inner: MemoryStore::new(),
            interfered: AtomicBool::new(false),
        };
        let id = store
            .insert_item(ItemDoc::new("Bag".into(), "Leather tote".into()))
            .await
            .unwrap();

        let mut calls = 0;
        let updated = update_item_versioned(&store, id, 3, |item| {
            calls += 1;
            trust::apply_trust_update(item, 0.85, "scored", DateTime::now());
        })
        .await
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(updated.status, ItemStatus::Active);

        let stored = store.load_item(id).await.unwrap().unwrap();
        assert!(stored.has_flag(&Flag::AiReviewBurst));
        assert_eq!(stored.trust_score, Some(0.85));
        assert_eq!(stored.revision, 2);
    }

    #[tokio::test]
    async fn test_versioned_update_gives_up_after_attempts() {
        let store = ContendedStore {
            inner: MemoryStore::new(),
            interfered: AtomicBool::new(false),
        };
        let id = store
            .insert_item(ItemDoc::new("Bag".into(), "Leather tote".into()))
            .await
            .unwrap();

        let err = update_item_versioned(&store, id, 1, |item| {
            trust::apply_trust_update(item, 0.5, "scored", DateTime::now());
        })
        .await
        .unwrap_err();
        assert!(matches!(err, VeritasError::WriteConflict { attempts: 1, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_versioned_update_missing_item() {
        let store = MemoryStore::new();
        let err = update_item_versioned(&store, ObjectId::new(), 3, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, VeritasError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_admin_takedown_is_persisted() {
        let store = MemoryStore::new();
        let id = seeded_item(&store).await;

        let item = record_admin_decision(&store, id, AdminDecision::Takedown, "counterfeit", 3)
            .await
            .unwrap();
        assert_eq!(item.status, ItemStatus::Takedown);

        let stored = store.load_item(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Takedown);
        assert_eq!(stored.status_history.len(), 1);
        assert_eq!(stored.status_history[0].reason, "counterfeit");
    }

    #[tokio::test]
    async fn test_external_takedown_without_revision_bump_is_kept() {
        let store = MemoryStore::new();
        let id = seeded_item(&store).await;

        let loaded = store.load_item(id).await.unwrap().unwrap();

        // The CRUD service writes status directly and leaves the revision alone.
        if let Some(item) = store.items.write().await.get_mut(&id) {
            item.status = ItemStatus::Takedown;
        }

        let mut stale = loaded.clone();
        trust::apply_trust_update(&mut stale, 0.9, "scored", DateTime::now());
        let commit = ItemCommit::from_item(&stale, 0, loaded.status).unwrap();
        assert!(!store.commit_item(&commit).await.unwrap());

        let updated = update_item_versioned(&store, id, 3, |item| {
            trust::apply_trust_update(item, 0.9, "scored", DateTime::now());
        })
        .await
        .unwrap();
        assert_eq!(updated.status, ItemStatus::Takedown);

        let stored = store.load_item(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Takedown);
        assert_eq!(stored.trust_score, Some(0.9));
        assert!(stored.status_history.is_empty());
    }

    #[tokio::test]
    async fn test_add_item_flag_is_idempotent() {
        let store = MemoryStore::new();
        let id = seeded_item(&store).await;

        assert!(store.add_item_flag(id, &Flag::AiReviewBurst).await.unwrap());
        assert!(!store.add_item_flag(id, &Flag::AiReviewBurst).await.unwrap());

        let item = store.load_item(id).await.unwrap().unwrap();
        assert_eq!(item.flags.len(), 1);
        assert_eq!(item.revision, 1);
    }

    #[tokio::test]
    async fn test_upsert_review_replaces_same_author() {
        let store = MemoryStore::new();
        let item = ObjectId::new();
        let author = ObjectId::new();

        let first = store
            .upsert_review(ReviewDoc::new(item, author, 2, "Meh".into()))
            .await
            .unwrap();
        let second = store
            .upsert_review(ReviewDoc::new(item, author, 5, "Grew on me".into()))
            .await
            .unwrap();

        assert_eq!(first, second);
        let review = store.load_review(first).await.unwrap().unwrap();
        assert_eq!(review.rating, 5);
        assert_eq!(review.comment, "Grew on me");
    }

    #[tokio::test]
    async fn test_takedown_is_sticky_and_counted_once() {
        let store = MemoryStore::new();
        let item = ObjectId::new();
        let id = store
            .upsert_review(ReviewDoc::new(item, ObjectId::new(), 5, "Wow".into()))
            .await
            .unwrap();

        assert_eq!(store.mark_takedown(&[id]).await.unwrap(), 1);
        assert_eq!(store.mark_takedown(&[id]).await.unwrap(), 0);

        let signal = ReviewSignal {
            confidence: 0.1,
            ai_flag: false,
            prediction: Some(0),
        };
        store.record_review_signal(id, &signal).await.unwrap();
        let review = store.load_review(id).await.unwrap().unwrap();
        assert!(review.takedown_flag);
        assert_eq!(review.ai_analysis_meta.get(META_PREDICTION), Some(&0.0));
    }
}
