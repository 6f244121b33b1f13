//! Entity store
//!
//! Workers talk to items and reviews through these traits. Item writes are
//! conditional on a revision token so two workers racing on the same item
//! cannot silently overwrite each other; the loser reloads and re-applies.

mod memory;
mod mongo;

use async_trait::async_trait;
use bson::{oid::ObjectId, DateTime};
use std::collections::BTreeSet;
use tracing::debug;

use crate::db::schemas::{Flag, ItemDoc, ItemStatus, ReviewDoc, RiskLevel, SignalBreakdown, StatusHistoryEntry};
use crate::trust::{self, AdminDecision};
use crate::types::{Result, VeritasError};

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Trust fields of an item to write back, guarded by the revision and status
/// they were computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemCommit {
    pub item_id: ObjectId,
    pub expected_revision: i64,
    /// Status at load time. Unless it was already `takedown`, the write must not
    /// land on an item taken down since.
    pub expected_status: ItemStatus,
    pub trust_score: Option<f64>,
    pub risk_level: RiskLevel,
    pub status: ItemStatus,
    pub flags: BTreeSet<Flag>,
    pub signal_breakdown: SignalBreakdown,
    /// Entries to append after the ones already stored
    pub appended_history: Vec<StatusHistoryEntry>,
}

impl ItemCommit {
    /// Build a commit from a mutated item.
    ///
    /// `history_len_before` and `status_before` describe the item at load time;
    /// history entries past `history_len_before` are new.
    pub fn from_item(
        item: &ItemDoc,
        history_len_before: usize,
        status_before: ItemStatus,
    ) -> Result<Self> {
        let item_id = item
            ._id
            .ok_or_else(|| VeritasError::Internal("item has no _id".into()))?;

        Ok(Self {
            item_id,
            expected_revision: item.revision,
            expected_status: status_before,
            trust_score: item.trust_score,
            risk_level: item.risk_level,
            status: item.status,
            flags: item.flags.clone(),
            signal_breakdown: item.signal_breakdown.clone(),
            appended_history: item
                .status_history
                .get(history_len_before..)
                .unwrap_or_default()
                .to_vec(),
        })
    }

    /// Whether writing this commit would lift a takedown made after load
    pub fn overrides_takedown(&self, stored_status: ItemStatus) -> bool {
        stored_status == ItemStatus::Takedown && self.expected_status != ItemStatus::Takedown
    }
}

/// Signal fields written onto a review
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReviewSignal {
    pub confidence: f64,
    pub ai_flag: bool,
    pub prediction: Option<u8>,
}

/// Item persistence
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn load_item(&self, id: ObjectId) -> Result<Option<ItemDoc>>;

    /// Write `commit` if the stored revision still equals
    /// `commit.expected_revision` and the item has not been taken down since it
    /// was loaded. Returns `false` on a mismatch (or a vanished item) without
    /// writing anything.
    async fn commit_item(&self, commit: &ItemCommit) -> Result<bool>;

    /// Add a flag unless already present. Bumps the revision when it does.
    /// Returns whether the flag was added.
    async fn add_item_flag(&self, id: ObjectId, flag: &Flag) -> Result<bool>;

    async fn insert_item(&self, item: ItemDoc) -> Result<ObjectId>;
}

/// Review persistence
#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn load_review(&self, id: ObjectId) -> Result<Option<ReviewDoc>>;

    /// Record classifier output on a review. Returns `false` if the review
    /// does not exist.
    async fn record_review_signal(&self, id: ObjectId, signal: &ReviewSignal) -> Result<bool>;

    /// AI-flagged reviews of an item created at or after `since`
    async fn flagged_reviews_since(&self, item_id: ObjectId, since: DateTime)
        -> Result<Vec<ReviewDoc>>;

    /// Set `takedown_flag` on the given reviews. Returns how many changed.
    async fn mark_takedown(&self, ids: &[ObjectId]) -> Result<u64>;

    /// Insert a review, or replace rating and comment of the author's existing
    /// review of the same item.
    async fn upsert_review(&self, review: ReviewDoc) -> Result<ObjectId>;
}

/// Load an item, apply `mutate`, and commit conditionally, retrying on
/// revision conflicts up to `max_attempts` times.
///
/// `mutate` may run several times, always on a freshly loaded copy. Returns the
/// committed item, or `NotFound` / `WriteConflict`.
pub async fn update_item_versioned<S, F>(
    store: &S,
    item_id: ObjectId,
    max_attempts: u32,
    mut mutate: F,
) -> Result<ItemDoc>
where
    S: ItemStore + ?Sized,
    F: FnMut(&mut ItemDoc) + Send,
{
    for attempt in 1..=max_attempts {
        let mut item = store
            .load_item(item_id)
            .await?
            .ok_or_else(|| VeritasError::NotFound(format!("item {}", item_id)))?;

        let history_len = item.status_history.len();
        let status = item.status;
        mutate(&mut item);

        let commit = ItemCommit::from_item(&item, history_len, status)?;
        if store.commit_item(&commit).await? {
            item.revision += 1;
            return Ok(item);
        }

        debug!(item_id = %item_id, attempt, "Item revision changed underneath, retrying");
    }

    Err(VeritasError::WriteConflict {
        entity: format!("item {}", item_id),
        attempts: max_attempts,
    })
}

/// Persist an administrator's approve/takedown decision on an item
pub async fn record_admin_decision<S>(
    store: &S,
    item_id: ObjectId,
    decision: AdminDecision,
    reason: &str,
    max_attempts: u32,
) -> Result<ItemDoc>
where
    S: ItemStore + ?Sized,
{
    update_item_versioned(store, item_id, max_attempts, |item| {
        trust::apply_admin_decision(item, decision, reason, DateTime::now());
    })
    .await
}
