//! AI-review burst detection
//!
//! After every review update the trailing window of AI-flagged reviews on the
//! same item is recounted. A burst takes every review in the window down and
//! marks the item with `ai_review_burst`. Both writes are idempotent, so two
//! workers detecting the same burst converge on the same state.

use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::db::schemas::{Flag, ReviewDoc};
use crate::store::{ItemStore, ReviewStore};
use crate::types::Result;

/// Window and thresholds for burst detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurstPolicy {
    /// Confidence at or above which a review is AI-suspected, and the mean
    /// confidence a window must reach to count as a burst
    pub confidence_threshold: f64,
    /// Trailing window length
    pub window: chrono::Duration,
    /// Minimum flagged reviews in the window
    pub min_count: usize,
}

impl Default for BurstPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            window: chrono::Duration::minutes(10),
            min_count: 3,
        }
    }
}

impl BurstPolicy {
    /// Whether a single review's confidence marks it AI-suspected
    pub fn is_suspect(&self, confidence: f64) -> bool {
        confidence >= self.confidence_threshold
    }
}

/// Result of one burst check
#[derive(Debug, Clone, PartialEq)]
pub struct BurstVerdict {
    pub window_count: usize,
    /// Mean confidence over the window; `None` when the window is empty
    pub mean_confidence: Option<f64>,
    pub triggered: bool,
    /// Reviews whose takedown flag this check set
    pub reviews_taken_down: u64,
    /// Whether this check added the burst flag to the item
    pub item_flagged: bool,
}

/// Mean confidence of a window. Reviews without a recorded confidence count as 0.
pub fn mean_confidence(window: &[ReviewDoc]) -> Option<f64> {
    if window.is_empty() {
        return None;
    }
    let total: f64 = window.iter().map(|r| r.confidence.unwrap_or(0.0)).sum();
    Some(total / window.len() as f64)
}

/// Whether a window of flagged reviews constitutes a burst
pub fn is_burst(window: &[ReviewDoc], policy: &BurstPolicy) -> bool {
    window.len() >= policy.min_count
        && mean_confidence(window).is_some_and(|mean| mean >= policy.confidence_threshold)
}

/// Recount the trailing window for `item_id` and act on a burst
pub async fn detect_burst(
    reviews: &dyn ReviewStore,
    items: &dyn ItemStore,
    item_id: ObjectId,
    policy: &BurstPolicy,
    now: DateTime<Utc>,
) -> Result<BurstVerdict> {
    let window_start = bson::DateTime::from_chrono(now - policy.window);
    let window = reviews.flagged_reviews_since(item_id, window_start).await?;

    let mut verdict = BurstVerdict {
        window_count: window.len(),
        mean_confidence: mean_confidence(&window),
        triggered: is_burst(&window, policy),
        reviews_taken_down: 0,
        item_flagged: false,
    };

    if !verdict.triggered {
        return Ok(verdict);
    }

    let ids: Vec<ObjectId> = window.iter().filter_map(|r| r._id).collect();
    verdict.reviews_taken_down = reviews.mark_takedown(&ids).await?;
    verdict.item_flagged = items.add_item_flag(item_id, &Flag::AiReviewBurst).await?;

    if verdict.reviews_taken_down > 0 || verdict.item_flagged {
        info!(
            item_id = %item_id,
            window_count = verdict.window_count,
            mean_confidence = verdict.mean_confidence,
            taken_down = verdict.reviews_taken_down,
            "AI review burst detected"
        );
    }

    Ok(verdict)
}
