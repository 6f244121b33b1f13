//! Database schemas for Veritas
//!
//! Defines the MongoDB document structures for items and reviews.

mod item;
mod metadata;
mod review;

pub use item::{
    Flag, ItemDoc, ItemStatus, RiskLevel, SignalBreakdown, StatusHistoryEntry, ITEM_COLLECTION,
};
pub use metadata::Metadata;
pub use review::{ReviewDoc, META_PREDICTION, REVIEW_COLLECTION};
