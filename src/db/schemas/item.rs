//! Item document schema
//!
//! Listed items ("products" in the marketplace collection). Veritas owns the
//! trust fields; everything else on the document belongs to the CRUD service and
//! is never rewritten here.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for items
pub const ITEM_COLLECTION: &str = "products";

/// Named problem marker on an item.
///
/// Stored as a plain string so flags written by other services survive a
/// round trip through this crate.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Flag {
    LogoMismatch,
    DescImageMismatch,
    SellerRisk,
    NetworkCollusion,
    BarcodeInvalid,
    AiReviewBurst,
    Other(String),
}

impl Flag {
    /// Flags that force an item to red regardless of its score
    pub const CRITICAL: [Flag; 5] = [
        Flag::LogoMismatch,
        Flag::DescImageMismatch,
        Flag::SellerRisk,
        Flag::NetworkCollusion,
        Flag::BarcodeInvalid,
    ];

    pub fn is_critical(&self) -> bool {
        Self::CRITICAL.contains(self)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Flag::LogoMismatch => "logo_mismatch",
            Flag::DescImageMismatch => "desc_image_mismatch",
            Flag::SellerRisk => "seller_risk",
            Flag::NetworkCollusion => "network_collusion",
            Flag::BarcodeInvalid => "barcode_invalid",
            Flag::AiReviewBurst => "ai_review_burst",
            Flag::Other(name) => name,
        }
    }
}

impl From<String> for Flag {
    fn from(value: String) -> Self {
        match value.as_str() {
            "logo_mismatch" => Flag::LogoMismatch,
            "desc_image_mismatch" => Flag::DescImageMismatch,
            "seller_risk" => Flag::SellerRisk,
            "network_collusion" => Flag::NetworkCollusion,
            "barcode_invalid" => Flag::BarcodeInvalid,
            "ai_review_burst" => Flag::AiReviewBurst,
            _ => Flag::Other(value),
        }
    }
}

impl From<Flag> for String {
    fn from(flag: Flag) -> Self {
        flag.as_str().to_string()
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse three-tier risk classification
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Green,
    Yellow,
    #[default]
    Red,
}

/// Listing status
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Awaiting review or insufficient trust
    #[default]
    Pending,
    /// Visible to buyers
    Active,
    /// Removed by an administrator
    Takedown,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Active => "active",
            ItemStatus::Takedown => "takedown",
        };
        f.write_str(s)
    }
}

/// One audited status change
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub status: ItemStatus,
    pub changed_at: DateTime,
    pub reason: String,
    /// Flag set at the moment of the change
    #[serde(default)]
    pub flags: BTreeSet<Flag>,
}

/// Per-signal raw values that fed the trust score.
///
/// Known keys are listed as constants; other services may add their own.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct SignalBreakdown(BTreeMap<String, f64>);

impl SignalBreakdown {
    /// Image/description matcher score
    pub const DESC_MATCH: &'static str = "descMatch";
    /// Seller risk model output
    pub const SELLER_RISK: &'static str = "sellerRisk";
    /// Seller network collusion model output
    pub const NETWORK_COLLUSION: &'static str = "networkCollusion";

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn set(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Item document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ItemDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(flatten)]
    pub metadata: Metadata,

    /// Owning seller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller: Option<ObjectId>,

    /// Listing title
    #[serde(default)]
    pub title: String,

    /// Listing description
    #[serde(default)]
    pub description: String,

    /// Trust score in [0, 1], unset until the first signal arrives
    #[serde(default)]
    pub trust_score: Option<f64>,

    #[serde(default)]
    pub risk_level: RiskLevel,

    #[serde(default)]
    pub status: ItemStatus,

    #[serde(default)]
    pub flags: BTreeSet<Flag>,

    #[serde(default)]
    pub signal_breakdown: SignalBreakdown,

    /// Append-only audit trail of status changes
    #[serde(default)]
    pub status_history: Vec<StatusHistoryEntry>,

    /// Optimistic concurrency token, bumped on every automated write
    #[serde(default)]
    pub revision: i64,
}

impl ItemDoc {
    /// Create a new item in its initial state: pending, unscored
    pub fn new(title: String, description: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            seller: None,
            title,
            description,
            trust_score: None,
            risk_level: RiskLevel::Red,
            status: ItemStatus::Pending,
            flags: BTreeSet::new(),
            signal_breakdown: SignalBreakdown::default(),
            status_history: Vec::new(),
            revision: 0,
        }
    }

    pub fn has_flag(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }
}

impl IntoIndexes for ItemDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Moderation queues filter by status
            (
                doc! { "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "seller": 1 },
                Some(
                    IndexOptions::builder()
                        .name("seller_index".to_string())
                        .sparse(true)
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ItemDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
