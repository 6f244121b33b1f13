//! Review document schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for reviews
pub const REVIEW_COLLECTION: &str = "reviews";

/// Key in `ai_analysis_meta` holding the classifier's binary prediction
pub const META_PREDICTION: &str = "pred";

/// Review document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata; `createdAt` anchors the burst window
    #[serde(flatten)]
    pub metadata: Metadata,

    /// Reviewed item
    #[serde(rename = "product")]
    pub item_id: ObjectId,

    /// Review author
    #[serde(rename = "user")]
    pub author_id: ObjectId,

    /// Star rating, 1 to 5
    pub rating: i32,

    #[serde(default)]
    pub comment: String,

    /// Classifier confidence in [0, 1], unset until analysed
    #[serde(default)]
    pub confidence: Option<f64>,

    /// Suspected machine-generated
    #[serde(default)]
    pub ai_flag: bool,

    /// Hidden from listings; never cleared by automated processing
    #[serde(default)]
    pub takedown_flag: bool,

    /// Auxiliary classifier outputs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ai_analysis_meta: BTreeMap<String, f64>,
}

impl ReviewDoc {
    pub fn new(item_id: ObjectId, author_id: ObjectId, rating: i32, comment: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            item_id,
            author_id,
            rating,
            comment,
            confidence: None,
            ai_flag: false,
            takedown_flag: false,
            ai_analysis_meta: BTreeMap::new(),
        }
    }
}

impl IntoIndexes for ReviewDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One review per author per item
            (
                doc! { "product": 1, "user": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("product_user_unique".to_string())
                        .build(),
                ),
            ),
            // Burst window scan
            (
                doc! { "product": 1, "aiFlag": 1, "createdAt": 1 },
                Some(
                    IndexOptions::builder()
                        .name("burst_window_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ReviewDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
