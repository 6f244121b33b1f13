//! Signal-analysis jobs
//!
//! Wire payloads as producers publish them, plus validation into typed jobs.
//! Every field is optional on the wire so a bad producer yields a
//! `MalformedJob` rather than an opaque parse failure.

mod publisher;

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::types::{Result, VeritasError};

pub use publisher::{ensure_streams, DeadLetter, JobPublisher};

/// JetStream stream holding pending jobs
pub const STREAM_NAME: &str = "SIGNAL_JOBS";
/// JetStream stream holding jobs that exhausted their deliveries
pub const DEAD_LETTER_STREAM: &str = "SIGNAL_DEAD_LETTER";
pub const SUBJECT_PREFIX: &str = "signals";
pub const DEAD_LETTER_PREFIX: &str = "signals.dead";

/// Job types, one queue subject and one durable consumer each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    ItemSignal,
    ReviewSignal,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ItemSignal => "item",
            JobKind::ReviewSignal => "review",
        }
    }

    /// Subject jobs of this kind are published on
    pub fn subject(&self) -> String {
        format!("{}.{}", SUBJECT_PREFIX, self.as_str())
    }

    /// Subject failed jobs of this kind are parked on
    pub fn dead_letter_subject(&self) -> String {
        format!("{}.{}", DEAD_LETTER_PREFIX, self.as_str())
    }

    /// Durable consumer name shared by every worker instance
    pub fn consumer_name(&self) -> String {
        format!("{}_signal_worker", self.as_str())
    }
}

/// Image/description analysis request for an item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSignalJob {
    #[serde(default, alias = "productId")]
    pub item_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Image URL or local path
    #[serde(default, alias = "imagePath")]
    pub image_ref: Option<String>,
}

/// Authenticity analysis request for a review
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSignalJob {
    #[serde(default)]
    pub review_id: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default, alias = "productId")]
    pub item_id: Option<String>,
}

/// Item job with every field present and well-formed
#[derive(Debug, Clone, PartialEq)]
pub struct ValidItemJob {
    pub item_id: ObjectId,
    pub description: String,
    pub image_ref: String,
}

/// Review job with every field present and well-formed
#[derive(Debug, Clone, PartialEq)]
pub struct ValidReviewJob {
    pub review_id: ObjectId,
    pub item_id: ObjectId,
    pub comment: String,
    pub rating: i32,
}

impl ItemSignalJob {
    pub fn new(item_id: ObjectId, description: &str, image_ref: &str) -> Self {
        Self {
            item_id: Some(item_id.to_hex()),
            description: Some(description.to_string()),
            image_ref: Some(image_ref.to_string()),
        }
    }

    pub fn validate(&self) -> Result<ValidItemJob> {
        Ok(ValidItemJob {
            item_id: object_id("itemId", &self.item_id)?,
            description: required_text("description", &self.description)?,
            image_ref: required_text("imageRef", &self.image_ref)?,
        })
    }
}

impl ReviewSignalJob {
    pub fn new(review_id: ObjectId, item_id: ObjectId, comment: &str, rating: i32) -> Self {
        Self {
            review_id: Some(review_id.to_hex()),
            comment: Some(comment.to_string()),
            rating: Some(f64::from(rating)),
            item_id: Some(item_id.to_hex()),
        }
    }

    pub fn validate(&self) -> Result<ValidReviewJob> {
        Ok(ValidReviewJob {
            review_id: object_id("reviewId", &self.review_id)?,
            item_id: object_id("itemId", &self.item_id)?,
            comment: required_text("comment", &self.comment)?,
            rating: star_rating(self.rating)?,
        })
    }
}

fn required_text(field: &str, value: &Option<String>) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(VeritasError::MalformedJob(format!("missing {}", field))),
    }
}

fn object_id(field: &str, value: &Option<String>) -> Result<ObjectId> {
    let raw = required_text(field, value)?;
    ObjectId::parse_str(&raw)
        .map_err(|e| VeritasError::MalformedJob(format!("{} is not an object id: {}", field, e)))
}

fn star_rating(value: Option<f64>) -> Result<i32> {
    let rating = value.ok_or_else(|| VeritasError::MalformedJob("missing rating".into()))?;
    if rating.fract() != 0.0 || !(1.0..=5.0).contains(&rating) {
        return Err(VeritasError::MalformedJob(format!(
            "rating must be an integer from 1 to 5, got {}",
            rating
        )));
    }
    Ok(rating as i32)
}
