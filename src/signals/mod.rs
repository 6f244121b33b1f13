//! Signal adapters
//!
//! Thin request/response clients for the two external classifiers. Workers
//! depend on the traits so tests can substitute canned verdicts.

pub mod image_match;
pub mod review_auth;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::trust::ImageVerdict;
use crate::types::{Result, VeritasError};

pub use image_match::{HttpImageMatcher, ImageMatcherConfig};
pub use review_auth::{HttpReviewClassifier, ReviewClassifierConfig};

/// Label returned by the image/description matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchLabel {
    Fake,
    Genuine,
}

/// Image/description matcher response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub label: MatchLabel,
    /// Similarity between image and description, in [0, 1]
    pub score: f64,
}

impl MatchResult {
    pub fn verdict(&self) -> ImageVerdict {
        match self.label {
            MatchLabel::Fake => ImageVerdict::Mismatch,
            MatchLabel::Genuine => ImageVerdict::Match,
        }
    }
}

/// Review authenticity classifier response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewAnalysis {
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Binary prediction, when the classifier provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pred: Option<u8>,
}

/// Image/description matcher
#[async_trait]
pub trait ImageMatcher: Send + Sync {
    /// Compare the image at `image_ref` (URL or local path) with a description
    async fn match_image(&self, image_ref: &str, description: &str) -> Result<MatchResult>;
}

/// Review authenticity classifier
#[async_trait]
pub trait ReviewClassifier: Send + Sync {
    async fn analyze(&self, comment: &str, rating: i32) -> Result<ReviewAnalysis>;
}

/// Reject numeric fields outside [0, 1]; the adapter broke its contract.
pub(crate) fn ensure_unit_interval(field: &str, value: f64) -> Result<f64> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(VeritasError::SignalRejected(format!(
            "{} out of range: {}",
            field, value
        )))
    }
}
