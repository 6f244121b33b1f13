//! Review authenticity classifier client

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{ensure_unit_interval, ReviewAnalysis, ReviewClassifier};
use crate::types::{Result, VeritasError};

/// Configuration for the classifier client
#[derive(Debug, Clone)]
pub struct ReviewClassifierConfig {
    /// Service base URL (e.g. "http://localhost:8002")
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ReviewClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    comment: &'a str,
    rating: i32,
}

/// HTTP client for the review authenticity classifier
pub struct HttpReviewClassifier {
    config: ReviewClassifierConfig,
    http_client: reqwest::Client,
}

impl HttpReviewClassifier {
    pub fn new(config: ReviewClassifierConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("veritas-worker/0.1")
            .build()
            .map_err(|e| VeritasError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn analyze_url(&self) -> String {
        format!("{}/analyze", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ReviewClassifier for HttpReviewClassifier {
    async fn analyze(&self, comment: &str, rating: i32) -> Result<ReviewAnalysis> {
        let analysis: ReviewAnalysis = self
            .http_client
            .post(self.analyze_url())
            .json(&AnalyzeRequest { comment, rating })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        validate(&analysis)?;

        debug!(
            confidence = analysis.confidence,
            pred = ?analysis.pred,
            "Review classifier responded"
        );
        Ok(analysis)
    }
}

fn validate(analysis: &ReviewAnalysis) -> Result<()> {
    ensure_unit_interval("confidence", analysis.confidence)?;
    match analysis.pred {
        None | Some(0) | Some(1) => Ok(()),
        Some(other) => Err(VeritasError::SignalRejected(format!(
            "pred must be 0 or 1, got {}",
            other
        ))),
    }
}
