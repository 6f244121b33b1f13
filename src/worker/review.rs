//! Review signal worker
//!
//! Classifies a review, records the result, then rechecks the item's burst
//! window.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::burst::{detect_burst, BurstPolicy};
use super::{with_deadline, JobHandler, JobOutcome};
use crate::jobs::{JobKind, ReviewSignalJob};
use crate::signals::ReviewClassifier;
use crate::store::{ItemStore, ReviewSignal, ReviewStore};
use crate::types::{Result, VeritasError};

pub struct ReviewSignalWorker {
    classifier: Arc<dyn ReviewClassifier>,
    reviews: Arc<dyn ReviewStore>,
    items: Arc<dyn ItemStore>,
    policy: BurstPolicy,
    signal_timeout: Duration,
}

impl ReviewSignalWorker {
    pub fn new(
        classifier: Arc<dyn ReviewClassifier>,
        reviews: Arc<dyn ReviewStore>,
        items: Arc<dyn ItemStore>,
    ) -> Self {
        Self {
            classifier,
            reviews,
            items,
            policy: BurstPolicy::default(),
            signal_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_policy(mut self, policy: BurstPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_signal_timeout(mut self, timeout: Duration) -> Self {
        self.signal_timeout = timeout;
        self
    }

    pub async fn process(&self, job: &ReviewSignalJob) -> Result<JobOutcome> {
        let job = job.validate()?;

        let analysis = with_deadline(
            "review classifier",
            self.signal_timeout,
            self.classifier.analyze(&job.comment, job.rating),
        )
        .await?;

        let signal = ReviewSignal {
            confidence: analysis.confidence,
            ai_flag: self.policy.is_suspect(analysis.confidence),
            prediction: analysis.pred,
        };

        if !self.reviews.record_review_signal(job.review_id, &signal).await? {
            return Err(VeritasError::NotFound(format!("review {}", job.review_id)));
        }

        debug!(
            review_id = %job.review_id,
            confidence = signal.confidence,
            ai_flag = signal.ai_flag,
            "Review signal recorded"
        );

        let burst = detect_burst(
            self.reviews.as_ref(),
            self.items.as_ref(),
            job.item_id,
            &self.policy,
            Utc::now(),
        )
        .await?;

        Ok(JobOutcome::Review {
            review_id: job.review_id,
            confidence: signal.confidence,
            ai_flag: signal.ai_flag,
            burst,
        })
    }
}

#[async_trait]
impl JobHandler for ReviewSignalWorker {
    fn kind(&self) -> JobKind {
        JobKind::ReviewSignal
    }

    async fn handle(&self, payload: &[u8]) -> Result<JobOutcome> {
        let job: ReviewSignalJob = serde_json::from_slice(payload)?;
        self.process(&job).await
    }
}
