//! Item signal worker
//!
//! Sends the item's image and description to the matcher and folds the verdict
//! into the item's trust state.

use async_trait::async_trait;
use bson::DateTime;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{with_deadline, JobHandler, JobOutcome};
use crate::jobs::{ItemSignalJob, JobKind};
use crate::signals::ImageMatcher;
use crate::store::{update_item_versioned, ItemStore};
use crate::trust::{self, TrustPolicy};
use crate::types::Result;

pub struct ItemSignalWorker {
    matcher: Arc<dyn ImageMatcher>,
    store: Arc<dyn ItemStore>,
    policy: TrustPolicy,
    write_attempts: u32,
    signal_timeout: Duration,
}

impl ItemSignalWorker {
    pub fn new(matcher: Arc<dyn ImageMatcher>, store: Arc<dyn ItemStore>) -> Self {
        Self {
            matcher,
            store,
            policy: TrustPolicy::default(),
            write_attempts: 5,
            signal_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_policy(mut self, policy: TrustPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = attempts.max(1);
        self
    }

    pub fn with_signal_timeout(mut self, timeout: Duration) -> Self {
        self.signal_timeout = timeout;
        self
    }

    pub async fn process(&self, job: &ItemSignalJob) -> Result<JobOutcome> {
        let job = job.validate()?;

        let result = with_deadline(
            "image matcher",
            self.signal_timeout,
            self.matcher.match_image(&job.image_ref, &job.description),
        )
        .await?;

        debug!(
            item_id = %job.item_id,
            label = ?result.label,
            score = result.score,
            "Image matcher verdict"
        );

        let verdict = result.verdict();
        let mut transitioned = false;
        let item = update_item_versioned(
            self.store.as_ref(),
            job.item_id,
            self.write_attempts,
            |item| {
                transitioned =
                    trust::apply_image_verdict(item, verdict, result.score, &self.policy, DateTime::now());
            },
        )
        .await?;

        if transitioned {
            info!(
                item_id = %job.item_id,
                status = %item.status,
                risk = ?item.risk_level,
                score = item.trust_score,
                "Item status recorded"
            );
        }

        Ok(JobOutcome::Item {
            item_id: job.item_id,
            trust_score: item.trust_score,
            risk_level: item.risk_level,
            status: item.status,
            transitioned,
        })
    }
}

#[async_trait]
impl JobHandler for ItemSignalWorker {
    fn kind(&self) -> JobKind {
        JobKind::ItemSignal
    }

    async fn handle(&self, payload: &[u8]) -> Result<JobOutcome> {
        let job: ItemSignalJob = serde_json::from_slice(payload)?;
        self.process(&job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{Flag, ItemDoc, ItemStatus};
    use crate::signals::{MatchLabel, MatchResult};
    use crate::store::MemoryStore;
    use crate::types::VeritasError;
    use bson::oid::ObjectId;

    struct FixedMatcher(MatchLabel, f64);

    #[async_trait]
    impl ImageMatcher for FixedMatcher {
        async fn match_image(&self, _image_ref: &str, _description: &str) -> Result<MatchResult> {
            Ok(MatchResult {
                label: self.0,
                score: self.1,
            })
        }
    }

    struct SlowMatcher;

    #[async_trait]
    impl ImageMatcher for SlowMatcher {
        async fn match_image(&self, _image_ref: &str, _description: &str) -> Result<MatchResult> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(VeritasError::Internal("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_mismatch_flags_item() {
        let store = Arc::new(MemoryStore::new());
        let id = store
            .insert_item(ItemDoc::new("Sneakers".into(), "Red sneakers".into()))
            .await
            .unwrap();
        let worker = ItemSignalWorker::new(Arc::new(FixedMatcher(MatchLabel::Fake, 0.31)), store.clone());

        let outcome = worker
            .process(&ItemSignalJob::new(id, "Red sneakers", "https://cdn/img.jpg"))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            JobOutcome::Item { status: ItemStatus::Pending, transitioned: true, .. }
        ));
        let item = store.load_item(id).await.unwrap().unwrap();
        assert!(item.has_flag(&Flag::DescImageMismatch));
        assert_eq!(item.trust_score, Some(0.2));
    }

    #[tokio::test]
    async fn test_handle_rejects_garbage_payload() {
        let worker = ItemSignalWorker::new(
            Arc::new(FixedMatcher(MatchLabel::Genuine, 0.9)),
            Arc::new(MemoryStore::new()),
        );
        let err = worker.handle(b"{not json").await.unwrap_err();
        assert!(matches!(err, VeritasError::MalformedJob(_)));
    }

    #[tokio::test]
    async fn test_missing_item_is_not_found() {
        let worker = ItemSignalWorker::new(
            Arc::new(FixedMatcher(MatchLabel::Genuine, 0.9)),
            Arc::new(MemoryStore::new()),
        );
        let err = worker
            .process(&ItemSignalJob::new(ObjectId::new(), "x", "/tmp/x.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, VeritasError::NotFound(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_matcher_times_out_retryably() {
        let store = Arc::new(MemoryStore::new());
        let id = store
            .insert_item(ItemDoc::new("Mug".into(), "Blue mug".into()))
            .await
            .unwrap();
        let worker = ItemSignalWorker::new(Arc::new(SlowMatcher), store.clone())
            .with_signal_timeout(Duration::from_secs(1));

        let err = worker
            .process(&ItemSignalJob::new(id, "Blue mug", "/tmp/mug.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, VeritasError::Signal(_)));
        assert!(err.is_retryable());

        let item = store.load_item(id).await.unwrap().unwrap();
        assert_eq!(item.trust_score, None);
        assert!(item.status_history.is_empty());
    }
}
