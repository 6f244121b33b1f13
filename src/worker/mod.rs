//! Signal workers
//!
//! Each worker turns one job payload into store writes. The [`processor`]
//! drives them from JetStream and decides, from the returned error, whether a
//! job is acked, retried or dead-lettered.

pub mod burst;
pub mod item;
pub mod processor;
pub mod review;

use async_trait::async_trait;
use bson::oid::ObjectId;

use crate::db::schemas::{ItemStatus, RiskLevel};
use crate::jobs::JobKind;
use crate::types::Result;

pub use burst::{BurstPolicy, BurstVerdict};
pub use item::ItemSignalWorker;
pub use processor::{ConsumerConfig, Disposition, SignalConsumer};
pub use review::ReviewSignalWorker;

/// What a successfully handled job did
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Item {
        item_id: ObjectId,
        trust_score: Option<f64>,
        risk_level: RiskLevel,
        status: ItemStatus,
        /// Whether a status history entry was appended
        transitioned: bool,
    },
    Review {
        review_id: ObjectId,
        confidence: f64,
        ai_flag: bool,
        burst: BurstVerdict,
    },
}

/// Handles raw job payloads of one kind
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Decode and process one payload
    async fn handle(&self, payload: &[u8]) -> Result<JobOutcome>;
}

/// Run an adapter call under a deadline, mapping expiry to a retryable error
pub(crate) async fn with_deadline<T, F>(
    what: &str,
    timeout: std::time::Duration,
    call: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| crate::types::VeritasError::Signal(format!("{} timed out", what)))?
}
