//! Job publishing and dead-letter parking on JetStream

use async_nats::jetstream::{self, stream::Stream};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{
    ItemSignalJob, JobKind, ReviewSignalJob, DEAD_LETTER_PREFIX, DEAD_LETTER_STREAM, STREAM_NAME,
};
use crate::types::{Result, VeritasError};

/// A job that failed on its last allowed delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub job_kind: String,
    pub subject: String,
    /// Original payload, lossily decoded as UTF-8
    pub payload: String,
    pub error: String,
    pub error_kind: String,
    pub deliveries: u32,
    pub worker_id: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        kind: JobKind,
        payload: &[u8],
        error: &VeritasError,
        deliveries: u32,
        worker_id: &str,
    ) -> Self {
        Self {
            job_kind: kind.as_str().to_string(),
            subject: kind.subject(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            error: error.to_string(),
            error_kind: error.kind().to_string(),
            deliveries,
            worker_id: worker_id.to_string(),
            failed_at: Utc::now(),
        }
    }
}

/// Create the job and dead-letter streams if they do not exist yet
pub async fn ensure_streams(jetstream: &jetstream::Context) -> Result<(Stream, Stream)> {
    let jobs = jetstream
        .get_or_create_stream(jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![
                JobKind::ItemSignal.subject(),
                JobKind::ReviewSignal.subject(),
            ],
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            storage: jetstream::stream::StorageType::File,
            max_age: Duration::from_secs(7 * 24 * 3600),
            ..Default::default()
        })
        .await
        .map_err(|e| VeritasError::Nats(format!("Failed to create stream: {e}")))?;

    let dead = jetstream
        .get_or_create_stream(jetstream::stream::Config {
            name: DEAD_LETTER_STREAM.to_string(),
            subjects: vec![format!("{}.>", DEAD_LETTER_PREFIX)],
            storage: jetstream::stream::StorageType::File,
            max_age: Duration::from_secs(30 * 24 * 3600),
            ..Default::default()
        })
        .await
        .map_err(|e| VeritasError::Nats(format!("Failed to create dead-letter stream: {e}")))?;

    info!(
        "Using streams {} and {}",
        STREAM_NAME, DEAD_LETTER_STREAM
    );
    Ok((jobs, dead))
}

/// Publishes signal-analysis jobs for the workers to pick up.
///
/// Called by the item/review CRUD path after a create or update; publishing
/// waits for the JetStream ack so a returned `Ok` means the job is durable.
#[derive(Clone)]
pub struct JobPublisher {
    jetstream: jetstream::Context,
}

impl JobPublisher {
    pub fn new(jetstream: jetstream::Context) -> Self {
        Self { jetstream }
    }

    pub async fn enqueue_item_signal(&self, job: &ItemSignalJob) -> Result<()> {
        self.publish_json(JobKind::ItemSignal.subject(), job).await
    }

    pub async fn enqueue_review_signal(&self, job: &ReviewSignalJob) -> Result<()> {
        self.publish_json(JobKind::ReviewSignal.subject(), job).await
    }

    /// Park a failed job on the dead-letter stream
    pub async fn dead_letter(&self, kind: JobKind, letter: &DeadLetter) -> Result<()> {
        self.publish_json(kind.dead_letter_subject(), letter).await
    }

    async fn publish_json<T: Serialize>(&self, subject: String, body: &T) -> Result<()> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| VeritasError::Internal(format!("Failed to encode job: {e}")))?;

        self.jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| VeritasError::Nats(format!("Publish to {subject} failed: {e}")))?
            .await
            .map_err(|e| VeritasError::Nats(format!("Publish to {subject} not acked: {e}")))?;

        debug!("Published to {}", subject);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_captures_failure() {
        let err = VeritasError::Signal("matcher unreachable".into());
        let letter = DeadLetter::new(JobKind::ItemSignal, br#"{"itemId":"x"}"#, &err, 5, "w-1");

        assert_eq!(letter.subject, "signals.item");
        assert_eq!(letter.error_kind, err.kind());
        assert_eq!(letter.deliveries, 5);

        let json = serde_json::to_value(&letter).unwrap();
        assert_eq!(json["jobKind"], "item");
        assert_eq!(json["payload"], r#"{"itemId":"x"}"#);
    }

    #[test]
    fn test_dead_letter_tolerates_binary_payload() {
        let err = VeritasError::Internal("boom".into());
        let letter = DeadLetter::new(JobKind::ReviewSignal, &[0xff, 0xfe], &err, 1, "w");
        assert!(!letter.payload.is_empty());
    }
}
