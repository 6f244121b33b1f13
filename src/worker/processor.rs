//! Worker processor - NATS JetStream consumer for signal jobs
//!
//! Pulls jobs of one kind from the shared durable consumer, runs them through a
//! [`JobHandler`] and settles each message from the result.

use async_nats::jetstream::{self, consumer::PullConsumer, stream::Stream, AckKind};
use futures_util::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::{JobHandler, JobOutcome};
use crate::jobs::{ensure_streams, DeadLetter, JobPublisher};
use crate::types::{Result, VeritasError};

/// Unacked messages the server hands out per consumer, across all instances
const MAX_ACK_PENDING: i64 = 1000;

/// Extra ack time on top of the adapter timeout, for store writes and burst checks
const ACK_WAIT_MARGIN: Duration = Duration::from_secs(30);

/// How long a fetch waits for messages before returning an empty batch
const FETCH_EXPIRY: Duration = Duration::from_secs(5);

/// Consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub worker_id: String,
    /// Jobs processed concurrently by this instance
    pub max_concurrent: usize,
    /// Deliveries before a failing job is dead-lettered
    pub max_deliver: u32,
    /// Redelivery delay per delivery so far
    pub retry_backoff: Duration,
    /// Timeout of the signal adapter this consumer's jobs call
    pub signal_timeout: Duration,
}

impl ConsumerConfig {
    /// Time the server waits for an ack before redelivering
    pub fn ack_wait(&self) -> Duration {
        self.signal_timeout + ACK_WAIT_MARGIN
    }

    /// Redelivery delay after the nth failed delivery
    pub fn backoff_for(&self, delivered: u32) -> Duration {
        self.retry_backoff.saturating_mul(delivered.max(1))
    }
}

/// How a processed message is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done
    Ack,
    /// Will never succeed; terminate without redelivery
    Discard,
    /// Redeliver after the delay
    Retry(Duration),
    /// Out of deliveries; park on the dead-letter stream, then terminate
    DeadLetter,
}

/// Decide how to settle a message given the handler result and delivery count
pub fn disposition(
    result: &Result<JobOutcome>,
    delivered: u32,
    config: &ConsumerConfig,
) -> Disposition {
    match result {
        Ok(_) => Disposition::Ack,
        Err(e) if !e.is_retryable() => Disposition::Discard,
        Err(_) if delivered >= config.max_deliver => Disposition::DeadLetter,
        Err(_) => Disposition::Retry(config.backoff_for(delivered)),
    }
}

/// JetStream consumer driving one job handler
pub struct SignalConsumer {
    config: ConsumerConfig,
    jetstream: jetstream::Context,
    publisher: JobPublisher,
    handler: Arc<dyn JobHandler>,
    running: Arc<RwLock<bool>>,
}

impl SignalConsumer {
    pub fn new(
        config: ConsumerConfig,
        jetstream: jetstream::Context,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        let publisher = JobPublisher::new(jetstream.clone());
        Self {
            config,
            jetstream,
            publisher,
            handler,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run the consumer processing loop until stopped
    pub async fn run(&self) -> Result<()> {
        *self.running.write().await = true;

        let (stream, _) = ensure_streams(&self.jetstream).await?;
        let consumer = self.ensure_consumer(&stream).await?;

        info!(
            "Worker {} consuming {} jobs",
            self.config.worker_id,
            self.handler.kind().as_str()
        );

        while *self.running.read().await {
            match self.process_batch(&consumer).await {
                Ok(count) => {
                    if count > 0 {
                        debug!("Processed {} jobs", count);
                    }
                }
                Err(e) => {
                    error!("Error processing batch: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!(
            "Worker {} stopped consuming {} jobs",
            self.config.worker_id,
            self.handler.kind().as_str()
        );
        Ok(())
    }

    /// Stop after the current batch
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// Bind to the durable consumer shared by every instance
    async fn ensure_consumer(&self, stream: &Stream) -> Result<PullConsumer> {
        let kind = self.handler.kind();
        let consumer_name = kind.consumer_name();

        let consumer = stream
            .get_or_create_consumer(
                &consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(consumer_name.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    filter_subject: kind.subject(),
                    ack_wait: self.config.ack_wait(),
                    // One spare delivery so a crash on the last attempt still
                    // reaches the dead-letter path.
                    max_deliver: i64::from(self.config.max_deliver) + 1,
                    max_ack_pending: MAX_ACK_PENDING,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| VeritasError::Nats(format!("Failed to create consumer: {e}")))?;

        info!("Using consumer {}", consumer_name);
        Ok(consumer)
    }

    /// Fetch a batch and process it concurrently
    async fn process_batch(&self, consumer: &PullConsumer) -> Result<usize> {
        let mut messages = consumer
            .fetch()
            .max_messages(self.config.max_concurrent)
            .expires(FETCH_EXPIRY)
            .messages()
            .await
            .map_err(|e| VeritasError::Nats(format!("Failed to fetch messages: {e}")))?;

        let mut batch = Vec::new();
        while let Some(msg_result) = messages.next().await {
            match msg_result {
                Ok(msg) => batch.push(msg),
                Err(e) => warn!("Error receiving message: {}", e),
            }
        }

        let count = batch.len();
        stream::iter(batch)
            .for_each_concurrent(self.config.max_concurrent, |msg| self.process_message(msg))
            .await;

        Ok(count)
    }

    /// Process a single message and settle it
    async fn process_message(&self, msg: jetstream::Message) {
        let kind = self.handler.kind();
        let delivered = msg
            .info()
            .map(|info| u32::try_from(info.delivered).unwrap_or(u32::MAX))
            .unwrap_or(1);

        let result = self.handler.handle(&msg.payload).await;

        let settle = match disposition(&result, delivered, &self.config) {
            Disposition::Ack => {
                if let Ok(outcome) = &result {
                    debug!(job = kind.as_str(), ?outcome, "Job done");
                }
                msg.ack().await
            }
            Disposition::Discard => {
                if let Err(e) = &result {
                    warn!(
                        job = kind.as_str(),
                        error_kind = e.kind(),
                        "Discarding job: {}",
                        e
                    );
                }
                msg.ack_with(AckKind::Term).await
            }
            Disposition::Retry(delay) => {
                if let Err(e) = &result {
                    warn!(
                        job = kind.as_str(),
                        delivered,
                        retry_in_ms = delay.as_millis() as u64,
                        "Job failed, will retry: {}",
                        e
                    );
                }
                msg.ack_with(AckKind::Nak(Some(delay))).await
            }
            Disposition::DeadLetter => {
                let Err(e) = &result else { return };
                error!(
                    job = kind.as_str(),
                    delivered,
                    "Job exhausted its deliveries, dead-lettering: {}",
                    e
                );
                let letter =
                    DeadLetter::new(kind, &msg.payload, e, delivered, &self.config.worker_id);
                if let Err(publish_err) = self.publisher.dead_letter(kind, &letter).await {
                    // Leave it unsettled; the server's spare delivery retries it
                    error!("Failed to dead-letter {} job: {}", kind.as_str(), publish_err);
                    return;
                }
                msg.ack_with(AckKind::Term).await
            }
        };

        if let Err(e) = settle {
            warn!("Failed to settle message: {}", e);
        }
    }
}
