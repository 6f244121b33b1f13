//! Configuration for Veritas
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::time::Duration;

use crate::trust::TrustPolicy;
use crate::worker::burst::BurstPolicy;
use crate::worker::processor::ConsumerConfig;

/// Slack on top of the slower adapter timeout when draining consumers at shutdown
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(10);

/// Veritas - trust scoring and review moderation workers
#[derive(Parser, Debug, Clone)]
#[command(name = "veritas-worker")]
#[command(about = "Signal-analysis workers for item trust scoring and review moderation")]
#[command(version)]
pub struct Args {
    /// Unique worker identifier (auto-generated if not provided)
    #[arg(long, env = "WORKER_ID")]
    pub worker_id: Option<String>,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// MongoDB configuration
    #[command(flatten)]
    pub mongo: MongoArgs,

    /// Signal adapter configuration
    #[command(flatten)]
    pub signals: SignalArgs,

    /// Scoring and burst detection parameters
    #[command(flatten)]
    pub scoring: ScoringArgs,

    /// Redelivery and write-retry policy
    #[command(flatten)]
    pub retry: RetryArgs,

    /// Run the item signal consumer
    #[arg(long, env = "ENABLE_ITEM_WORKER", default_value = "true")]
    pub enable_item_worker: bool,

    /// Run the review signal consumer
    #[arg(long, env = "ENABLE_REVIEW_WORKER", default_value = "true")]
    pub enable_review_worker: bool,

    /// Maximum jobs processed concurrently per consumer
    #[arg(long, env = "MAX_CONCURRENT", default_value = "8")]
    pub max_concurrent: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

/// MongoDB connection configuration
#[derive(Parser, Debug, Clone)]
pub struct MongoArgs {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "marketplace")]
    pub mongodb_db: String,
}

/// External classifier endpoints
#[derive(Parser, Debug, Clone)]
pub struct SignalArgs {
    /// Base URL of the image/description matcher
    #[arg(long, env = "IMAGE_MATCHER_URL", default_value = "http://localhost:8001")]
    pub image_matcher_url: String,

    /// Image matcher timeout in milliseconds
    #[arg(long, env = "IMAGE_MATCHER_TIMEOUT_MS", default_value = "20000")]
    pub image_matcher_timeout_ms: u64,

    /// Base URL of the review authenticity classifier
    #[arg(long, env = "REVIEW_ANALYZER_URL", default_value = "http://localhost:8002")]
    pub review_analyzer_url: String,

    /// Review classifier timeout in milliseconds
    #[arg(long, env = "REVIEW_ANALYZER_TIMEOUT_MS", default_value = "10000")]
    pub review_analyzer_timeout_ms: u64,
}

/// Trust scoring and burst detection parameters
#[derive(Parser, Debug, Clone)]
pub struct ScoringArgs {
    /// Confidence at or above which a review is marked AI-suspected
    #[arg(long, env = "AI_CONFIDENCE_THRESHOLD", default_value = "0.5")]
    pub ai_confidence_threshold: f64,

    /// Length of the trailing burst window in minutes
    #[arg(long, env = "BURST_WINDOW_MINUTES", default_value = "10")]
    pub burst_window_minutes: u32,

    /// Minimum AI-flagged reviews inside the window to consider a burst
    #[arg(long, env = "BURST_MIN_COUNT", default_value = "3")]
    pub burst_min_count: usize,

    /// Trust decrease applied on an image/description mismatch
    #[arg(long, env = "MISMATCH_STEP", default_value = "0.2")]
    pub mismatch_step: f64,

    /// Score assigned on a mismatch when the item has no score yet
    #[arg(long, env = "MISMATCH_DEFAULT_SCORE", default_value = "0.2")]
    pub mismatch_default_score: f64,

    /// Trust increase applied on an image/description match
    #[arg(long, env = "MATCH_STEP", default_value = "0.1")]
    pub match_step: f64,

    /// Score assigned on a match when the item has no score yet
    #[arg(long, env = "MATCH_DEFAULT_SCORE", default_value = "1.0")]
    pub match_default_score: f64,
}

/// Queue redelivery and store write-retry policy
#[derive(Parser, Debug, Clone)]
pub struct RetryArgs {
    /// Deliveries before a failing job is dead-lettered
    #[arg(long, env = "MAX_DELIVER", default_value = "5")]
    pub max_deliver: u32,

    /// Base redelivery delay in milliseconds (multiplied by delivery count)
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value = "2000")]
    pub retry_backoff_ms: u64,

    /// Conditional write attempts before giving up on a contended item
    #[arg(long, env = "WRITE_ATTEMPTS", default_value = "5")]
    pub write_attempts: u32,
}

impl Args {
    /// Get effective worker ID (generates one if not set)
    pub fn worker_id(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Trust step policy for the item worker
    pub fn trust_policy(&self) -> TrustPolicy {
        TrustPolicy {
            mismatch_step: self.scoring.mismatch_step,
            mismatch_default: self.scoring.mismatch_default_score,
            match_step: self.scoring.match_step,
            match_default: self.scoring.match_default_score,
        }
    }

    /// Burst detection policy for the review worker
    pub fn burst_policy(&self) -> BurstPolicy {
        BurstPolicy {
            confidence_threshold: self.scoring.ai_confidence_threshold,
            window: chrono::Duration::minutes(i64::from(self.scoring.burst_window_minutes)),
            min_count: self.scoring.burst_min_count,
        }
    }

    pub fn image_matcher_timeout(&self) -> Duration {
        Duration::from_millis(self.signals.image_matcher_timeout_ms)
    }

    pub fn review_analyzer_timeout(&self) -> Duration {
        Duration::from_millis(self.signals.review_analyzer_timeout_ms)
    }

    /// Consumer settings for jobs whose adapter call is bounded by `signal_timeout`
    /// How long shutdown waits for in-flight jobs before leaving them to redelivery
    pub fn shutdown_grace(&self) -> Duration {
        self.image_matcher_timeout().max(self.review_analyzer_timeout()) + SHUTDOWN_MARGIN
    }

    pub fn consumer_config(&self, worker_id: &str, signal_timeout: Duration) -> ConsumerConfig {
        ConsumerConfig {
            worker_id: worker_id.to_string(),
            max_concurrent: self.max_concurrent,
            max_deliver: self.retry.max_deliver,
            retry_backoff: Duration::from_millis(self.retry.retry_backoff_ms),
            signal_timeout,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.scoring.ai_confidence_threshold) {
            return Err("AI_CONFIDENCE_THRESHOLD must be within [0, 1]".to_string());
        }

        for (name, value) in [
            ("MISMATCH_STEP", self.scoring.mismatch_step),
            ("MISMATCH_DEFAULT_SCORE", self.scoring.mismatch_default_score),
            ("MATCH_STEP", self.scoring.match_step),
            ("MATCH_DEFAULT_SCORE", self.scoring.match_default_score),
        ] {
            if !unit.contains(&value) {
                return Err(format!("{} must be within [0, 1]", name));
            }
        }

        if self.scoring.burst_window_minutes == 0 {
            return Err("BURST_WINDOW_MINUTES must be greater than 0".to_string());
        }

        if self.scoring.burst_min_count == 0 {
            return Err("BURST_MIN_COUNT must be greater than 0".to_string());
        }

        if self.retry.max_deliver == 0 || self.retry.write_attempts == 0 {
            return Err("MAX_DELIVER and WRITE_ATTEMPTS must be greater than 0".to_string());
        }

        if self.max_concurrent == 0 {
            return Err("MAX_CONCURRENT must be greater than 0".to_string());
        }

        if !self.enable_item_worker && !self.enable_review_worker {
            return Err("At least one of the item or review workers must be enabled".to_string());
        }

        Ok(())
    }
}
