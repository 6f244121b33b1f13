//! Error types for Veritas
//!
//! Every failure a worker can hit maps onto one variant here, and the variant
//! decides whether the queue should redeliver the job.

/// Main error type for Veritas operations
#[derive(Debug, thiserror::Error)]
pub enum VeritasError {
    #[error("Malformed job: {0}")]
    MalformedJob(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Signal adapter error: {0}")]
    Signal(String),

    #[error("Signal adapter rejected request: {0}")]
    SignalRejected(String),

    #[error("Write conflict on {entity} after {attempts} attempts")]
    WriteConflict { entity: String, attempts: u32 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VeritasError {
    /// Whether the job that produced this error should be redelivered.
    ///
    /// Malformed payloads, missing entities and adapter rejections will fail the
    /// same way on every attempt, so they are dropped instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MalformedJob(_) | Self::NotFound(_) | Self::SignalRejected(_) => false,
            Self::Config(_) => false,
            Self::Signal(_)
            | Self::WriteConflict { .. }
            | Self::Database(_)
            | Self::Nats(_)
            | Self::Internal(_) => true,
        }
    }

    /// Short machine-readable label, used in logs and dead letters
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedJob(_) => "malformed_job",
            Self::NotFound(_) => "not_found",
            Self::Signal(_) => "signal",
            Self::SignalRejected(_) => "signal_rejected",
            Self::WriteConflict { .. } => "write_conflict",
            Self::Database(_) => "database",
            Self::Nats(_) => "nats",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for VeritasError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for VeritasError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedJob(format!("JSON error: {}", err))
    }
}

impl From<async_nats::Error> for VeritasError {
    fn from(err: async_nats::Error) -> Self {
        Self::Nats(err.to_string())
    }
}

impl From<mongodb::error::Error> for VeritasError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::oid::Error> for VeritasError {
    fn from(err: bson::oid::Error) -> Self {
        Self::MalformedJob(format!("invalid object id: {}", err))
    }
}

impl From<bson::ser::Error> for VeritasError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Internal(format!("BSON serialization error: {}", err))
    }
}

impl From<reqwest::Error> for VeritasError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.is_client_error() => {
                Self::SignalRejected(format!("{}: {}", status, err))
            }
            _ if err.is_decode() => Self::SignalRejected(format!("undecodable response: {}", err)),
            _ => Self::Signal(err.to_string()),
        }
    }
}

/// Result type alias for Veritas operations
pub type Result<T> = std::result::Result<T, VeritasError>;
