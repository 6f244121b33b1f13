//! Veritas - trust scoring and review moderation for a marketplace
//!
//! Background workers that consume signal-analysis jobs from NATS JetStream,
//! call external classifiers, and keep item trust state and review moderation
//! flags in MongoDB consistent under concurrent updates.
//!
//! ## Workers
//!
//! - **Item signal**: image/description matching feeds the item trust score,
//!   risk level and status
//! - **Review signal**: authenticity classification of a review, followed by
//!   burst detection over the item's recent AI-flagged reviews

pub mod config;
pub mod db;
pub mod jobs;
pub mod nats;
pub mod signals;
pub mod store;
pub mod trust;
pub mod types;
pub mod worker;

pub use config::Args;
pub use types::{Result, VeritasError};
