//! Shared types for Veritas

mod error;

pub use error::{Result, VeritasError};
