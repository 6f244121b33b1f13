//! Database layer
//!
//! MongoDB client wrapper and the document schemas shared with the
//! marketplace CRUD service.

pub mod mongo;
pub mod schemas;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata};
