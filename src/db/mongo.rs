//! MongoDB client and collection wrapper
//!
//! One `MongoClient` is built at start-up and handed to the store; nothing in the
//! crate reaches for a global connection.

use bson::{doc, oid::ObjectId, DateTime, Document};
use futures_util::TryStreamExt;
use mongodb::{
    options::{IndexOptions, UpdateModifications},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::db::schemas::Metadata;
use crate::types::{Result, VeritasError};

/// Server selection and connect timeout appended to the URI
const CONNECT_TIMEOUT_MS: u32 = 3000;

/// Schemas declaring the indexes their collection needs
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Schemas carrying flattened [`Metadata`]
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// Bound shared by every document type stored through [`MongoCollection`]
pub trait Schema:
    Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata
{
}

impl<T> Schema for T where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata
{
}

fn db_error(op: &'static str) -> impl Fn(mongodb::error::Error) -> VeritasError {
    move |e| VeritasError::Database(format!("{} failed: {}", op, e))
}

/// Append fail-fast timeouts so an unreachable server errors at start-up
fn with_connect_timeouts(uri: &str) -> String {
    let sep = if uri.contains('?') { '&' } else { '?' };
    format!(
        "{uri}{sep}serverSelectionTimeoutMS={CONNECT_TIMEOUT_MS}&connectTimeoutMS={CONNECT_TIMEOUT_MS}"
    )
}

/// Handle on the marketplace database
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and ping the database
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        let client = Client::with_uri_str(with_connect_timeouts(uri))
            .await
            .map_err(db_error("MongoDB connect"))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(db_error("MongoDB ping"))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Open a typed collection, creating its indexes
    pub async fn collection<T: Schema>(&self, name: &str) -> Result<MongoCollection<T>> {
        let collection = MongoCollection {
            inner: self.client.database(&self.db_name).collection::<T>(name),
        };
        collection.apply_indexes().await?;
        Ok(collection)
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed collection
#[derive(Debug, Clone)]
pub struct MongoCollection<T: Send + Sync> {
    inner: Collection<T>,
}

impl<T: Schema> MongoCollection<T> {
    async fn apply_indexes(&self) -> Result<()> {
        let models: Vec<IndexModel> = T::into_indices()
            .into_iter()
            .map(|(keys, options)| IndexModel::builder().keys(keys).options(options).build())
            .collect();

        if models.is_empty() {
            return Ok(());
        }

        let count = models.len();
        self.inner
            .create_indexes(models)
            .await
            .map_err(db_error("Index creation"))?;
        debug!(collection = %self.inner.name(), count, "Indexes ensured");
        Ok(())
    }

    /// Insert a document, stamping its timestamps
    pub async fn insert_one(&self, mut document: T) -> Result<ObjectId> {
        let now = DateTime::now();
        let metadata = document.mut_metadata();
        metadata.created_at.get_or_insert(now);
        metadata.updated_at = Some(now);

        self.inner
            .insert_one(document)
            .await
            .map_err(db_error("Insert"))?
            .inserted_id
            .as_object_id()
            .ok_or_else(|| VeritasError::Database("inserted document has no ObjectId".into()))
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        self.inner.find_one(filter).await.map_err(db_error("Find"))
    }

    pub async fn find_many(&self, filter: Document) -> Result<Vec<T>> {
        self.inner
            .find(filter)
            .await
            .map_err(db_error("Find"))?
            .try_collect()
            .await
            .map_err(db_error("Cursor read"))
    }

    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult> {
        self.inner
            .update_one(filter, update)
            .await
            .map_err(db_error("Update"))
    }

    /// Update one document, inserting it when the filter matches nothing
    pub async fn upsert_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult> {
        self.inner
            .update_one(filter, update)
            .upsert(true)
            .await
            .map_err(db_error("Upsert"))
    }

    pub async fn update_many(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult> {
        self.inner
            .update_many(filter, update)
            .await
            .map_err(db_error("Update"))
    }
}
