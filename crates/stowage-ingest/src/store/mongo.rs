//! MongoDB backend.
//!
//! Connection options are tuned for sustained bulk writes:
//! - `w=1`: acknowledgment from the primary only
//! - pool of 10..100 connections, idle connections reclaimed after 30s
//! - short server-selection and connect timeouts so a bad URI fails fast
//! - no socket timeout, so long bulk writes are never cut off
//! - retryable writes off: a failed `insert_many` is never replayed
//!
//! Values given explicitly in the connection string take precedence.

use super::{Connector, DocumentStore, InsertFailure, InsertResult};
use super::convert::{document_to_record, record_to_document};
use crate::config::StoreConfig;
use crate::indexes::IndexSpec;
use crate::{Error, Result};
use mongodb::bson::{Document, doc};
use mongodb::error::ErrorKind;
use mongodb::options::{Acknowledgment, ClientOptions, WriteConcern};
use mongodb::{Client, Database, IndexModel};
use stowage_core::Record;
use tracing::{debug, info, warn};

/// Application name reported to the server.
const APP_NAME: &str = "stowage-ingest";

/// Store backed by a MongoDB database.
pub struct MongoStore {
    client: Client,
    database: Database,
}

impl MongoStore {
    /// Connect and verify the deployment answers a `ping`.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        if config.uri.trim().is_empty() {
            return Err(Error::Connection("connection string is empty".to_string()));
        }

        let options = Self::client_options(config).await?;
        let client =
            Client::with_options(options).map_err(|e| Error::Connection(e.to_string()))?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        info!(
            "MongoDB connection established: database={}, pool={}..{}",
            config.database, config.min_pool_size, config.max_pool_size
        );

        let database = client.database(&config.database);
        Ok(Self { client, database })
    }

    /// Parse the URI and fill in bulk-load tuning the URI leaves unset.
    async fn client_options(config: &StoreConfig) -> Result<ClientOptions> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        options.app_name.get_or_insert_with(|| APP_NAME.to_string());
        options.write_concern.get_or_insert_with(|| {
            WriteConcern::builder()
                .w(Acknowledgment::Nodes(config.write_acknowledgment))
                .build()
        });
        options.max_pool_size.get_or_insert(config.max_pool_size);
        options.min_pool_size.get_or_insert(config.min_pool_size);
        options.max_idle_time.get_or_insert(config.max_idle_time);
        options
            .server_selection_timeout
            .get_or_insert(config.server_selection_timeout);
        options.connect_timeout.get_or_insert(config.connect_timeout);
        options.retry_writes.get_or_insert(config.retry_writes);
        options.retry_reads.get_or_insert(config.retry_reads);

        Ok(options)
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

impl DocumentStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn insert_unordered(&self, collection: &str, records: Vec<Record>) -> InsertResult {
        let attempted = records.len();
        let documents: Vec<Document> = records.into_iter().map(record_to_document).collect();

        let result = self
            .collection(collection)
            .insert_many(documents)
            .ordered(false)
            .bypass_document_validation(true)
            .await;

        match result {
            Ok(inserted) => Ok(inserted.inserted_ids.len()),
            Err(err) => match err.kind.as_ref() {
                ErrorKind::InsertMany(failure) => {
                    let write_errors = failure.write_errors.as_deref().unwrap_or_default();
                    if write_errors.is_empty() {
                        // Only the write concern failed; every document was written.
                        warn!("Write concern error on {}: {}", collection, err);
                        return Ok(attempted);
                    }
                    let rejected = write_errors.len();
                    Err(InsertFailure::Partial {
                        inserted: attempted.saturating_sub(rejected),
                        rejected,
                        first_error: write_errors[0].message.clone(),
                    })
                }
                _ => Err(InsertFailure::Total(err.to_string())),
            },
        }
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<()> {
        let mut keys = Document::new();
        for field in &index.keys {
            keys.insert(field.clone(), 1i32);
        }
        let model = IndexModel::builder().keys(keys).build();
        let created = self.collection(collection).create_index(model).await?;
        debug!("Index {} ready on {}", created.index_name, collection);
        Ok(())
    }

    async fn sample_document(&self, collection: &str) -> Result<Option<Record>> {
        let document = self.collection(collection).find_one(doc! {}).await?;
        Ok(document.map(document_to_record))
    }

    async fn count_documents(&self, collection: &str) -> Result<u64> {
        Ok(self.collection(collection).count_documents(doc! {}).await?)
    }

    async fn close(self) {
        self.client.shutdown().await;
        info!("MongoDB connection closed");
    }
}

/// Connects to MongoDB using a [`StoreConfig`].
#[derive(Debug, Clone)]
pub struct MongoConnector {
    config: StoreConfig,
}

impl MongoConnector {
    /// Create a connector for the given settings.
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }
}

impl Connector for MongoConnector {
    type Store = MongoStore;

    async fn connect(&self) -> Result<MongoStore> {
        MongoStore::connect(&self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_uri_rejected_before_network() {
        let config = StoreConfig::default();
        let err = MongoStore::connect(&config).await.err().unwrap();
        assert!(matches!(err, Error::Connection(_)));
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn test_invalid_uri_is_connection_error() {
        let config = StoreConfig {
            uri: "postgres://localhost".to_string(),
            ..Default::default()
        };
        let err = MongoStore::connect(&config).await.err().unwrap();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_client_options_defaults_applied() {
        let config = StoreConfig {
            uri: "mongodb://localhost:27017".to_string(),
            ..Default::default()
        };
        let options = MongoStore::client_options(&config).await.unwrap();
        assert_eq!(options.max_pool_size, Some(100));
        assert_eq!(options.min_pool_size, Some(10));
        assert_eq!(options.max_idle_time, Some(Duration::from_secs(30)));
        assert_eq!(options.server_selection_timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(options.retry_reads, Some(true));
        assert_eq!(options.app_name.as_deref(), Some(APP_NAME));
        assert_eq!(
            options.write_concern.and_then(|wc| wc.w),
            Some(Acknowledgment::Nodes(1))
        );
    }

    #[tokio::test]
    async fn test_uri_options_take_precedence() {
        let config = StoreConfig {
            uri: "mongodb://localhost:27017/?maxPoolSize=5&w=majority".to_string(),
            ..Default::default()
        };
        let options = MongoStore::client_options(&config).await.unwrap();
        assert_eq!(options.max_pool_size, Some(5));
        assert_eq!(
            options.write_concern.and_then(|wc| wc.w),
            Some(Acknowledgment::Majority)
        );
    }

    #[tokio::test]
    async fn test_bulk_writes_are_not_retried() {
        let config = StoreConfig {
            uri: "mongodb://localhost:27017".to_string(),
            ..Default::default()
        };
        let options = MongoStore::client_options(&config).await.unwrap();
        assert_eq!(options.retry_writes, Some(false));

        let config = StoreConfig {
            uri: "mongodb://localhost:27017/?retryWrites=true".to_string(),
            ..Default::default()
        };
        let options = MongoStore::client_options(&config).await.unwrap();
        assert_eq!(options.retry_writes, Some(true));
    }

    // Insert/index behaviour against a live deployment is covered by the
    // MemoryStore tests; the MongoDB path needs a running server.
}
