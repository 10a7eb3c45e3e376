//! Destination document stores.
//!
//! The pipeline talks to its destination only through [`DocumentStore`]:
//!
//! - [`MongoStore`] - the production backend (official MongoDB driver)
//! - [`MemoryStore`] - an in-process backend for dry runs and tests
//!
//! Collections are never declared up front; they come into existence on the
//! first successful insert.

mod convert;
mod memory;
mod mongo;

pub use convert::{document_to_record, record_to_document};
pub use memory::{MemoryConnector, MemoryStore};
pub use mongo::{MongoConnector, MongoStore};

use crate::Result;
use crate::indexes::IndexSpec;
use stowage_core::Record;

/// Why an unordered insert did not fully succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertFailure {
    /// Some documents were rejected; the rest are persisted.
    Partial {
        /// Documents the store accepted.
        inserted: usize,
        /// Documents the store rejected.
        rejected: usize,
        /// First rejection message, for logging.
        first_error: String,
    },

    /// Nothing can be assumed persisted (e.g. the store is unreachable).
    Total(String),
}

/// Result of one unordered insert call: documents inserted, or the failure.
pub type InsertResult = std::result::Result<usize, InsertFailure>;

/// A destination that accepts bulk inserts and index definitions.
#[allow(async_fn_in_trait)]
pub trait DocumentStore {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Insert all records in one unordered call with validation bypassed.
    ///
    /// The store may accept records out of order and keeps going past
    /// individual rejections.
    async fn insert_unordered(&self, collection: &str, records: Vec<Record>) -> InsertResult;

    /// Create an ascending index. Creating an index that already exists is a no-op.
    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<()>;

    /// Fetch any one document from a collection.
    async fn sample_document(&self, collection: &str) -> Result<Option<Record>>;

    /// Count stored documents in a collection.
    async fn count_documents(&self, collection: &str) -> Result<u64>;

    /// Release the connection. Called exactly once at the end of a run.
    async fn close(self)
    where
        Self: Sized;
}

/// Creates the store handle at the start of a run.
#[allow(async_fn_in_trait)]
pub trait Connector {
    /// Store type produced by this connector.
    type Store: DocumentStore;

    /// Establish (and verify) a connection.
    async fn connect(&self) -> Result<Self::Store>;
}
