//! Stowage bulk loader.
//!
//! Loads a zip archive of JSON documents into a document store, one
//! collection per top-level folder.
//!
//! # Modules
//!
//! - [`archive`] - Opens the archive and groups entries into partitions
//! - [`batch`] - Accumulates decoded records into fixed-size batches
//! - [`writer`] - Issues one unordered bulk insert per batch
//! - [`store`] - Destination backends (MongoDB, in-memory)
//! - [`indexes`] - Deferred index creation
//! - [`orchestrator`] - Sequences a complete run
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  ArchiveReader  │  Zip central directory -> partitions
//! └────────┬────────┘
//!          │  decode + provenance
//!          ▼
//! ┌─────────────────┐
//! │BatchAccumulator │  Seals a batch every BATCH_SIZE records
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   BulkWriter    │  insert_many, unordered, validation bypassed
//! └────────┬────────┘
//!          │  after every partition is loaded
//!          ▼
//! ┌─────────────────┐
//! │  build_indexes  │  Provenance + business-field indexes
//! └─────────────────┘
//! ```

pub mod archive;
pub mod batch;
pub mod config;
pub mod error;
pub mod indexes;
pub mod orchestrator;
pub mod store;
pub mod writer;

pub use error::{Error, Result};

pub use archive::{ArchiveReader, Partition};
pub use batch::{Batch, BatchAccumulator, PartitionStats};
pub use config::{Config, DEFAULT_BATCH_SIZE, StoreConfig};
pub use indexes::{IndexReport, IndexSpec, build_indexes};
pub use orchestrator::{
    Orchestrator, Reconciliation, RunOptions, RunReport, RunState, Session, Totals,
};
pub use store::{
    Connector, DocumentStore, InsertFailure, MemoryConnector, MemoryStore, MongoConnector,
    MongoStore,
};
pub use writer::{BulkWriter, WriteOutcome};
