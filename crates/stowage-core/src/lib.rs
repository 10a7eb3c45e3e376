//! Core types and shared utilities for the stowage bulk loader.
//!
//! This crate provides:
//! - The schema-less [`Record`] model with provenance injection
//! - Streaming decode of one archive entry into a record
//! - Collection-name canonicalization
//! - Prometheus metrics helpers
//! - Shared error types

mod decode;
mod error;
pub mod metrics;
mod record;

pub use decode::{Encoding, decode_record};
pub use error::{DecodeError, Result};
pub use record::{
    ROOT_PARTITION, Record, SOURCE_FILE_FIELD, SOURCE_FOLDER_FIELD, canonical_collection_name,
};
