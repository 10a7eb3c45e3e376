//! Error types for the ingestion pipeline.
//!
//! Only run-level failures live here. Per-entry decode failures and per-batch
//! write failures are values ([`stowage_core::DecodeError`],
//! [`crate::writer::WriteOutcome`]) and never surface as an [`Error`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a load run.
#[derive(Error, Debug)]
pub enum Error {
    /// The destination store could not be reached or the URI is unusable.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The archive could not be opened or its central directory is corrupt.
    #[error("Archive unreadable: {path}: {reason}")]
    ArchiveUnreadable {
        /// Path that was opened.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// The archive opened fine but holds no recognized data entries.
    #[error("No data entries found in {0}")]
    NoDataEntries(PathBuf),

    /// MongoDB driver error outside the insert path.
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// Generic store failure (used by non-MongoDB backends).
    #[error("Store error: {0}")]
    Store(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The run tried to move between states in an invalid order.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// State the run was in.
        from: &'static str,
        /// State it tried to enter.
        to: &'static str,
    },
}

impl Error {
    /// Whether this error aborts a run before any data is written.
    pub fn is_fatal_setup(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::ArchiveUnreadable { .. } | Self::NoDataEntries(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_display() {
        let err = Error::Connection("connection string is empty".to_string());
        assert!(err.to_string().contains("connection string is empty"));
        assert!(err.is_fatal_setup());
    }

    #[test]
    fn test_archive_unreadable_display() {
        let err = Error::ArchiveUnreadable {
            path: PathBuf::from("/data/Facturas.zip"),
            reason: "invalid Zip archive".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/data/Facturas.zip"));
        assert!(msg.contains("invalid Zip archive"));
        assert!(err.is_fatal_setup());
    }

    #[test]
    fn test_non_fatal_errors() {
        assert!(!Error::Store("boom".to_string()).is_fatal_setup());
        assert!(!Error::Config("bad".to_string()).is_fatal_setup());
    }
}
