//! Error types for record decoding.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Reasons a single archive entry could not be turned into a record.
///
/// These are always local to one entry: callers count them and move on.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The bytes are not syntactically valid JSON.
    #[error("invalid JSON at line {line}, column {column}: {message}")]
    Syntax {
        /// 1-based line of the first error.
        line: usize,
        /// 1-based column of the first error.
        column: usize,
        /// Parser message.
        message: String,
    },

    /// The document parsed, but its top level is not an object.
    #[error("top-level JSON value is {found}, expected an object")]
    NotAnObject {
        /// Kind of value that was found instead.
        found: &'static str,
    },

    /// The entry could not be located inside the archive.
    #[error("entry not found in archive: {0}")]
    Missing(String),

    /// Reading the entry failed part-way through.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            return Self::Io(err.into());
        }
        Self::Syntax {
            line: err.line(),
            column: err.column(),
            message: err.to_string(),
        }
    }
}

impl DecodeError {
    /// Short, stable label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "syntax",
            Self::NotAnObject { .. } => "not_an_object",
            Self::Missing(_) => "missing",
            Self::Io(_) => "io",
        }
    }
}
