//! Streaming decode of a single archive entry into a [`Record`].
//!
//! Decoding is pure: the same bytes always produce the same record, and a
//! failure never has side effects beyond the returned error. Nothing here
//! retries; malformed input is treated as terminal.

use crate::error::Result;
use crate::record::Record;
use flate2::read::MultiGzDecoder;
use std::io::{BufReader, Read};

/// How an entry's bytes are encoded inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Plain JSON text.
    Plain,
    /// Gzip-compressed JSON text (`.json.gz`), possibly several concatenated members.
    Gzip,
}

impl Encoding {
    /// Pick the encoding from an entry name.
    pub fn for_entry(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".gz") {
            Self::Gzip
        } else {
            Self::Plain
        }
    }
}

/// Decode one JSON document from a byte stream.
///
/// The stream is consumed incrementally; the raw bytes are never buffered
/// as a whole.
pub fn decode_record<R: Read>(reader: R, encoding: Encoding) -> Result<Record> {
    let value: serde_json::Value = match encoding {
        Encoding::Plain => serde_json::from_reader(BufReader::new(reader))?,
        Encoding::Gzip => serde_json::from_reader(BufReader::new(MultiGzDecoder::new(reader)))?,
    };
    Record::from_value(value)
}
