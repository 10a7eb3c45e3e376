//! Zip archive reader.
//!
//! The archive is opened once and kept open for the whole run. Its central
//! directory is scanned a single time to discover partitions; entry bodies
//! are streamed on demand and never extracted to disk.
//!
//! # Partitioning
//!
//! ```text
//! ventas/2025/001.json   -> partition "ventas"
//! Compras Enero/7.json   -> partition "Compras Enero" (collection "compras_enero")
//! suelto.json            -> partition "root"
//! ```

use crate::{Error, Result};
use indexmap::IndexMap;
use stowage_core::{DecodeError, Encoding, ROOT_PARTITION, Record, canonical_collection_name};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;
use zip::result::ZipError;

/// A group of entries sharing a top-level folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Folder name as it appears in the archive.
    pub name: String,

    /// Destination collection; unique across the archive.
    pub collection: String,

    /// Entry names in central-directory order.
    pub entries: Vec<String>,
}

/// An open zip archive with its partitions discovered.
pub struct ArchiveReader<R: Read + Seek = BufReader<File>> {
    path: PathBuf,
    archive: ZipArchive<R>,
    partitions: IndexMap<String, Partition>,
    ignored_entries: usize,
}

impl ArchiveReader {
    /// Open an archive on disk.
    pub fn open(path: &Path, extensions: &[String]) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::ArchiveUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_reader(BufReader::new(file), path, extensions)
    }
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Open an archive from any seekable reader.
    ///
    /// `label` is only used for logging and error messages.
    pub fn from_reader(reader: R, label: &Path, extensions: &[String]) -> Result<Self> {
        let mut archive = ZipArchive::new(reader).map_err(|e| Error::ArchiveUnreadable {
            path: label.to_path_buf(),
            reason: e.to_string(),
        })?;

        let (partitions, ignored_entries) = discover_partitions(&mut archive, label, extensions)?;

        info!(
            "Opened archive {}: {} entries, {} partitions, {} ignored",
            label.display(),
            archive.len(),
            partitions.len(),
            ignored_entries
        );

        Ok(Self {
            path: label.to_path_buf(),
            archive,
            partitions,
            ignored_entries,
        })
    }

    /// Path (or label) the archive was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Partitions in first-appearance order.
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    /// Look up a partition by its folder name.
    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.partitions.get(name)
    }

    /// Number of partitions discovered.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Total number of data entries across all partitions.
    pub fn data_entry_count(&self) -> usize {
        self.partitions.values().map(|p| p.entries.len()).sum()
    }

    /// Entries that were skipped (directories, unrecognized extensions).
    pub fn ignored_entries(&self) -> usize {
        self.ignored_entries
    }

    /// Stream one entry out of the archive and decode it.
    pub fn decode(&mut self, entry: &str) -> std::result::Result<Record, DecodeError> {
        let file = match self.archive.by_name(entry) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Err(DecodeError::Missing(entry.to_string())),
            Err(ZipError::Io(e)) => return Err(DecodeError::Io(e)),
            Err(e) => return Err(DecodeError::Io(std::io::Error::other(e.to_string()))),
        };
        stowage_core::decode_record(file, Encoding::for_entry(entry))
    }
}

/// Scan the central directory once and group data entries by top-level folder.
///
/// Returns the partitions and the number of ignored entries.
fn discover_partitions<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    label: &Path,
    extensions: &[String],
) -> Result<(IndexMap<String, Partition>, usize)> {
    let suffixes: Vec<String> = extensions
        .iter()
        .map(|e| format!(".{}", e.trim_start_matches('.').to_ascii_lowercase()))
        .collect();

    let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
    let mut ignored = 0usize;

    for index in 0..archive.len() {
        let (name, is_dir) = {
            let file = archive.by_index_raw(index).map_err(|e| Error::ArchiveUnreadable {
                path: label.to_path_buf(),
                reason: format!("entry {index}: {e}"),
            })?;
            (file.name().to_string(), file.is_dir())
        };

        if is_dir || !is_data_entry(&name, &suffixes) {
            debug!("Ignoring entry: {}", name);
            ignored += 1;
            continue;
        }

        grouped
            .entry(partition_of(&name).to_string())
            .or_default()
            .push(name);
    }

    let mut used_collections = HashSet::new();
    let partitions = grouped
        .into_iter()
        .map(|(name, entries)| {
            let collection = unique_collection(&name, &mut used_collections);
            let partition = Partition {
                name: name.clone(),
                collection,
                entries,
            };
            (name, partition)
        })
        .collect();

    Ok((partitions, ignored))
}

/// Whether an entry name ends in one of the recognized suffixes.
fn is_data_entry(name: &str, suffixes: &[String]) -> bool {
    if name.ends_with('/') {
        return false;
    }
    let lower = name.to_ascii_lowercase();
    suffixes.iter().any(|suffix| lower.ends_with(suffix.as_str()))
}

/// First path segment, or the root partition for top-level entries.
fn partition_of(name: &str) -> &str {
    match name.split_once('/') {
        Some((folder, _)) if !folder.is_empty() => folder,
        _ => ROOT_PARTITION,
    }
}

/// Canonical collection name, suffixed if another partition already took it.
fn unique_collection(partition: &str, used: &mut HashSet<String>) -> String {
    let base = canonical_collection_name(partition);
    if used.insert(base.clone()) {
        return base;
    }

    let mut n = 2usize;
    loop {
        let candidate = format!("{base}_{n}");
        if used.insert(candidate.clone()) {
            warn!(
                "Partition {:?} collides with another partition on collection {:?}; using {:?}",
                partition, base, candidate
            );
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    /// Build an in-memory zip from (name, contents) pairs.
    /// Names ending in `/` become directory markers.
    pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Cursor<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, contents) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents).unwrap();
            }
        }
        let mut cursor = writer.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    pub(crate) fn default_extensions() -> Vec<String> {
        vec!["json".to_string(), "json.gz".to_string()]
    }

    fn open(entries: &[(&str, &[u8])]) -> ArchiveReader<Cursor<Vec<u8>>> {
        ArchiveReader::from_reader(build_zip(entries), Path::new("test.zip"), &default_extensions())
            .unwrap()
    }

    #[test]
    fn test_partition_of() {
        assert_eq!(partition_of("ventas/001.json"), "ventas");
        assert_eq!(partition_of("ventas/2025/001.json"), "ventas");
        assert_eq!(partition_of("001.json"), "root");
        assert_eq!(partition_of("/001.json"), "root");
    }

    #[test]
    fn test_is_data_entry() {
        let suffixes = vec![".json".to_string(), ".json.gz".to_string()];
        assert!(is_data_entry("a/b.json", &suffixes));
        assert!(is_data_entry("a/b.JSON", &suffixes));
        assert!(is_data_entry("a/b.json.gz", &suffixes));
        assert!(!is_data_entry("a/b.csv", &suffixes));
        assert!(!is_data_entry("a/", &suffixes));
        assert!(!is_data_entry("a/b.jsonl", &suffixes));
    }

    #[test]
    fn test_discovers_partitions_in_order() {
        let reader = open(&[
            ("ventas/", b""),
            ("ventas/1.json", b"{}"),
            ("Compras Enero/1.json", b"{}"),
            ("ventas/2.json", b"{}"),
            ("ventas/readme.txt", b"hello"),
            ("suelto.json", b"{}"),
        ]);

        let names: Vec<_> = reader.partitions().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["ventas", "Compras Enero", "root"]);

        let ventas = reader.partition("ventas").unwrap();
        assert_eq!(ventas.collection, "ventas");
        assert_eq!(ventas.entries, vec!["ventas/1.json", "ventas/2.json"]);

        let compras = reader.partition("Compras Enero").unwrap();
        assert_eq!(compras.collection, "compras_enero");

        assert_eq!(reader.data_entry_count(), 4);
        assert_eq!(reader.ignored_entries(), 2);
    }

    #[test]
    fn test_colliding_partitions_get_distinct_collections() {
        let reader = open(&[
            ("Sales Q1/1.json", b"{}"),
            ("sales_q1/1.json", b"{}"),
            ("SALES Q1/1.json", b"{}"),
        ]);

        let collections: Vec<_> = reader.partitions().map(|p| p.collection.as_str()).collect();
        assert_eq!(collections, vec!["sales_q1", "sales_q1_2", "sales_q1_3"]);
    }

    #[test]
    fn test_empty_archive_has_no_partitions() {
        let reader = open(&[("docs/readme.md", b"# nothing here")]);
        assert_eq!(reader.partition_count(), 0);
        assert_eq!(reader.data_entry_count(), 0);
    }

    #[test]
    fn test_decode_entry() {
        let mut reader = open(&[("ventas/1.json", br#"{"factura_num": 1}"#)]);
        let record = reader.decode("ventas/1.json").unwrap();
        assert_eq!(record.get("factura_num").unwrap(), 1);
    }

    #[test]
    fn test_decode_missing_entry() {
        let mut reader = open(&[("ventas/1.json", b"{}")]);
        let err = reader.decode("ventas/404.json").unwrap_err();
        assert!(matches!(err, DecodeError::Missing(_)));
    }

    #[test]
    fn test_decode_malformed_entry() {
        let mut reader = open(&[("ventas/1.json", b"{not json")]);
        let err = reader.decode("ventas/1.json").unwrap_err();
        assert!(matches!(err, DecodeError::Syntax { .. }));
    }

    #[test]
    fn test_decode_gzip_entry() {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"fecha_hora": "2025-09-25"}"#).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut reader = open(&[("ventas/1.json.gz", compressed.as_slice())]);
        let record = reader.decode("ventas/1.json.gz").unwrap();
        assert_eq!(record.get("fecha_hora").unwrap(), "2025-09-25");
    }

    #[test]
    fn test_corrupt_archive_is_unreadable() {
        let err = ArchiveReader::from_reader(
            Cursor::new(b"this is not a zip file".to_vec()),
            Path::new("broken.zip"),
            &default_extensions(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::ArchiveUnreadable { .. }));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let err = ArchiveReader::open(Path::new("/nonexistent/Facturas.zip"), &default_extensions())
            .err()
            .unwrap();
        assert!(matches!(err, Error::ArchiveUnreadable { .. }));
    }

    #[test]
    fn test_open_from_disk() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), build_zip(&[("a/1.json", b"{}")]).into_inner()).unwrap();

        let reader = ArchiveReader::open(tmp.path(), &default_extensions()).unwrap();
        assert_eq!(reader.partition_count(), 1);
        assert_eq!(reader.path(), tmp.path());
    }
}
