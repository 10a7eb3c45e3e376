//! Batch accumulator.
//!
//! Walks one partition's entries in order, decodes each one, stamps it with
//! provenance and collects it into a fixed-capacity [`Batch`]. A full batch is
//! handed to the [`BulkWriter`] immediately and replaced by a fresh one, so at
//! most one batch worth of records is held in memory per partition. Whatever
//! is left at the end of the partition goes out as a final, smaller batch.
//!
//! Cancellation is only observed right after a batch has been dispatched.

use crate::archive::{ArchiveReader, Partition};
use crate::store::DocumentStore;
use crate::writer::{BulkWriter, WriteOutcome};
use metrics::{counter, gauge};
use std::io::{Read, Seek};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use stowage_core::Record;
use stowage_core::metrics::{DECODE_FAILURES_TOTAL, DOCS_PER_SECOND, ENTRIES_TOTAL};
use tracing::{debug, info, warn};

/// A capacity-bounded run of records for a single collection.
#[derive(Debug)]
pub struct Batch {
    records: Vec<Record>,
    capacity: usize,
}

impl Batch {
    /// Create an empty batch. `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "batch capacity must be non-zero");
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record. Returns `true` once the batch is full.
    pub fn push(&mut self, record: Record) -> bool {
        self.records.push(record);
        self.is_full()
    }

    /// Whether the batch has reached capacity.
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hand out the collected records, leaving a fresh empty batch behind.
    pub fn take(&mut self) -> Vec<Record> {
        std::mem::replace(&mut self.records, Vec::with_capacity(self.capacity))
    }
}

/// Counters for one partition.
#[derive(Debug, Clone, Default)]
pub struct PartitionStats {
    /// Partition (folder) name.
    pub partition: String,

    /// Destination collection.
    pub collection: String,

    /// Entries looked at.
    pub entries_seen: usize,

    /// Entries decoded into records.
    pub decoded: usize,

    /// Entries skipped because they could not be decoded.
    pub failed_decode: usize,

    /// Bulk-write calls issued.
    pub batches_dispatched: usize,

    /// Documents the store accepted.
    pub documents_inserted: usize,

    /// Documents the store rejected inside partially failed calls.
    pub documents_rejected: usize,

    /// Bulk-write calls that failed outright.
    pub batches_failed: usize,

    /// Documents lost to failed calls.
    pub documents_lost: usize,

    /// Wall time spent on the partition.
    pub elapsed: Duration,

    /// Whether the partition stopped early on cancellation.
    pub cancelled: bool,
}

impl PartitionStats {
    fn new(partition: &Partition) -> Self {
        Self {
            partition: partition.name.clone(),
            collection: partition.collection.clone(),
            ..Default::default()
        }
    }

    /// Fold one bulk-write outcome into the counters.
    pub fn record_outcome(&mut self, outcome: &WriteOutcome) {
        self.batches_dispatched += 1;
        self.documents_inserted += outcome.inserted();
        self.documents_rejected += outcome.rejected();
        if let WriteOutcome::Failed { attempted, .. } = outcome {
            self.batches_failed += 1;
            self.documents_lost += attempted;
        }
    }

    /// Inserted documents per second of wall time.
    pub fn docs_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.documents_inserted as f64 / secs
        } else {
            0.0
        }
    }
}

/// Accumulates decoded records into batches and dispatches them.
pub struct BatchAccumulator {
    capacity: usize,
    progress_interval: usize,
    cancel: Arc<AtomicBool>,
}

impl BatchAccumulator {
    /// Create an accumulator.
    ///
    /// `cancel` is polled between batches; once set, the current partition
    /// stops after its in-flight batch is dispatched.
    pub fn new(capacity: usize, progress_interval: usize, cancel: Arc<AtomicBool>) -> Self {
        Self {
            capacity: capacity.max(1),
            progress_interval: progress_interval.max(1),
            cancel,
        }
    }

    /// Load every entry of one partition into its collection.
    pub async fn load_partition<R, S>(
        &self,
        archive: &mut ArchiveReader<R>,
        partition: &Partition,
        writer: &BulkWriter<'_, S>,
    ) -> PartitionStats
    where
        R: Read + Seek,
        S: DocumentStore,
    {
        let start = Instant::now();
        let mut stats = PartitionStats::new(partition);
        let mut batch = Batch::new(self.capacity);

        info!(
            "Processing partition {:?} -> {} ({} entries)",
            partition.name,
            partition.collection,
            partition.entries.len()
        );

        for entry in &partition.entries {
            stats.entries_seen += 1;

            match archive.decode(entry) {
                Ok(record) => {
                    stats.decoded += 1;
                    let full = batch.push(record.with_provenance(entry, &partition.name));
                    if full {
                        let outcome = writer.dispatch(&partition.collection, batch.take()).await;
                        stats.record_outcome(&outcome);

                        if self.cancel.load(Ordering::SeqCst) {
                            warn!(
                                "Cancellation requested; stopping {} after {} batches",
                                partition.collection, stats.batches_dispatched
                            );
                            stats.cancelled = true;
                            break;
                        }
                    }
                }
                Err(e) => {
                    stats.failed_decode += 1;
                    debug!("Skipping {}: {}", entry, e);
                    counter!(
                        DECODE_FAILURES_TOTAL,
                        "collection" => partition.collection.clone(),
                        "reason" => e.kind()
                    )
                    .increment(1);
                }
            }

            if stats.entries_seen.is_multiple_of(self.progress_interval) {
                info!(
                    "Progress {}: {}/{} entries, {} decoded, {} failed, {} batches",
                    partition.collection,
                    stats.entries_seen,
                    partition.entries.len(),
                    stats.decoded,
                    stats.failed_decode,
                    stats.batches_dispatched
                );
            }
        }

        if !batch.is_empty() {
            let outcome = writer.dispatch(&partition.collection, batch.take()).await;
            stats.record_outcome(&outcome);
        }

        stats.elapsed = start.elapsed();

        counter!(ENTRIES_TOTAL, "collection" => partition.collection.clone())
            .increment(stats.entries_seen as u64);
        gauge!(DOCS_PER_SECOND).set(stats.docs_per_second());

        if stats.failed_decode > 0 {
            warn!(
                "{}: {} of {} entries could not be decoded",
                partition.collection, stats.failed_decode, stats.entries_seen
            );
        }
        info!(
            "{}: {} documents in {:.1?} ({:.0} docs/s), {} batches",
            partition.collection,
            stats.documents_inserted,
            stats.elapsed,
            stats.docs_per_second(),
            stats.batches_dispatched
        );

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::{build_zip, default_extensions};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::io::Cursor;
    use std::path::Path;

    fn archive(entries: &[(String, Vec<u8>)]) -> ArchiveReader<Cursor<Vec<u8>>> {
        let refs: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(n, b)| (n.as_str(), b.as_slice()))
            .collect();
        ArchiveReader::from_reader(build_zip(&refs), Path::new("test.zip"), &default_extensions())
            .unwrap()
    }

    fn invoices(folder: &str, n: usize) -> Vec<(String, Vec<u8>)> {
        (0..n)
            .map(|i| {
                (
                    format!("{folder}/{i:04}.json"),
                    json!({ "factura_num": i }).to_string().into_bytes(),
                )
            })
            .collect()
    }

    fn accumulator(capacity: usize) -> BatchAccumulator {
        BatchAccumulator::new(capacity, 1_000, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_batch_push_and_take() {
        let mut batch = Batch::new(2);
        assert!(!batch.push(Record::from_value(json!({})).unwrap()));
        assert!(batch.push(Record::from_value(json!({})).unwrap()));
        assert!(batch.is_full());

        let records = batch.take();
        assert_eq!(records.len(), 2);
        assert!(batch.is_empty());
        assert_eq!(batch.capacity(), 2);
    }

    #[tokio::test]
    async fn test_batches_respect_capacity() {
        let mut reader = archive(&invoices("ventas", 10));
        let partition = reader.partition("ventas").unwrap().clone();
        let store = MemoryStore::new();

        let stats = accumulator(4)
            .load_partition(&mut reader, &partition, &BulkWriter::new(&store))
            .await;

        let sizes: Vec<usize> = store.insert_calls().into_iter().map(|(_, n)| n).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(stats.batches_dispatched, 3);
        assert_eq!(stats.documents_inserted, 10);
        assert_eq!(stats.entries_seen, 10);
        assert!(!stats.cancelled);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_trailing_batch() {
        let mut reader = archive(&invoices("ventas", 8));
        let partition = reader.partition("ventas").unwrap().clone();
        let store = MemoryStore::new();

        let stats = accumulator(4)
            .load_partition(&mut reader, &partition, &BulkWriter::new(&store))
            .await;

        assert_eq!(stats.batches_dispatched, 2);
        assert_eq!(store.insert_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_skipped() {
        let mut entries = invoices("ventas", 5);
        entries[2].1 = b"{\"factura_num\": ".to_vec();
        let mut reader = archive(&entries);
        let partition = reader.partition("ventas").unwrap().clone();
        let store = MemoryStore::new();

        let stats = accumulator(8000)
            .load_partition(&mut reader, &partition, &BulkWriter::new(&store))
            .await;

        assert_eq!(stats.entries_seen, 5);
        assert_eq!(stats.decoded, 4);
        assert_eq!(stats.failed_decode, 1);
        assert_eq!(store.count_documents("ventas").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_provenance_applied() {
        let mut reader = archive(&invoices("Compras Enero", 2));
        let partition = reader.partition("Compras Enero").unwrap().clone();
        let store = MemoryStore::new();

        accumulator(10)
            .load_partition(&mut reader, &partition, &BulkWriter::new(&store))
            .await;

        let docs = store.documents("compras_enero");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].source_file(), Some("Compras Enero/0000.json"));
        assert_eq!(docs[0].source_folder(), Some("Compras Enero"));
        assert_eq!(docs[1].source_file(), Some("Compras Enero/0001.json"));
    }

    #[tokio::test]
    async fn test_failed_batches_are_counted() {
        let mut reader = archive(&invoices("ventas", 5));
        let partition = reader.partition("ventas").unwrap().clone();
        let store = MemoryStore::new();
        store.fail_inserts(true);

        let stats = accumulator(2)
            .load_partition(&mut reader, &partition, &BulkWriter::new(&store))
            .await;

        assert_eq!(stats.batches_dispatched, 3);
        assert_eq!(stats.batches_failed, 3);
        assert_eq!(stats.documents_lost, 5);
        assert_eq!(stats.documents_inserted, 0);
    }

    #[tokio::test]
    async fn test_cancellation_between_batches() {
        let mut reader = archive(&invoices("ventas", 10));
        let partition = reader.partition("ventas").unwrap().clone();
        let store = MemoryStore::new();
        let cancel = Arc::new(AtomicBool::new(true));

        let stats = BatchAccumulator::new(4, 1_000, cancel)
            .load_partition(&mut reader, &partition, &BulkWriter::new(&store))
            .await;

        // The first full batch still goes out whole.
        assert!(stats.cancelled);
        assert_eq!(stats.batches_dispatched, 1);
        assert_eq!(stats.entries_seen, 4);
        assert_eq!(store.insert_calls(), vec![("ventas".to_string(), 4)]);
    }

    #[test]
    fn test_docs_per_second() {
        let stats = PartitionStats {
            documents_inserted: 100,
            elapsed: Duration::from_secs(4),
            ..Default::default()
        };
        assert_eq!(stats.docs_per_second(), 25.0);
        assert_eq!(PartitionStats::default().docs_per_second(), 0.0);
    }
}
