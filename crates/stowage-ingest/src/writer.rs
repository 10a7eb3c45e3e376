//! Bulk writer.
//!
//! Every batch becomes exactly one unordered insert with document validation
//! bypassed. Failures never propagate: a partially rejected batch keeps what
//! the store accepted, a failed call loses the batch, and either way the run
//! moves on to the next batch. The outcome is returned so that callers can
//! count what happened instead of it being discarded.

use crate::store::{DocumentStore, InsertFailure};
use metrics::{counter, histogram};
use std::time::Instant;
use stowage_core::Record;
use stowage_core::metrics::{
    BATCH_DURATION_SECONDS, BATCH_FAILURES_TOTAL, BATCHES_TOTAL, DOCUMENTS_INSERTED_TOTAL,
    DOCUMENTS_REJECTED_TOTAL,
};
use tracing::{debug, error, warn};

/// What one bulk-write call achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every document was inserted.
    Clean {
        /// Documents inserted.
        inserted: usize,
    },

    /// The store rejected some documents and kept the rest.
    Partial {
        /// Documents inserted.
        inserted: usize,
        /// Documents rejected.
        rejected: usize,
    },

    /// The call failed as a whole.
    Failed {
        /// Documents in the batch.
        attempted: usize,
        /// Why the call failed.
        reason: String,
    },
}

impl WriteOutcome {
    /// Documents persisted by this call.
    pub fn inserted(&self) -> usize {
        match self {
            Self::Clean { inserted } | Self::Partial { inserted, .. } => *inserted,
            Self::Failed { .. } => 0,
        }
    }

    /// Documents explicitly rejected by the store.
    pub fn rejected(&self) -> usize {
        match self {
            Self::Partial { rejected, .. } => *rejected,
            _ => 0,
        }
    }

    /// Whether the whole call failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Clean { .. } => "clean",
            Self::Partial { .. } => "partial",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Dispatches batches to a store.
pub struct BulkWriter<'a, S> {
    store: &'a S,
}

impl<'a, S: DocumentStore> BulkWriter<'a, S> {
    /// Create a writer over a borrowed store.
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Insert one batch into a collection.
    ///
    /// An empty batch is a no-op and never reaches the store.
    pub async fn dispatch(&self, collection: &str, records: Vec<Record>) -> WriteOutcome {
        let attempted = records.len();
        if attempted == 0 {
            return WriteOutcome::Clean { inserted: 0 };
        }

        let start = Instant::now();
        let result = self.store.insert_unordered(collection, records).await;
        let elapsed = start.elapsed();
        histogram!(BATCH_DURATION_SECONDS).record(elapsed.as_secs_f64());

        let outcome = match result {
            Ok(inserted) => {
                debug!(
                    "Inserted {} documents into {} in {:.2?}",
                    inserted, collection, elapsed
                );
                WriteOutcome::Clean { inserted }
            }
            Err(InsertFailure::Partial {
                inserted,
                rejected,
                first_error,
            }) => {
                warn!(
                    "Bulk write into {} partially failed: {} inserted, {} rejected (first error: {})",
                    collection, inserted, rejected, first_error
                );
                WriteOutcome::Partial { inserted, rejected }
            }
            Err(InsertFailure::Total(reason)) => {
                error!(
                    "Bulk write of {} documents into {} failed: {}",
                    attempted, collection, reason
                );
                WriteOutcome::Failed { attempted, reason }
            }
        };

        record_metrics(collection, &outcome);
        outcome
    }
}

fn record_metrics(collection: &str, outcome: &WriteOutcome) {
    let collection = collection.to_string();
    counter!(BATCHES_TOTAL, "collection" => collection.clone(), "outcome" => outcome.label())
        .increment(1);
    counter!(DOCUMENTS_INSERTED_TOTAL, "collection" => collection.clone())
        .increment(outcome.inserted() as u64);
    if outcome.rejected() > 0 {
        counter!(DOCUMENTS_REJECTED_TOTAL, "collection" => collection.clone())
            .increment(outcome.rejected() as u64);
    }
    if outcome.is_failed() {
        counter!(BATCH_FAILURES_TOTAL, "collection" => collection).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::from_value(json!({ "_id": i })).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_clean_dispatch() {
        let store = MemoryStore::new();
        let outcome = BulkWriter::new(&store).dispatch("ventas", records(3)).await;
        assert_eq!(outcome, WriteOutcome::Clean { inserted: 3 });
        assert_eq!(store.total_documents(), 3);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_store() {
        let store = MemoryStore::new();
        let outcome = BulkWriter::new(&store).dispatch("ventas", Vec::new()).await;
        assert_eq!(outcome.inserted(), 0);
        assert!(store.insert_calls().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_is_soft() {
        let store = MemoryStore::new();
        store.reject_when(|r| r.get("_id").and_then(|v| v.as_u64()).is_some_and(|id| id % 2 == 0));

        let outcome = BulkWriter::new(&store).dispatch("ventas", records(10)).await;
        assert_eq!(
            outcome,
            WriteOutcome::Partial {
                inserted: 5,
                rejected: 5
            }
        );
        assert_eq!(store.total_documents(), 5);
    }

    #[tokio::test]
    async fn test_total_failure_is_swallowed() {
        let store = MemoryStore::new();
        store.fail_inserts(true);

        let outcome = BulkWriter::new(&store).dispatch("ventas", records(4)).await;
        assert!(outcome.is_failed());
        assert_eq!(outcome.inserted(), 0);
        assert_eq!(outcome.label(), "failed");
        assert!(matches!(outcome, WriteOutcome::Failed { attempted: 4, .. }));
    }
}
