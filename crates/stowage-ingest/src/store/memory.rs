//! In-process document store.
//!
//! Mirrors the MongoDB semantics the pipeline depends on: collections appear
//! on first insert, unordered inserts reject documents individually (a
//! duplicate `_id` is rejected, everything else lands), and index creation is
//! idempotent by name. Used for `--dry-run` and throughout the tests.
//!
//! Clones share state, so a handle kept outside the orchestrator can inspect
//! what a run wrote after the store has been closed.

use super::{Connector, DocumentStore, InsertFailure, InsertResult};
use crate::indexes::IndexSpec;
use crate::{Error, Result};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use stowage_core::Record;

type RejectFn = dyn Fn(&Record) -> bool + Send + Sync;

#[derive(Default)]
struct MemoryCollection {
    documents: Vec<Record>,
    ids: HashSet<String>,
    indexes: IndexMap<String, IndexSpec>,
}

#[derive(Default)]
struct Inner {
    collections: Mutex<IndexMap<String, MemoryCollection>>,
    insert_calls: Mutex<Vec<(String, usize)>>,
    fail_inserts: AtomicBool,
    fail_indexes: Mutex<HashSet<String>>,
    reject: Mutex<Option<Arc<RejectFn>>>,
    close_count: AtomicUsize,
}

/// In-memory store. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert fail outright, as if the server were gone.
    pub fn fail_inserts(&self, fail: bool) {
        self.inner.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make index creation fail for one collection.
    pub fn fail_indexes_on(&self, collection: &str) {
        self.inner.fail_indexes.lock().insert(collection.to_string());
    }

    /// Reject individual documents matching a predicate.
    pub fn reject_when<F>(&self, predicate: F)
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        *self.inner.reject.lock() = Some(Arc::new(predicate));
    }

    /// Documents stored in a collection (cloned).
    pub fn documents(&self, collection: &str) -> Vec<Record> {
        self.inner
            .collections
            .lock()
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// Index names defined on a collection, in creation order.
    pub fn index_names(&self, collection: &str) -> Vec<String> {
        self.inner
            .collections
            .lock()
            .get(collection)
            .map(|c| c.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every insert call as (collection, batch size), in call order.
    pub fn insert_calls(&self) -> Vec<(String, usize)> {
        self.inner.insert_calls.lock().clone()
    }

    /// Total documents across all collections.
    pub fn total_documents(&self) -> usize {
        self.inner
            .collections
            .lock()
            .values()
            .map(|c| c.documents.len())
            .sum()
    }

    /// How many times `close` has been called.
    pub fn close_count(&self) -> usize {
        self.inner.close_count.load(Ordering::SeqCst)
    }
}

impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn insert_unordered(&self, collection: &str, records: Vec<Record>) -> InsertResult {
        self.inner
            .insert_calls
            .lock()
            .push((collection.to_string(), records.len()));

        if self.inner.fail_inserts.load(Ordering::SeqCst) {
            return Err(InsertFailure::Total(
                "memory store: inserts disabled".to_string(),
            ));
        }

        let reject = self.inner.reject.lock().clone();
        let mut collections = self.inner.collections.lock();

        let mut inserted = 0usize;
        let mut rejected = 0usize;
        let mut first_error = None;

        for record in records {
            if reject.as_ref().is_some_and(|f| f(&record)) {
                rejected += 1;
                first_error.get_or_insert_with(|| "document rejected".to_string());
                continue;
            }

            let target = collections.entry(collection.to_string()).or_default();
            if let Some(id) = record.get("_id") {
                let key = id.to_string();
                if !target.ids.insert(key.clone()) {
                    rejected += 1;
                    first_error.get_or_insert_with(|| format!("duplicate key: _id {key}"));
                    continue;
                }
            }
            target.documents.push(record);
            inserted += 1;
        }

        match first_error {
            None => Ok(inserted),
            Some(first_error) => Err(InsertFailure::Partial {
                inserted,
                rejected,
                first_error,
            }),
        }
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<()> {
        if self.inner.fail_indexes.lock().contains(collection) {
            return Err(Error::Store(format!(
                "memory store: index creation disabled on {collection}"
            )));
        }
        let mut collections = self.inner.collections.lock();
        collections
            .entry(collection.to_string())
            .or_default()
            .indexes
            .entry(index.name.clone())
            .or_insert_with(|| index.clone());
        Ok(())
    }

    async fn sample_document(&self, collection: &str) -> Result<Option<Record>> {
        Ok(self
            .inner
            .collections
            .lock()
            .get(collection)
            .and_then(|c| c.documents.first().cloned()))
    }

    async fn count_documents(&self, collection: &str) -> Result<u64> {
        Ok(self
            .inner
            .collections
            .lock()
            .get(collection)
            .map_or(0, |c| c.documents.len() as u64))
    }

    async fn close(self) {
        self.inner.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out a shared [`MemoryStore`].
#[derive(Clone, Default)]
pub struct MemoryConnector {
    store: MemoryStore,
    refuse: Option<String>,
}

impl MemoryConnector {
    /// Connector that always yields the given store.
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            refuse: None,
        }
    }

    /// Connector whose `connect` always fails with the given reason.
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            store: MemoryStore::new(),
            refuse: Some(reason.into()),
        }
    }
}

impl Connector for MemoryConnector {
    type Store = MemoryStore;

    async fn connect(&self) -> Result<MemoryStore> {
        match &self.refuse {
            Some(reason) => Err(Error::Connection(reason.clone())),
            None => Ok(self.store.clone()),
        }
    }
}
