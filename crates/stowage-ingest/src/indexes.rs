//! Deferred secondary-index creation.
//!
//! Indexes are built only after every partition has been written, so the
//! store never maintains index structures under bulk-write load.
//!
//! Per collection:
//! 1. `_source_file`
//! 2. `_source_folder`
//! 3. `_source_folder` + `_source_file` (compound)
//! 4. One index per configured business field present on a sampled document

use crate::store::DocumentStore;
use metrics::counter;
use stowage_core::metrics::{INDEX_FAILURES_TOTAL, INDEXES_CREATED_TOTAL};
use stowage_core::{SOURCE_FILE_FIELD, SOURCE_FOLDER_FIELD};
use tracing::{info, warn};

/// An ascending index over one or more fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name, derived from the keys the same way MongoDB names them.
    pub name: String,

    /// Fields in key order.
    pub keys: Vec<String>,
}

impl IndexSpec {
    /// Ascending index over the given fields, named `a_1_b_1`.
    pub fn ascending(keys: &[&str]) -> Self {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let name = keys
            .iter()
            .map(|k| format!("{k}_1"))
            .collect::<Vec<_>>()
            .join("_");
        Self { name, keys }
    }
}

/// The three provenance indexes, in creation order.
pub fn provenance_indexes() -> [IndexSpec; 3] {
    [
        IndexSpec::ascending(&[SOURCE_FILE_FIELD]),
        IndexSpec::ascending(&[SOURCE_FOLDER_FIELD]),
        IndexSpec::ascending(&[SOURCE_FOLDER_FIELD, SOURCE_FILE_FIELD]),
    ]
}

/// Outcome of index creation for one collection.
#[derive(Debug, Clone, Default)]
pub struct CollectionIndexes {
    /// Collection name.
    pub collection: String,

    /// Indexes created (or already present), in order.
    pub created: Vec<String>,

    /// The failure that stopped index creation, if any.
    pub error: Option<String>,
}

/// Outcome of the index phase across all collections.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    /// One entry per collection, in processing order.
    pub collections: Vec<CollectionIndexes>,
}

impl IndexReport {
    /// Collections whose index creation failed.
    pub fn failures(&self) -> impl Iterator<Item = &CollectionIndexes> {
        self.collections.iter().filter(|c| c.error.is_some())
    }

    /// Total indexes created or confirmed.
    pub fn indexes_created(&self) -> usize {
        self.collections.iter().map(|c| c.created.len()).sum()
    }
}

/// Build indexes on every collection.
///
/// A failure on one collection is logged and recorded; the remaining
/// collections are still processed.
pub async fn build_indexes<S: DocumentStore>(
    store: &S,
    collections: &[String],
    probe_fields: &[String],
) -> IndexReport {
    let mut report = IndexReport::default();

    for collection in collections {
        let mut outcome = CollectionIndexes {
            collection: collection.clone(),
            ..Default::default()
        };

        if let Err(e) = index_collection(store, collection, probe_fields, &mut outcome.created).await
        {
            warn!("Index creation failed for {}: {}", collection, e);
            counter!(INDEX_FAILURES_TOTAL, "collection" => collection.clone()).increment(1);
            outcome.error = Some(e.to_string());
        } else {
            info!(
                "Indexes ready for {}: {}",
                collection,
                outcome.created.join(", ")
            );
        }

        counter!(INDEXES_CREATED_TOTAL, "collection" => collection.clone())
            .increment(outcome.created.len() as u64);
        report.collections.push(outcome);
    }

    report
}

async fn index_collection<S: DocumentStore>(
    store: &S,
    collection: &str,
    probe_fields: &[String],
    created: &mut Vec<String>,
) -> crate::Result<()> {
    for index in provenance_indexes() {
        store.create_index(collection, &index).await?;
        created.push(index.name);
    }

    let Some(sample) = store.sample_document(collection).await? else {
        return Ok(());
    };

    for field in probe_fields {
        if sample.contains_key(field) {
            let index = IndexSpec::ascending(&[field.as_str()]);
            store.create_index(collection, &index).await?;
            created.push(index.name);
        }
    }

    Ok(())
}
