//! Prometheus metrics helpers for stowage.
//!
//! # Usage
//!
//! ```rust,ignore
//! use stowage_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     if let Some(handle) = init_metrics() {
//!         start_metrics_server(9091, handle).await.unwrap();
//!     }
//!
//!     metrics::counter!("ingest_entries_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: `ingest_` on every metric
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: only low-cardinality values (collection names, outcome kinds)

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Entries seen in the archive (label: collection).
pub const ENTRIES_TOTAL: &str = "ingest_entries_total";
/// Entries that failed to decode (labels: collection, reason).
pub const DECODE_FAILURES_TOTAL: &str = "ingest_decode_failures_total";
/// Bulk-write calls issued (labels: collection, outcome).
pub const BATCHES_TOTAL: &str = "ingest_batches_total";
/// Documents acknowledged by the store (label: collection).
pub const DOCUMENTS_INSERTED_TOTAL: &str = "ingest_documents_inserted_total";
/// Documents the store rejected inside a partially failed call (label: collection).
pub const DOCUMENTS_REJECTED_TOTAL: &str = "ingest_documents_rejected_total";
/// Bulk-write calls that failed outright (label: collection).
pub const BATCH_FAILURES_TOTAL: &str = "ingest_batch_failures_total";
/// Time spent in one bulk-write call.
pub const BATCH_DURATION_SECONDS: &str = "ingest_batch_duration_seconds";
/// Whether a load is running (1=yes, 0=no).
pub const RUNNING: &str = "ingest_running";
/// Current load rate.
pub const DOCS_PER_SECOND: &str = "ingest_docs_per_second";
/// Indexes created or confirmed (label: collection).
pub const INDEXES_CREATED_TOTAL: &str = "ingest_indexes_created_total";
/// Index creation failures (label: collection).
pub const INDEX_FAILURES_TOTAL: &str = "ingest_index_failures_total";

/// Initialize the Prometheus metrics recorder.
///
/// Returns `None` if a recorder is already installed.
pub fn init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_metrics();
    Some(handle)
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves `/metrics` on the given port from a background task and returns
/// once the listener is bound.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::warn!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for every metric the loader emits.
fn register_metrics() {
    // =========================================================================
    // Load phase
    // =========================================================================

    describe_counter!(ENTRIES_TOTAL, "Archive entries seen, per collection");
    describe_counter!(
        DECODE_FAILURES_TOTAL,
        "Archive entries skipped because they could not be decoded"
    );
    describe_counter!(BATCHES_TOTAL, "Bulk-write calls issued, by outcome");
    describe_counter!(
        DOCUMENTS_INSERTED_TOTAL,
        "Documents acknowledged by the destination store"
    );
    describe_counter!(
        DOCUMENTS_REJECTED_TOTAL,
        "Documents rejected inside partially failed bulk writes"
    );
    describe_counter!(
        BATCH_FAILURES_TOTAL,
        "Bulk-write calls that failed without inserting anything"
    );
    describe_histogram!(BATCH_DURATION_SECONDS, "Time spent in one bulk-write call");
    describe_gauge!(RUNNING, "Whether a load is currently running (1=yes, 0=no)");
    describe_gauge!(DOCS_PER_SECOND, "Documents inserted per second in the current partition");

    // =========================================================================
    // Index phase
    // =========================================================================

    describe_counter!(INDEXES_CREATED_TOTAL, "Indexes created or confirmed present");
    describe_counter!(INDEX_FAILURES_TOTAL, "Index creation failures");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        let first = init_metrics();
        let second = init_metrics();
        // At most one install can succeed per process.
        assert!(first.is_none() || second.is_none());
    }

    #[test]
    fn test_register_metrics_does_not_panic() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            ENTRIES_TOTAL,
            DECODE_FAILURES_TOTAL,
            BATCHES_TOTAL,
            DOCUMENTS_INSERTED_TOTAL,
            DOCUMENTS_REJECTED_TOTAL,
            BATCH_FAILURES_TOTAL,
            BATCH_DURATION_SECONDS,
            RUNNING,
            DOCS_PER_SECOND,
            INDEXES_CREATED_TOTAL,
            INDEX_FAILURES_TOTAL,
        ] {
            assert!(name.starts_with("ingest_"), "{name}");
        }
    }
}
