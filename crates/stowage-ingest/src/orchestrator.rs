//! Run orchestrator.
//!
//! Sequences a whole load:
//!
//! ```text
//! Disconnected -> Connected -> ArchiveOpen -> PartitionsDiscovered
//!     -> (Loading)* -> Indexed -> Completed
//!
//! Disconnected | Connected | ArchiveOpen -> Failed
//! Loading -> Cancelled
//! ```
//!
//! The store connection and the open archive live in a [`Session`] that is
//! created once and closed exactly once, whichever way the run ends.

use crate::archive::{ArchiveReader, Partition};
use crate::batch::{BatchAccumulator, PartitionStats};
use crate::config::Config;
use crate::indexes::{IndexReport, build_indexes};
use crate::store::{Connector, DocumentStore};
use crate::writer::BulkWriter;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use metrics::gauge;
use std::fmt;
use std::io::{Read, Seek};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use stowage_core::metrics::RUNNING;
use tracing::{error, info, warn};

/// Where a run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing acquired yet.
    Disconnected,
    /// Store connection verified.
    Connected,
    /// Archive opened and its central directory read.
    ArchiveOpen,
    /// Partitions known, nothing loaded yet.
    PartitionsDiscovered,
    /// A partition is being loaded.
    Loading,
    /// Indexes built on every loaded collection.
    Indexed,
    /// The run finished.
    Completed,
    /// Stopped early on request; indexes skipped.
    Cancelled,
    /// A setup step failed.
    Failed,
}

impl RunState {
    /// Name used in logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::ArchiveOpen => "archive_open",
            Self::PartitionsDiscovered => "partitions_discovered",
            Self::Loading => "loading",
            Self::Indexed => "indexed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Disconnected, Connected)
                | (Connected, ArchiveOpen)
                | (ArchiveOpen, PartitionsDiscovered)
                | (PartitionsDiscovered, Loading)
                | (Loading, Loading)
                | (PartitionsDiscovered, Indexed)
                | (Loading, Indexed)
                | (PartitionsDiscovered, Completed)
                | (Loading, Completed)
                | (Indexed, Completed)
                | (PartitionsDiscovered, Cancelled)
                | (Loading, Cancelled)
                | (Disconnected, Failed)
                | (Connected, Failed)
                | (ArchiveOpen, Failed)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the run state and rejects out-of-order transitions.
#[derive(Debug)]
struct StateMachine {
    state: RunState,
}

impl StateMachine {
    fn new() -> Self {
        Self {
            state: RunState::Disconnected,
        }
    }

    fn advance(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        tracing::debug!("Run state: {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Record a fatal setup failure. Never fails itself.
    fn fail(&mut self) {
        if self.state.can_transition_to(RunState::Failed) {
            self.state = RunState::Failed;
        }
    }
}

/// Resources held for the duration of a run.
pub struct Session<S, R: Read + Seek> {
    /// Destination store.
    pub store: S,
    /// The open archive.
    pub archive: ArchiveReader<R>,
}

impl<S: DocumentStore, R: Read + Seek> Session<S, R> {
    /// Release the archive handle and the store connection.
    pub async fn close(self) {
        let Session { store, archive } = self;
        let path = archive.path().display().to_string();
        drop(archive);
        info!("Archive {} closed", path);
        store.close().await;
    }
}

/// Stored-vs-expected document count for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Collection name.
    pub collection: String,
    /// Documents the run believes it inserted.
    pub expected: u64,
    /// Documents the store reports, if counting succeeded.
    pub stored: Option<u64>,
}

impl Reconciliation {
    /// Whether the store agrees with the run's own count.
    pub fn matches(&self) -> bool {
        self.stored == Some(self.expected)
    }
}

/// Aggregated counts across partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    /// Data entries looked at.
    pub entries_seen: usize,
    /// Documents the store accepted.
    pub loaded: usize,
    /// Entries skipped as undecodable.
    pub failed_decode: usize,
    /// Documents rejected inside partially failed writes.
    pub rejected: usize,
    /// Documents lost to writes that failed outright.
    pub lost: usize,
    /// Bulk-write calls issued.
    pub batches: usize,
    /// Bulk-write calls that failed outright.
    pub batches_failed: usize,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall time for the whole run.
    pub elapsed: Duration,
    /// Final state (`Completed` or `Cancelled`).
    pub state: RunState,
    /// Per-partition counters, in processing order.
    pub partitions: Vec<PartitionStats>,
    /// Index phase outcome (empty when skipped).
    pub indexes: IndexReport,
    /// Post-load count check, when requested.
    pub reconciliation: Vec<Reconciliation>,
}

impl RunReport {
    /// Sum of every partition's counters.
    pub fn totals(&self) -> Totals {
        self.partitions.iter().fold(Totals::default(), |mut t, p| {
            t.entries_seen += p.entries_seen;
            t.loaded += p.documents_inserted;
            t.failed_decode += p.failed_decode;
            t.rejected += p.documents_rejected;
            t.lost += p.documents_lost;
            t.batches += p.batches_dispatched;
            t.batches_failed += p.batches_failed;
            t
        })
    }

    /// Time spent loading, summed over partitions.
    pub fn load_time(&self) -> Duration {
        self.partitions.iter().map(|p| p.elapsed).sum()
    }

    /// Collections that received at least one document.
    pub fn collections(&self) -> Vec<String> {
        loaded_collections(&self.partitions)
    }
}

/// Collections that received at least one document, in load order.
fn loaded_collections(stats: &[PartitionStats]) -> Vec<String> {
    stats
        .iter()
        .filter(|p| p.documents_inserted > 0)
        .map(|p| p.collection.clone())
        .collect()
}

/// Optional phases of a run.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Build indexes after loading.
    pub build_indexes: bool,
    /// Compare stored counts against inserted counts after loading.
    pub verify: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            build_indexes: true,
            verify: false,
        }
    }
}

/// Drives a complete load.
pub struct Orchestrator {
    config: Config,
    options: RunOptions,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Create an orchestrator. `cancel` is shared with the signal handler.
    pub fn new(config: Config, options: RunOptions, cancel: Arc<AtomicBool>) -> Self {
        Self {
            config,
            options,
            cancel,
        }
    }

    /// Run against the archive on disk named in the configuration.
    pub async fn run<C: Connector>(&self, connector: &C) -> Result<RunReport> {
        let path = self.config.archive_path.clone();
        let extensions = self.config.extensions.clone();
        self.run_with(connector, move || ArchiveReader::open(&path, &extensions))
            .await
    }

    /// Run with a custom archive opener.
    ///
    /// The opener is only called once the store connection is up.
    pub async fn run_with<C, R, F>(&self, connector: &C, open_archive: F) -> Result<RunReport>
    where
        C: Connector,
        R: Read + Seek,
        F: FnOnce() -> Result<ArchiveReader<R>>,
    {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut machine = StateMachine::new();

        let store = match connector.connect().await {
            Ok(store) => store,
            Err(e) => {
                machine.fail();
                error!("Cannot connect to the destination store: {}", e);
                return Err(e);
            }
        };
        machine.advance(RunState::Connected)?;
        info!("Connected to {} store", store.backend());

        let archive = match open_archive() {
            Ok(archive) => archive,
            Err(e) => {
                machine.fail();
                error!("Cannot open archive: {}", e);
                store.close().await;
                return Err(e);
            }
        };
        machine.advance(RunState::ArchiveOpen)?;

        let session = Session { store, archive };

        if session.archive.data_entry_count() == 0 {
            machine.fail();
            let err = Error::NoDataEntries(session.archive.path().to_path_buf());
            error!("{}", err);
            session.close().await;
            return Err(err);
        }

        gauge!(RUNNING).set(1.0);
        let result = self.drive(&mut machine, session, started_at, start).await;
        gauge!(RUNNING).set(0.0);
        result
    }

    /// Everything after partition discovery. Always closes the session.
    async fn drive<S, R>(
        &self,
        machine: &mut StateMachine,
        mut session: Session<S, R>,
        started_at: DateTime<Utc>,
        start: Instant,
    ) -> Result<RunReport>
    where
        S: DocumentStore,
        R: Read + Seek,
    {
        let outcome = self.load_and_index(machine, &mut session).await;
        session.close().await;

        let (partitions, indexes, reconciliation) = outcome?;
        let report = RunReport {
            started_at,
            elapsed: start.elapsed(),
            state: machine.state,
            partitions,
            indexes,
            reconciliation,
        };
        Ok(report)
    }

    async fn load_and_index<S, R>(
        &self,
        machine: &mut StateMachine,
        session: &mut Session<S, R>,
    ) -> Result<(Vec<PartitionStats>, IndexReport, Vec<Reconciliation>)>
    where
        S: DocumentStore,
        R: Read + Seek,
    {
        machine.advance(RunState::PartitionsDiscovered)?;

        let partitions: Vec<Partition> = session.archive.partitions().cloned().collect();
        info!(
            "Discovered {} partitions, {} data entries",
            session.archive.partition_count(),
            session.archive.data_entry_count()
        );

        let accumulator = BatchAccumulator::new(
            self.config.batch_size,
            self.config.progress_interval,
            Arc::clone(&self.cancel),
        );
        let writer = BulkWriter::new(&session.store);

        let mut stats = Vec::with_capacity(partitions.len());
        let mut cancelled = false;

        for (i, partition) in partitions.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            machine.advance(RunState::Loading)?;
            info!("[{}/{}] Loading {}", i + 1, partitions.len(), partition.name);

            let partition_stats = accumulator
                .load_partition(&mut session.archive, partition, &writer)
                .await;
            cancelled = partition_stats.cancelled;
            stats.push(partition_stats);
            if cancelled {
                break;
            }
        }

        if cancelled {
            warn!(
                "Run cancelled after {} of {} partitions; skipping index build",
                stats.len(),
                partitions.len()
            );
            machine.advance(RunState::Cancelled)?;
            return Ok((stats, IndexReport::default(), Vec::new()));
        }

        let collections = loaded_collections(&stats);

        let indexes = if self.options.build_indexes {
            info!("Building indexes on {} collections", collections.len());
            let report =
                build_indexes(&session.store, &collections, &self.config.probe_fields).await;
            machine.advance(RunState::Indexed)?;
            report
        } else {
            info!("Index build disabled");
            IndexReport::default()
        };

        let reconciliation = if self.options.verify {
            reconcile(&session.store, &stats).await
        } else {
            Vec::new()
        };

        machine.advance(RunState::Completed)?;
        Ok((stats, indexes, reconciliation))
    }
}

/// Count what each collection holds and compare with what was inserted.
async fn reconcile<S: DocumentStore>(store: &S, stats: &[PartitionStats]) -> Vec<Reconciliation> {
    let mut results = Vec::with_capacity(stats.len());
    for partition in stats {
        let stored = match store.count_documents(&partition.collection).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Cannot count documents in {}: {}", partition.collection, e);
                None
            }
        };
        let check = Reconciliation {
            collection: partition.collection.clone(),
            expected: partition.documents_inserted as u64,
            stored,
        };
        if check.matches() {
            info!("Verified {}: {} documents", check.collection, check.expected);
        } else {
            warn!(
                "Count mismatch in {}: expected {}, store reports {:?}",
                check.collection, check.expected, check.stored
            );
        }
        results.push(check);
    }
    results
}
