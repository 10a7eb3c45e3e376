//! Loader configuration loaded from environment variables.

use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of records per bulk-write call.
pub const DEFAULT_BATCH_SIZE: usize = 8_000;

/// Connection settings for the destination store.
///
/// The tuning values apply only where the connection string leaves them
/// unset.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `mongodb://` or `mongodb+srv://` connection string.
    pub uri: String,

    /// Destination database name.
    pub database: String,

    /// Write acknowledgment level (`w`). 1 = primary only.
    pub write_acknowledgment: u32,

    /// Maximum connections in the driver pool.
    pub max_pool_size: u32,

    /// Connections the pool keeps open while idle.
    pub min_pool_size: u32,

    /// How long an idle pooled connection lives before it is reclaimed.
    pub max_idle_time: Duration,

    /// How long to wait for a suitable server.
    pub server_selection_timeout: Duration,

    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// Let the driver retry reads (sampling, counting) once on a transient error.
    pub retry_reads: bool,

    /// Let the driver retry writes. Off: a failed bulk write is final.
    pub retry_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            database: "Facturas".to_string(),
            write_acknowledgment: 1,
            max_pool_size: 100,
            min_pool_size: 10,
            max_idle_time: Duration::from_secs(30),
            server_selection_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            retry_reads: true,
            retry_writes: false,
        }
    }
}

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the zip archive.
    pub archive_path: PathBuf,

    /// Destination store settings.
    pub store: StoreConfig,

    /// Records per bulk-write call.
    pub batch_size: usize,

    /// Log progress every N entries.
    pub progress_interval: usize,

    /// Fields that get their own index when present on a sampled document.
    pub probe_fields: Vec<String>,

    /// Entry name suffixes treated as data (without the leading dot).
    pub extensions: Vec<String>,

    /// Prometheus port (0 disables the exporter).
    pub metrics_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            archive_path: PathBuf::from("Facturas.zip"),
            store: StoreConfig::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            progress_interval: 1_000,
            probe_fields: vec!["factura_num".to_string(), "fecha_hora".to_string()],
            extensions: vec!["json".to_string(), "json.gz".to_string()],
            metrics_port: 0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (all have defaults):
    /// - `ZIP_PATH`: archive path (default: "Facturas.zip")
    /// - `MONGO_URI`: connection string (default: empty, rejected when connecting)
    /// - `DATABASE_NAME`: database name (default: "Facturas")
    /// - `BATCH_SIZE`: records per bulk write (default: 8000)
    /// - `PROGRESS_INTERVAL`: entries between progress logs (default: 1000)
    /// - `INDEX_PROBE_FIELDS`: comma-separated business fields (default: "factura_num,fecha_hora")
    /// - `DATA_EXTENSIONS`: comma-separated entry suffixes (default: "json,json.gz")
    /// - `METRICS_PORT`: Prometheus port, 0 to disable (default: 0)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let archive_path = std::env::var("ZIP_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.archive_path);

        let store = StoreConfig {
            uri: std::env::var("MONGO_URI").unwrap_or_default(),
            database: std::env::var("DATABASE_NAME").unwrap_or(defaults.store.database),
            ..defaults.store
        };

        let batch_size = parse_env("BATCH_SIZE", defaults.batch_size)?;
        let progress_interval = parse_env("PROGRESS_INTERVAL", defaults.progress_interval)?;
        let metrics_port = parse_env("METRICS_PORT", defaults.metrics_port)?;

        let probe_fields = std::env::var("INDEX_PROBE_FIELDS")
            .map(|v| split_list(&v))
            .unwrap_or(defaults.probe_fields);

        let extensions = std::env::var("DATA_EXTENSIONS")
            .map(|v| {
                split_list(&v)
                    .into_iter()
                    .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                    .collect()
            })
            .unwrap_or(defaults.extensions);

        let config = Self {
            archive_path,
            store,
            batch_size,
            progress_interval,
            probe_fields,
            extensions,
            metrics_port,
        };
        config.validate()?;

        tracing::info!(
            archive = %config.archive_path.display(),
            database = %config.store.database,
            batch_size = config.batch_size,
            probe_fields = ?config.probe_fields,
            extensions = ?config.extensions,
            "loader configuration loaded"
        );

        Ok(config)
    }

    /// Check invariants that the rest of the loader relies on.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be greater than zero".into()));
        }
        if self.progress_interval == 0 {
            return Err(Error::Config(
                "progress interval must be greater than zero".into(),
            ));
        }
        if self.extensions.is_empty() {
            return Err(Error::Config(
                "at least one data extension is required".into(),
            ));
        }
        if self.store.database.trim().is_empty() {
            return Err(Error::Config("database name must not be empty".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}"))),
        _ => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
