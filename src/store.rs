//! Path-addressed registry of round-robin databases.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::builder::RrdStoreBuilder;
use crate::config::StoreConfig;
use crate::database::DatabaseInfo;
use crate::error::{AppendError, CreateError, FetchError};
use crate::fetch::{ArchiveSelector, FetchTable, fleet_average};
use crate::file::RrdFile;
use crate::handle_pool::HandlePool;
use crate::schema::DatabaseSpec;
use crate::update::AppendReport;

/// A registry of round-robin database files addressed by path.
///
/// The store opens databases lazily and keeps them in a bounded pool, so a
/// database is parsed once and every operation on the same path shares one
/// [`RrdFile`] and therefore one write lock. Operations on different paths
/// never block each other.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use manifold_rrd::{ArchiveSpec, ConsolidationFn, DataSourceSpec, DatabaseSpec, RrdStore};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let dir = tempfile::TempDir::new()?;
/// let path = dir.path().join("host1/load.rrd");
/// let store = RrdStore::builder().without_sync().build();
///
/// let spec = DatabaseSpec::new(60, 0)
///     .data_source(DataSourceSpec::gauge("load", 120))
///     .archive(ArchiveSpec::new(ConsolidationFn::Average, 1, 1440));
/// store.create_database(&path, &spec)?;
///
/// store.append_sample(&path, 60, &HashMap::from([("load".to_string(), 0.5)]))?;
/// let table = store.fetch_range(&path, ConsolidationFn::Average.into(), 60, 60)?;
/// assert_eq!(table.column("load"), Some(vec![0.5]));
/// # Ok(())
/// # }
/// ```
pub struct RrdStore {
    config: StoreConfig,
    pool: HandlePool,
}

impl RrdStore {
    /// Creates a store with default settings.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates a store with the given settings.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            pool: HandlePool::new(config.pool_size),
            config,
        }
    }

    /// Returns a builder for configuring a store.
    pub fn builder() -> RrdStoreBuilder {
        RrdStoreBuilder::new()
    }

    /// The store's settings.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Creates a new database file at `path`.
    ///
    /// # Errors
    ///
    /// * [`CreateError::InvalidSchema`] if `spec` is invalid; nothing is created.
    /// * [`CreateError::AlreadyExists`] if `path` exists; the caller decides what to do.
    /// * [`CreateError::Io`] on I/O failure.
    pub fn create_database(
        &self,
        path: impl AsRef<Path>,
        spec: &DatabaseSpec,
    ) -> Result<(), CreateError> {
        let path = path.as_ref();
        spec.validate()?;

        if self.config.create_parent_dirs
            && let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
        {
            fs::create_dir_all(parent)?;
        }

        let file = RrdFile::create(path, spec, self.config.sync_writes)?;
        let key = fs::canonicalize(path)?;
        self.pool.insert(key, file);
        Ok(())
    }

    /// Creates the database unless a file already exists at `path`.
    ///
    /// Returns `true` if it was created. An existing file is neither opened nor
    /// checked against `spec`.
    pub fn ensure_database(
        &self,
        path: impl AsRef<Path>,
        spec: &DatabaseSpec,
    ) -> Result<bool, CreateError> {
        match self.create_database(path, spec) {
            Ok(()) => Ok(true),
            Err(CreateError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Returns the shared handle for `path`, opening the file if needed.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the file is missing or corrupt.
    pub fn open(&self, path: impl AsRef<Path>) -> io::Result<Arc<RrdFile>> {
        let key = fs::canonicalize(path)?;
        let sync = self.config.sync_writes;
        self.pool.acquire(&key, || RrdFile::open(&key, sync))
    }

    /// Applies one sample to the database at `path`.
    ///
    /// Names not in the schema are ignored and listed in the report.
    ///
    /// # Errors
    ///
    /// * [`AppendError::OutOfOrder`] if `timestamp` is not newer than the last update.
    /// * [`AppendError::Inconsistent`] after an earlier failed write.
    /// * [`AppendError::Io`] if the file cannot be opened or written.
    pub fn append_sample(
        &self,
        path: impl AsRef<Path>,
        timestamp: u64,
        values: &HashMap<String, f64>,
    ) -> Result<AppendReport, AppendError> {
        self.open(path)?.append(timestamp, values)
    }

    /// Reads `[start, end]` from the database at `path`.
    ///
    /// # Errors
    ///
    /// * [`FetchError::InvalidRange`] if `start > end`.
    /// * [`FetchError::NoSuitableArchive`] if no archive retains `start`.
    /// * [`FetchError::Inconsistent`] after an earlier failed write.
    /// * [`FetchError::Io`] if the file cannot be opened.
    pub fn fetch_range(
        &self,
        path: impl AsRef<Path>,
        selector: ArchiveSelector,
        start: u64,
        end: u64,
    ) -> Result<FetchTable, FetchError> {
        self.open(path)?.fetch(selector, start, end)
    }

    /// Timestamp of the most recent accepted sample, or the creation time.
    pub fn last_update(&self, path: impl AsRef<Path>) -> io::Result<u64> {
        Ok(self.open(path)?.last_update())
    }

    /// Schema and live state summary of the database at `path`.
    pub fn info(&self, path: impl AsRef<Path>) -> io::Result<DatabaseInfo> {
        Ok(self.open(path)?.info())
    }

    /// Fetches the same range from every database and averages them.
    ///
    /// Only timestamps present in every member are kept; a value unknown in
    /// any member is unknown in the result.
    ///
    /// # Errors
    ///
    /// [`FetchError::EmptyFleet`] for an empty `paths`, the first member error,
    /// or [`FetchError::SchemaMismatch`] if members select different row steps
    /// or have different data sources.
    pub fn fetch_fleet_average<P: AsRef<Path>>(
        &self,
        paths: &[P],
        selector: ArchiveSelector,
        start: u64,
        end: u64,
    ) -> Result<FetchTable, FetchError> {
        if paths.is_empty() {
            return Err(FetchError::EmptyFleet);
        }
        let tables = paths
            .iter()
            .map(|path| self.fetch_range(path, selector, start, end))
            .collect::<Result<Vec<_>, _>>()?;
        fleet_average(&tables)
    }

    /// Closes the pooled handle for `path`.
    ///
    /// Returns `false` if the database was not open, or if a handle returned
    /// by [`RrdStore::open`] is still held; that handle stays pooled so every
    /// append to the path keeps going through one writer.
    pub fn release(&self, path: impl AsRef<Path>) -> bool {
        match fs::canonicalize(path) {
            Ok(key) => self.pool.release(&key),
            Err(_) => false,
        }
    }

    /// Number of databases currently held open.
    pub fn open_count(&self) -> usize {
        self.pool.len()
    }
}

impl Default for RrdStore {
    fn default() -> Self {
        Self::new()
    }
}
