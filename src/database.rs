//! The in-memory round-robin database.

use serde::Serialize;

use crate::archive::Archive;
use crate::datasource::DataSource;
use crate::error::SchemaError;
use crate::schema::{ArchiveSpec, ConsolidationFn, DataSourceSpec, DatabaseSpec};

/// Lifecycle state of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatabaseState {
    /// Created, no sample accepted yet.
    Created,
    /// At least one sample accepted.
    Active,
}

/// An in-memory round-robin database.
///
/// A database owns an ordered set of data sources and an ordered set of
/// archives. All storage is allocated by [`Database::create`] and never grows.
/// Samples are applied with [`Database::append`] and ranges are read back with
/// [`Database::fetch`].
///
/// `Database` itself is not synchronized; [`RrdFile`](crate::RrdFile) wraps it in a
/// reader-writer lock and persists it.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use manifold_rrd::{ArchiveSpec, ConsolidationFn, DataSourceSpec, Database, DatabaseSpec};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let spec = DatabaseSpec::new(60, 0)
///     .data_source(DataSourceSpec::gauge("temp", 120))
///     .archive(ArchiveSpec::new(ConsolidationFn::Average, 1, 5));
/// let mut db = Database::create(&spec)?;
///
/// db.append(60, &HashMap::from([("temp".to_string(), 10.0)]))?;
/// db.append(120, &HashMap::from([("temp".to_string(), 20.0)]))?;
///
/// let table = db.fetch(ConsolidationFn::Average.into(), 60, 120)?;
/// assert_eq!(table.column("temp"), Some(vec![10.0, 20.0]));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pub(crate) step: u64,
    pub(crate) start: u64,
    pub(crate) last_update: u64,
    pub(crate) update_count: u64,
    pub(crate) data_sources: Vec<DataSource>,
    pub(crate) archives: Vec<Archive>,
}

impl Database {
    /// Validates `spec` and allocates a database with all rows unknown.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] found in `spec`.
    pub fn create(spec: &DatabaseSpec) -> Result<Self, SchemaError> {
        spec.validate()?;

        let data_sources = spec
            .data_sources
            .iter()
            .map(|ds| DataSource::new(ds.clone(), spec.start, spec.step))
            .collect();
        let archives = spec
            .archives
            .iter()
            .map(|arc| Archive::new(arc.clone(), spec.data_sources.len(), spec.step, spec.start))
            .collect();

        Ok(Self {
            step: spec.step,
            start: spec.start,
            last_update: spec.start,
            update_count: 0,
            data_sources,
            archives,
        })
    }

    /// Reconstructs the creation spec.
    pub fn spec(&self) -> DatabaseSpec {
        DatabaseSpec {
            step: self.step,
            start: self.start,
            data_sources: self
                .data_sources
                .iter()
                .map(|ds| ds.spec().clone())
                .collect(),
            archives: self.archives.iter().map(|arc| arc.spec().clone()).collect(),
        }
    }

    /// Seconds between primary data points.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Creation time.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Timestamp of the most recent accepted sample, or the creation time.
    pub fn last_update(&self) -> u64 {
        self.last_update
    }

    /// Number of accepted samples.
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> DatabaseState {
        if self.update_count == 0 {
            DatabaseState::Created
        } else {
            DatabaseState::Active
        }
    }

    /// Ordered data sources.
    pub fn data_sources(&self) -> &[DataSource] {
        &self.data_sources
    }

    /// Ordered archives.
    pub fn archives(&self) -> &[Archive] {
        &self.archives
    }

    /// Data source names in schema order.
    pub fn data_source_names(&self) -> Vec<String> {
        self.data_sources
            .iter()
            .map(|ds| ds.name().to_string())
            .collect()
    }

    /// Returns the position of the named data source.
    pub fn data_source_index(&self, name: &str) -> Option<usize> {
        self.data_sources.iter().position(|ds| ds.name() == name)
    }

    /// End boundary of the oldest row retained by archive `index`.
    pub fn first(&self, index: usize) -> Option<u64> {
        self.archives.get(index).map(Archive::first_row_time)
    }

    /// Summarizes schema and live state.
    pub fn info(&self) -> DatabaseInfo {
        DatabaseInfo {
            step: self.step,
            start: self.start,
            last_update: self.last_update,
            update_count: self.update_count,
            state: self.state(),
            data_sources: self
                .data_sources
                .iter()
                .map(|ds| DataSourceInfo {
                    spec: ds.spec().clone(),
                    last_raw: ds.last_raw(),
                })
                .collect(),
            archives: self
                .archives
                .iter()
                .map(|arc| ArchiveInfo {
                    spec: arc.spec().clone(),
                    row_step: arc.row_step(),
                    first_row_time: arc.first_row_time(),
                    last_row_time: arc.last_row_time(),
                })
                .collect(),
        }
    }

    /// Archives with the given consolidation function, as `(index, archive)` pairs.
    pub(crate) fn archives_with(
        &self,
        consolidation: ConsolidationFn,
    ) -> impl Iterator<Item = (usize, &Archive)> {
        self.archives
            .iter()
            .enumerate()
            .filter(move |(_, arc)| arc.consolidation() == consolidation)
    }
}

/// Snapshot of a database's schema and live state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseInfo {
    /// Primary step.
    pub step: u64,
    /// Creation time.
    pub start: u64,
    /// Last accepted sample time.
    pub last_update: u64,
    /// Number of accepted samples.
    pub update_count: u64,
    /// Lifecycle state.
    pub state: DatabaseState,
    /// Per data source details.
    pub data_sources: Vec<DataSourceInfo>,
    /// Per archive details.
    pub archives: Vec<ArchiveInfo>,
}

/// Data source entry of a [`DatabaseInfo`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSourceInfo {
    /// Creation spec.
    pub spec: DataSourceSpec,
    /// Last raw input, if known.
    pub last_raw: Option<f64>,
}

/// Archive entry of a [`DatabaseInfo`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveInfo {
    /// Creation spec.
    pub spec: ArchiveSpec,
    /// Seconds per row.
    pub row_step: u64,
    /// End boundary of the oldest retained row.
    pub first_row_time: u64,
    /// End boundary of the newest committed row.
    pub last_row_time: u64,
}
