//! # manifold-rrd
//!
//! Fixed-retention, multi-resolution round-robin time-series storage.
//!
//! A database is created once with a fixed schema: an ordered set of data
//! sources (named input channels) and an ordered set of archives (circular
//! buffers of consolidated rows at one resolution). Its file never grows.
//! Samples are appended in timestamp order; each one is converted to a rate,
//! interpolated onto primary step boundaries and consolidated into every
//! archive. Ranges are read back as uniform-step tables.
//!
//! ## Features
//!
//! - **Data source kinds**: GAUGE, COUNTER, DERIVE and ABSOLUTE rate conversion with
//!   heartbeat and min/max bounds
//! - **Consolidation**: AVERAGE, MIN, MAX and LAST archives with an xfiles factor
//! - **Fixed size**: all storage is allocated at creation
//! - **Persistence**: CRC-checked header and state, dirty-row writes
//! - **Concurrency**: one writer and many readers per database, independent databases
//!   never contend
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use manifold_rrd::{ArchiveSpec, ConsolidationFn, DataSourceSpec, DatabaseSpec, RrdStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RrdStore::new();
//! let spec = DatabaseSpec::new(60, 1_609_459_200)
//!     .data_source(DataSourceSpec::gauge("temp", 120))
//!     .data_source(DataSourceSpec::counter("octets", 120))
//!     .archive(ArchiveSpec::new(ConsolidationFn::Average, 1, 1440))
//!     .archive(ArchiveSpec::new(ConsolidationFn::Max, 60, 720));
//! store.ensure_database("data/host1.rrd", &spec)?;
//!
//! let sample = HashMap::from([
//!     ("temp".to_string(), 21.5),
//!     ("octets".to_string(), 1_048_576.0),
//! ]);
//! store.append_sample("data/host1.rrd", 1_609_459_260, &sample)?;
//!
//! let table = store.fetch_range(
//!     "data/host1.rrd",
//!     ConsolidationFn::Average.into(),
//!     1_609_459_200,
//!     1_609_462_800,
//! )?;
//! for row in table.rows() {
//!     println!("{}: {:?}", row.timestamp, row.values);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Unknown values are NaN throughout; [`FetchTable::values_or`] substitutes a
//! default for display.

#![deny(missing_docs)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_possible_truncation
)]

mod archive;
mod builder;
mod config;
mod database;
mod datasource;
mod error;
mod fetch;
mod file;
mod format;
mod handle_pool;
mod schema;
mod store;
mod update;

pub use archive::Archive;
pub use builder::RrdStoreBuilder;
pub use config::{DEFAULT_POOL_SIZE, StoreConfig};
pub use database::{ArchiveInfo, DataSourceInfo, Database, DatabaseInfo, DatabaseState};
pub use datasource::DataSource;
pub use error::{AppendError, CreateError, FetchError, SchemaError};
pub use fetch::{ArchiveSelector, FetchTable, Row, fleet_average};
pub use file::RrdFile;
pub use format::{FORMAT_VERSION, MAGIC_NUMBER};
pub use schema::{
    ArchiveSpec, ConsolidationFn, DEFAULT_XFF, DataSourceKind, DataSourceSpec, DatabaseSpec,
    MAX_NAME_LEN,
};
pub use store::RrdStore;
pub use update::{AppendReport, normalize};
