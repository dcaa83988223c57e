//! Error types for database creation, appends and fetches.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::schema::ConsolidationFn;

/// Reasons a [`DatabaseSpec`](crate::DatabaseSpec) is rejected at creation time.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// The primary step is zero.
    ZeroStep,
    /// No data sources were declared.
    NoDataSources,
    /// No archives were declared.
    NoArchives,
    /// The data source at this position has an empty name.
    EmptyName(usize),
    /// A data source name exceeds [`MAX_NAME_LEN`](crate::MAX_NAME_LEN) bytes.
    NameTooLong(String),
    /// Two data sources share a name.
    DuplicateName(String),
    /// A data source has a zero heartbeat.
    ZeroHeartbeat(String),
    /// A data source has NaN bounds or `min > max`.
    InvalidBounds {
        /// Data source name.
        name: String,
        /// Declared minimum.
        min: Option<f64>,
        /// Declared maximum.
        max: Option<f64>,
    },
    /// The archive at this position consolidates zero primary steps per row.
    ZeroStepsPerRow(usize),
    /// The archive at this position has no rows.
    ZeroRowCount(usize),
    /// The archive at this position has an xff outside `(0, 1]`.
    InvalidXff {
        /// Archive position.
        index: usize,
        /// Declared xff.
        xff: f64,
    },
    /// The storage required by the schema does not fit in the address space.
    TooLarge,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::ZeroStep => write!(f, "primary step must be positive"),
            SchemaError::NoDataSources => write!(f, "at least one data source is required"),
            SchemaError::NoArchives => write!(f, "at least one archive is required"),
            SchemaError::EmptyName(index) => {
                write!(f, "data source #{index} has an empty name")
            }
            SchemaError::NameTooLong(name) => {
                write!(f, "data source name '{name}' is too long")
            }
            SchemaError::DuplicateName(name) => {
                write!(f, "duplicate data source name: {name}")
            }
            SchemaError::ZeroHeartbeat(name) => {
                write!(f, "data source '{name}' has a zero heartbeat")
            }
            SchemaError::InvalidBounds { name, min, max } => {
                write!(f, "data source '{name}' has invalid bounds [{min:?}, {max:?}]")
            }
            SchemaError::ZeroStepsPerRow(index) => {
                write!(f, "archive #{index} must consolidate at least one step per row")
            }
            SchemaError::ZeroRowCount(index) => {
                write!(f, "archive #{index} must have at least one row")
            }
            SchemaError::InvalidXff { index, xff } => {
                write!(f, "archive #{index} xff {xff} is outside (0, 1]")
            }
            SchemaError::TooLarge => write!(f, "schema storage size overflows"),
        }
    }
}

impl std::error::Error for SchemaError {}

/// Errors returned when creating a database.
#[derive(Debug)]
pub enum CreateError {
    /// The creation parameters are invalid; nothing was created.
    InvalidSchema(SchemaError),
    /// A database already exists at this path.
    AlreadyExists(PathBuf),
    /// An I/O error occurred.
    Io(io::Error),
}

impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateError::InvalidSchema(e) => write!(f, "invalid schema: {e}"),
            CreateError::AlreadyExists(path) => {
                write!(f, "database '{}' already exists", path.display())
            }
            CreateError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for CreateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CreateError::InvalidSchema(e) => Some(e),
            CreateError::Io(e) => Some(e),
            CreateError::AlreadyExists(_) => None,
        }
    }
}

impl From<SchemaError> for CreateError {
    fn from(err: SchemaError) -> Self {
        CreateError::InvalidSchema(err)
    }
}

impl From<io::Error> for CreateError {
    fn from(err: io::Error) -> Self {
        CreateError::Io(err)
    }
}

/// Errors returned when appending a sample.
#[derive(Debug)]
pub enum AppendError {
    /// The sample is not newer than the last accepted update. Nothing changed.
    OutOfOrder {
        /// Rejected timestamp.
        timestamp: u64,
        /// Timestamp of the last accepted update.
        last_update: u64,
    },
    /// Another append holds the write lock (only from `try_append`).
    Busy,
    /// A previous write failed half way; the database must be reloaded.
    Inconsistent(PathBuf),
    /// An I/O error occurred.
    Io(io::Error),
}

impl fmt::Display for AppendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppendError::OutOfOrder {
                timestamp,
                last_update,
            } => write!(
                f,
                "sample at {timestamp} is not newer than last update {last_update}"
            ),
            AppendError::Busy => write!(f, "database is locked by another writer"),
            AppendError::Inconsistent(path) => {
                write!(f, "database '{}' is inconsistent, reload required", path.display())
            }
            AppendError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for AppendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppendError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for AppendError {
    fn from(err: io::Error) -> Self {
        AppendError::Io(err)
    }
}

/// Errors returned when reading a range.
#[derive(Debug)]
pub enum FetchError {
    /// No archive with this consolidation function retains the requested range.
    NoSuitableArchive {
        /// Requested consolidation function.
        consolidation: ConsolidationFn,
        /// Requested start.
        start: u64,
        /// Requested end.
        end: u64,
    },
    /// `start` is after `end`.
    InvalidRange {
        /// Requested start.
        start: u64,
        /// Requested end.
        end: u64,
    },
    /// A fleet fetch was given no databases.
    EmptyFleet,
    /// Fleet members disagree on data sources or row step.
    SchemaMismatch(String),
    /// A previous write failed half way; the database must be reloaded.
    Inconsistent(PathBuf),
    /// An I/O error occurred.
    Io(io::Error),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::NoSuitableArchive {
                consolidation,
                start,
                end,
            } => write!(
                f,
                "no {} archive retains [{start}, {end}]",
                consolidation.name()
            ),
            FetchError::InvalidRange { start, end } => {
                write!(f, "invalid range: start {start} is after end {end}")
            }
            FetchError::EmptyFleet => write!(f, "fleet fetch needs at least one database"),
            FetchError::SchemaMismatch(msg) => write!(f, "fleet schema mismatch: {msg}"),
            FetchError::Inconsistent(path) => {
                write!(f, "database '{}' is inconsistent, reload required", path.display())
            }
            FetchError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FetchError {
    fn from(err: io::Error) -> Self {
        FetchError::Io(err)
    }
}
