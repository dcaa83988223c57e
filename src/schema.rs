//! Creation-time schema: data sources, archives and their validation.
//!
//! A schema is fixed when a database is created. Data sources are never renamed
//! or removed and archives never change shape, so everything here is validated
//! once, up front, before any storage is allocated.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Maximum length of a data source name in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Default fraction of unknown primary values tolerated in one archive row.
pub const DEFAULT_XFF: f64 = 0.5;

/// How a raw input value is turned into a per-second rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataSourceKind {
    /// The raw value is already a rate (temperature, queue length).
    Gauge,
    /// A monotonically increasing counter. A decrease is never a negative rate.
    Counter,
    /// Like a counter, but decreases produce negative rates.
    Derive,
    /// A counter that resets on every read.
    Absolute,
}

impl DataSourceKind {
    /// Returns the conventional upper-case name (`"GAUGE"`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gauge => "GAUGE",
            Self::Counter => "COUNTER",
            Self::Derive => "DERIVE",
            Self::Absolute => "ABSOLUTE",
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::Gauge => 0,
            Self::Counter => 1,
            Self::Derive => 2,
            Self::Absolute => 3,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Gauge),
            1 => Some(Self::Counter),
            2 => Some(Self::Derive),
            3 => Some(Self::Absolute),
            _ => None,
        }
    }
}

/// Reducer applied when several primary values are folded into one archive row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsolidationFn {
    /// Mean of the known values.
    Average,
    /// Smallest known value.
    Min,
    /// Largest known value.
    Max,
    /// Most recent known value.
    Last,
}

impl ConsolidationFn {
    /// Returns the conventional upper-case name (`"AVERAGE"`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Last => "LAST",
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::Average => 0,
            Self::Min => 1,
            Self::Max => 2,
            Self::Last => 3,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Average),
            1 => Some(Self::Min),
            2 => Some(Self::Max),
            3 => Some(Self::Last),
            _ => None,
        }
    }
}

/// Declaration of one input channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceSpec {
    /// Unique name within the database.
    pub name: String,
    /// Rate conversion applied to raw inputs.
    pub kind: DataSourceKind,
    /// Maximum number of seconds between two updates before the rate is unknown.
    pub heartbeat: u64,
    /// Rates below this bound are stored as unknown.
    #[serde(default)]
    pub min: Option<f64>,
    /// Rates above this bound are stored as unknown.
    #[serde(default)]
    pub max: Option<f64>,
}

impl DataSourceSpec {
    /// Creates an unbounded data source.
    pub fn new(name: impl Into<String>, kind: DataSourceKind, heartbeat: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            heartbeat,
            min: None,
            max: None,
        }
    }

    /// Shorthand for a [`DataSourceKind::Gauge`] data source.
    pub fn gauge(name: impl Into<String>, heartbeat: u64) -> Self {
        Self::new(name, DataSourceKind::Gauge, heartbeat)
    }

    /// Shorthand for a [`DataSourceKind::Counter`] data source.
    pub fn counter(name: impl Into<String>, heartbeat: u64) -> Self {
        Self::new(name, DataSourceKind::Counter, heartbeat)
    }

    /// Sets the sanity bounds for stored rates.
    #[must_use]
    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }
}

/// Declaration of one round-robin archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSpec {
    /// Reducer for this archive.
    pub consolidation: ConsolidationFn,
    /// Primary steps folded into one row.
    pub steps_per_row: u32,
    /// Ring capacity.
    pub row_count: u32,
    /// Tolerated fraction of unknown primary values per row, in `(0, 1]`.
    #[serde(default = "default_xff")]
    pub xff: f64,
}

fn default_xff() -> f64 {
    DEFAULT_XFF
}

impl ArchiveSpec {
    /// Creates an archive with the default xff of `0.5`.
    pub fn new(consolidation: ConsolidationFn, steps_per_row: u32, row_count: u32) -> Self {
        Self {
            consolidation,
            steps_per_row,
            row_count,
            xff: DEFAULT_XFF,
        }
    }

    /// Sets the unknown-fraction threshold.
    #[must_use]
    pub fn with_xff(mut self, xff: f64) -> Self {
        self.xff = xff;
        self
    }

    /// Seconds covered by one row for the given primary step.
    pub fn row_step(&self, step: u64) -> u64 {
        step * u64::from(self.steps_per_row)
    }
}

/// Everything needed to create a database.
///
/// # Example
///
/// ```
/// use manifold_rrd::{ArchiveSpec, ConsolidationFn, DataSourceSpec, DatabaseSpec};
///
/// let spec = DatabaseSpec::new(60, 0)
///     .data_source(DataSourceSpec::gauge("temp", 120))
///     .archive(ArchiveSpec::new(ConsolidationFn::Average, 1, 1440));
/// assert!(spec.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    /// Seconds between primary data points.
    pub step: u64,
    /// Creation time; the first accepted sample must be later than this.
    pub start: u64,
    /// Ordered input channels.
    pub data_sources: Vec<DataSourceSpec>,
    /// Ordered archives.
    pub archives: Vec<ArchiveSpec>,
}

impl DatabaseSpec {
    /// Creates an empty spec with the given primary step and start time.
    pub fn new(step: u64, start: u64) -> Self {
        Self {
            step,
            start,
            data_sources: Vec::new(),
            archives: Vec::new(),
        }
    }

    /// Appends a data source.
    #[must_use]
    pub fn data_source(mut self, spec: DataSourceSpec) -> Self {
        self.data_sources.push(spec);
        self
    }

    /// Appends an archive.
    #[must_use]
    pub fn archive(mut self, spec: ArchiveSpec) -> Self {
        self.archives.push(spec);
        self
    }

    /// Checks every creation invariant.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.step == 0 {
            return Err(SchemaError::ZeroStep);
        }
        if self.data_sources.is_empty() {
            return Err(SchemaError::NoDataSources);
        }
        if self.archives.is_empty() {
            return Err(SchemaError::NoArchives);
        }

        let mut seen_names = HashSet::new();
        for (index, ds) in self.data_sources.iter().enumerate() {
            if ds.name.is_empty() {
                return Err(SchemaError::EmptyName(index));
            }
            if ds.name.len() > MAX_NAME_LEN {
                return Err(SchemaError::NameTooLong(ds.name.clone()));
            }
            if !seen_names.insert(ds.name.as_str()) {
                return Err(SchemaError::DuplicateName(ds.name.clone()));
            }
            if ds.heartbeat == 0 {
                return Err(SchemaError::ZeroHeartbeat(ds.name.clone()));
            }
            let nan_bound = ds.min.is_some_and(f64::is_nan) || ds.max.is_some_and(f64::is_nan);
            let inverted = matches!((ds.min, ds.max), (Some(min), Some(max)) if min > max);
            if nan_bound || inverted {
                return Err(SchemaError::InvalidBounds {
                    name: ds.name.clone(),
                    min: ds.min,
                    max: ds.max,
                });
            }
        }

        let ds_count = self.data_sources.len() as u64;
        let mut total_slots: u64 = 0;
        for (index, archive) in self.archives.iter().enumerate() {
            if archive.steps_per_row == 0 {
                return Err(SchemaError::ZeroStepsPerRow(index));
            }
            if archive.row_count == 0 {
                return Err(SchemaError::ZeroRowCount(index));
            }
            if !(archive.xff > 0.0 && archive.xff <= 1.0) {
                return Err(SchemaError::InvalidXff {
                    index,
                    xff: archive.xff,
                });
            }
            self.step
                .checked_mul(u64::from(archive.steps_per_row))
                .and_then(|row_step| row_step.checked_mul(u64::from(archive.row_count)))
                .ok_or(SchemaError::TooLarge)?;
            total_slots = u64::from(archive.row_count)
                .checked_mul(ds_count)
                .and_then(|slots| total_slots.checked_add(slots))
                .ok_or(SchemaError::TooLarge)?;
        }

        // Every slot is an f64 that must be addressable in memory and on disk.
        let total_bytes = total_slots.checked_mul(8).ok_or(SchemaError::TooLarge)?;
        if usize::try_from(total_bytes).is_err() || total_bytes > i64::MAX as u64 {
            return Err(SchemaError::TooLarge);
        }

        Ok(())
    }

    /// Returns the position of the named data source.
    pub fn data_source_index(&self, name: &str) -> Option<usize> {
        self.data_sources.iter().position(|ds| ds.name == name)
    }
}
