//! Range reads: archive selection, uniform-step tables and fleet averaging.

use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::FetchError;
use crate::schema::ConsolidationFn;

/// Chooses which archive a fetch reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSelector {
    /// Required consolidation function.
    pub consolidation: ConsolidationFn,
    /// Preferred row step in seconds; the finest archive at least this coarse wins.
    #[serde(default)]
    pub resolution: Option<u64>,
}

impl ArchiveSelector {
    /// Selects the finest archive with this consolidation function.
    pub fn new(consolidation: ConsolidationFn) -> Self {
        Self {
            consolidation,
            resolution: None,
        }
    }

    /// Sets the preferred row step.
    #[must_use]
    pub fn with_resolution(mut self, seconds: u64) -> Self {
        self.resolution = Some(seconds);
        self
    }
}

impl From<ConsolidationFn> for ArchiveSelector {
    fn from(consolidation: ConsolidationFn) -> Self {
        Self::new(consolidation)
    }
}

/// A uniform-step table of archive rows.
///
/// Row `i` is stamped `start + i * step` and covers `(t - step, t]`. Values are
/// stored row-major, one per data source; unknown values are NaN.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchTable {
    step: u64,
    start: u64,
    names: Vec<String>,
    values: Vec<f64>,
}

/// One row of a [`FetchTable`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Row<'a> {
    /// End boundary of the row.
    pub timestamp: u64,
    /// One value per data source, NaN when unknown.
    pub values: &'a [f64],
}

impl FetchTable {
    /// Row step in seconds.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Timestamp of the first row.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Timestamp of the last row, if any.
    pub fn end(&self) -> Option<u64> {
        self.row_count()
            .checked_sub(1)
            .map(|last| self.timestamp(last))
    }

    /// Data source names, one per column.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.values.len() / self.names.len().max(1)
    }

    /// Returns true if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Timestamp of row `index`.
    pub fn timestamp(&self, index: usize) -> u64 {
        self.start + index as u64 * self.step
    }

    /// Timestamps of all rows.
    pub fn timestamps(&self) -> Vec<u64> {
        (0..self.row_count()).map(|i| self.timestamp(i)).collect()
    }

    /// Value of column `column` in row `row`.
    pub fn value(&self, row: usize, column: usize) -> Option<f64> {
        if column >= self.names.len() {
            return None;
        }
        self.values.get(row * self.names.len() + column).copied()
    }

    /// Returns row `index`.
    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        let width = self.names.len();
        let base = index.checked_mul(width)?;
        let values = self.values.get(base..base + width)?;
        Some(Row {
            timestamp: self.timestamp(index),
            values,
        })
    }

    /// Iterates over all rows in time order.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        (0..self.row_count()).filter_map(|i| self.row(i))
    }

    /// Copies the named column.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let column = self.names.iter().position(|n| n == name)?;
        Some(
            self.values
                .iter()
                .skip(column)
                .step_by(self.names.len())
                .copied()
                .collect(),
        )
    }

    /// Returns a copy with every unknown value replaced by `default`.
    ///
    /// Meant for display; the store itself never coerces unknown values.
    #[must_use]
    pub fn values_or(&self, default: f64) -> Self {
        let mut table = self.clone();
        for value in &mut table.values {
            if value.is_nan() {
                *value = default;
            }
        }
        table
    }

    fn row_index_of(&self, timestamp: u64) -> Option<usize> {
        if timestamp < self.start || (timestamp - self.start) % self.step != 0 {
            return None;
        }
        let index = usize::try_from((timestamp - self.start) / self.step).ok()?;
        (index < self.row_count()).then_some(index)
    }
}

impl Database {
    /// Picks the archive a fetch of `[start, end]` would read, if any.
    pub fn select_archive(
        &self,
        selector: ArchiveSelector,
        start: u64,
        end: u64,
    ) -> Option<usize> {
        let mut candidates: Vec<(usize, u64)> = self
            .archives_with(selector.consolidation)
            .filter(|(_, arc)| arc.covers(start, end))
            .map(|(index, arc)| (index, arc.row_step()))
            .collect();
        candidates.sort_by_key(|&(index, row_step)| (row_step, index));

        let preferred = selector.resolution.and_then(|resolution| {
            candidates
                .iter()
                .find(|&&(_, row_step)| row_step >= resolution)
        });
        preferred.or(candidates.first()).map(|&(index, _)| index)
    }

    /// Reads `[start, end]` from the best matching archive.
    ///
    /// The first row is the smallest row boundary at or after `start`; rows
    /// continue while they are at or before `end`. Rows that are not
    /// consolidated yet are unknown.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidRange`] if `start > end`, and
    /// [`FetchError::NoSuitableArchive`] if no archive with the requested
    /// consolidation function still retains `start`, or if `end` lies more
    /// than one retention span past the archive's newest row.
    pub fn fetch(
        &self,
        selector: ArchiveSelector,
        start: u64,
        end: u64,
    ) -> Result<FetchTable, FetchError> {
        if start > end {
            return Err(FetchError::InvalidRange { start, end });
        }

        let no_suitable = || FetchError::NoSuitableArchive {
            consolidation: selector.consolidation,
            start,
            end,
        };
        let archive = self
            .select_archive(selector, start, end)
            .map(|index| &self.archives[index])
            .ok_or_else(no_suitable)?;

        let row_step = archive.row_step();
        let first = archive.align_up(start).ok_or_else(no_suitable)?;
        let names = self.data_source_names();
        let mut values = Vec::new();

        let mut timestamp = first;
        while timestamp <= end {
            match archive.row_at(timestamp) {
                Some(row) => values.extend_from_slice(row),
                None => values.extend(std::iter::repeat_n(f64::NAN, names.len())),
            }
            timestamp = match timestamp.checked_add(row_step) {
                Some(next) => next,
                None => break,
            };
        }

        Ok(FetchTable {
            step: row_step,
            start: first,
            names,
            values,
        })
    }
}

/// Averages tables fetched from several databases with the same schema.
///
/// Only timestamps present in every table are kept. A value is unknown when it
/// is unknown in any member.
///
/// # Errors
///
/// [`FetchError::EmptyFleet`] when `tables` is empty, and
/// [`FetchError::SchemaMismatch`] when members differ in columns or row step.
#[allow(clippy::cast_precision_loss)]
pub fn fleet_average(tables: &[FetchTable]) -> Result<FetchTable, FetchError> {
    let (first, rest) = tables.split_first().ok_or(FetchError::EmptyFleet)?;

    for table in rest {
        if table.names != first.names {
            return Err(FetchError::SchemaMismatch(format!(
                "columns {:?} differ from {:?}",
                table.names, first.names
            )));
        }
        if table.step != first.step {
            return Err(FetchError::SchemaMismatch(format!(
                "row step {} differs from {}",
                table.step, first.step
            )));
        }
    }

    let width = first.names.len();
    let members = tables.len() as f64;
    let mut start = None;
    let mut values = Vec::new();

    for row in first.rows() {
        let indices: Option<Vec<usize>> = rest
            .iter()
            .map(|table| table.row_index_of(row.timestamp))
            .collect();
        let Some(indices) = indices else {
            continue;
        };

        start.get_or_insert(row.timestamp);
        for column in 0..width {
            let sum = row.values[column]
                + rest
                    .iter()
                    .zip(&indices)
                    .map(|(table, &index)| table.values[index * width + column])
                    .sum::<f64>();
            values.push(sum / members);
        }
    }

    Ok(FetchTable {
        step: first.step,
        start: start.unwrap_or(first.start),
        names: first.names.clone(),
        values,
    })
}
