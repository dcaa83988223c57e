//! Sample ingestion: rate conversion, primary-step interpolation and archive feeding.

use std::collections::HashMap;

use crate::database::Database;
use crate::error::AppendError;

/// Aligns `timestamp` down to a multiple of `step`.
///
/// # Example
///
/// ```
/// assert_eq!(manifold_rrd::normalize(1_609_459_261, 60), 1_609_459_260);
/// ```
pub fn normalize(timestamp: u64, step: u64) -> u64 {
    if step == 0 {
        timestamp
    } else {
        timestamp - timestamp % step
    }
}

/// Outcome of an accepted sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendReport {
    /// Primary step boundaries crossed by this sample.
    pub primary_steps: u64,
    /// Archive rows committed, summed over all archives.
    pub rows_committed: u64,
    /// Input names that are not part of the schema; they were ignored.
    pub unknown_sources: Vec<String>,
    /// Ring slots written, as `(archive, row)` pairs, sorted and unique.
    pub(crate) dirty_rows: Vec<(usize, usize)>,
}

impl Database {
    /// Applies one sample to every data source and archive.
    ///
    /// Data sources missing from `values` receive an unknown input; NaN is
    /// unknown as well. Names that are not in the schema are ignored and
    /// listed in [`AppendReport::unknown_sources`].
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::OutOfOrder`] when `timestamp` is not newer than
    /// [`Database::last_update`]; the database is left untouched.
    pub fn append(
        &mut self,
        timestamp: u64,
        values: &HashMap<String, f64>,
    ) -> Result<AppendReport, AppendError> {
        self.append_pairs(timestamp, values.iter().map(|(name, v)| (name.as_str(), *v)))
    }

    /// Like [`Database::append`], for any iterator of `(name, raw value)` pairs.
    pub fn append_pairs<'a, I>(
        &mut self,
        timestamp: u64,
        values: I,
    ) -> Result<AppendReport, AppendError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        if timestamp <= self.last_update {
            return Err(AppendError::OutOfOrder {
                timestamp,
                last_update: self.last_update,
            });
        }

        let mut report = AppendReport::default();
        let mut raw = vec![f64::NAN; self.data_sources.len()];
        for (name, value) in values {
            match self.data_source_index(name) {
                Some(index) => raw[index] = value,
                None => {
                    #[cfg(feature = "logging")]
                    log::warn!("ignoring unknown data source '{name}' at {timestamp}");
                    report.unknown_sources.push(name.to_string());
                }
            }
        }

        let elapsed = timestamp - self.last_update;
        let rates: Vec<f64> = self
            .data_sources
            .iter_mut()
            .zip(&raw)
            .map(|(ds, &value)| ds.to_rate(value, elapsed))
            .collect();

        let step = self.step;
        let interval_start = self.last_update - self.last_update % step;
        let last_boundary = timestamp - timestamp % step;

        if last_boundary <= self.last_update {
            for (ds, &rate) in self.data_sources.iter_mut().zip(&rates) {
                ds.accumulate(rate, elapsed);
            }
        } else {
            // Close the pending interval at the first boundary crossed.
            let first_boundary = interval_start + step;
            let head = first_boundary - self.last_update;
            let first: Vec<f64> = self
                .data_sources
                .iter_mut()
                .zip(&rates)
                .map(|(ds, &rate)| {
                    ds.accumulate(rate, head);
                    ds.close_primary(step)
                })
                .collect();
            self.feed_archives(&first, 1, &mut report);

            // Whole intervals inside the sample carry the new rate unchanged.
            let whole = (last_boundary - first_boundary) / step;
            if whole > 0 {
                self.feed_archives(&rates, whole, &mut report);
            }

            let tail = timestamp - last_boundary;
            for (ds, &rate) in self.data_sources.iter_mut().zip(&rates) {
                ds.accumulate(rate, tail);
            }
            report.primary_steps = 1 + whole;
        }

        self.last_update = timestamp;
        self.update_count += 1;
        report.dirty_rows.sort_unstable();
        report.dirty_rows.dedup();

        #[cfg(feature = "logging")]
        log::debug!(
            "applied sample at {timestamp}: {} primary steps, {} rows committed",
            report.primary_steps,
            report.rows_committed
        );

        Ok(report)
    }

    fn feed_archives(&mut self, values: &[f64], count: u64, report: &mut AppendReport) {
        let mut dirty = Vec::new();
        for (index, archive) in self.archives.iter_mut().enumerate() {
            dirty.clear();
            report.rows_committed += archive.consume(values, count, &mut dirty);
            report
                .dirty_rows
                .extend(dirty.iter().map(|&row| (index, row)));
        }
    }
}
