//! Fixed-capacity round-robin archives and primary-value consolidation.
//!
//! An archive stores `row_count` rows, each holding one value per data source.
//! Rows live in a single `Vec<f64>` addressed by a rolling cursor, so committing
//! a row past the end simply overwrites the oldest one. Unknown values are NaN.
//!
//! Row windows are aligned to absolute multiples of the archive's row step: a
//! row stamped `t` covers the primary values of `(t - row_step, t]`.

use crate::schema::{ArchiveSpec, ConsolidationFn};

/// Running reduction of the primary values seen in the open row window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Consolidator {
    /// Sum, min, max or last known value; NaN until a known value arrives.
    pub acc: f64,
    /// Unknown primary values in the window.
    pub unknown: u64,
}

impl Consolidator {
    pub fn new(unknown: u64) -> Self {
        Self {
            acc: f64::NAN,
            unknown,
        }
    }

    /// Folds `count` copies of `value` into the window.
    #[allow(clippy::cast_precision_loss)]
    fn accumulate(&mut self, function: ConsolidationFn, value: f64, count: u64) {
        if value.is_nan() {
            self.unknown += count;
            return;
        }
        self.acc = match function {
            ConsolidationFn::Average => {
                let sum = if self.acc.is_nan() { 0.0 } else { self.acc };
                sum + value * count as f64
            }
            // f64::min/max return the non-NaN operand.
            ConsolidationFn::Min => self.acc.min(value),
            ConsolidationFn::Max => self.acc.max(value),
            ConsolidationFn::Last => value,
        };
    }

    /// Produces the row value for a full window of `steps` primary values.
    #[allow(clippy::cast_precision_loss)]
    fn finish(&self, function: ConsolidationFn, steps: u64, xff: f64) -> f64 {
        let known = steps.saturating_sub(self.unknown);
        let unknown_fraction = self.unknown as f64 / steps as f64;
        if known == 0 || self.acc.is_nan() || unknown_fraction > xff {
            return f64::NAN;
        }
        match function {
            ConsolidationFn::Average => self.acc / known as f64,
            ConsolidationFn::Min | ConsolidationFn::Max | ConsolidationFn::Last => self.acc,
        }
    }
}

/// One round-robin archive of a database.
#[derive(Debug, Clone)]
pub struct Archive {
    pub(crate) spec: ArchiveSpec,
    pub(crate) row_step: u64,
    pub(crate) ds_count: usize,
    /// `row_count * ds_count` slots, row-major.
    pub(crate) rows: Vec<f64>,
    /// Index of the most recently committed row.
    pub(crate) cur_row: usize,
    /// End boundary of the most recently committed row.
    pub(crate) last_row_time: u64,
    /// Primary values already folded into the open window.
    pub(crate) pdps_in_window: u64,
    pub(crate) prep: Vec<Consolidator>,
}

impl Archive {
    /// Creates an archive whose rows are all unknown.
    ///
    /// Primary intervals of the open window that precede `start` count as unknown.
    pub(crate) fn new(spec: ArchiveSpec, ds_count: usize, step: u64, start: u64) -> Self {
        let row_step = spec.row_step(step);
        let first_pdp = start - start % step;
        let last_row_time = first_pdp - first_pdp % row_step;
        let pre_start = (first_pdp - last_row_time) / step;
        let row_count = spec.row_count as usize;

        Self {
            spec,
            row_step,
            ds_count,
            rows: vec![f64::NAN; row_count * ds_count],
            cur_row: 0,
            last_row_time,
            pdps_in_window: pre_start,
            prep: vec![Consolidator::new(pre_start); ds_count],
        }
    }

    /// Returns the creation spec.
    pub fn spec(&self) -> &ArchiveSpec {
        &self.spec
    }

    /// Returns the consolidation function.
    pub fn consolidation(&self) -> ConsolidationFn {
        self.spec.consolidation
    }

    /// Returns the ring capacity.
    pub fn row_count(&self) -> usize {
        self.spec.row_count as usize
    }

    /// Seconds covered by one row.
    pub fn row_step(&self) -> u64 {
        self.row_step
    }

    /// End boundary of the newest committed row.
    pub fn last_row_time(&self) -> u64 {
        self.last_row_time
    }

    /// End boundary of the oldest retained row.
    pub fn first_row_time(&self) -> u64 {
        let span = (self.row_count() as u64 - 1) * self.row_step;
        self.last_row_time.saturating_sub(span)
    }

    /// Total seconds of history this archive retains.
    pub fn retention(&self) -> u64 {
        self.row_step * self.row_count() as u64
    }

    /// Returns true if this archive can answer a fetch of `[start, end]`.
    ///
    /// The first row boundary at or after `start` must still be retained, and
    /// `end` may reach at most one retention span past the newest row.
    pub fn covers(&self, start: u64, end: u64) -> bool {
        let Some(first_row) = self.align_up(start) else {
            return false;
        };
        first_row >= self.first_row_time()
            && end <= self.last_row_time.saturating_add(self.retention())
    }

    /// Smallest row boundary at or after `timestamp`, if it fits in a `u64`.
    pub(crate) fn align_up(&self, timestamp: u64) -> Option<u64> {
        timestamp
            .div_ceil(self.row_step)
            .checked_mul(self.row_step)
    }

    /// Returns the slot index of the row ending at `timestamp`, if retained.
    pub(crate) fn row_index(&self, timestamp: u64) -> Option<usize> {
        if timestamp > self.last_row_time || timestamp % self.row_step != 0 {
            return None;
        }
        let back = (self.last_row_time - timestamp) / self.row_step;
        let row_count = self.row_count();
        if back >= row_count as u64 {
            return None;
        }
        Some((self.cur_row + row_count - back as usize) % row_count)
    }

    /// Returns the values of the row ending at `timestamp`.
    ///
    /// Rows that are not retained, or not yet committed, are `None`.
    pub fn row_at(&self, timestamp: u64) -> Option<&[f64]> {
        self.row_index(timestamp).map(|index| self.row(index))
    }

    pub(crate) fn row(&self, index: usize) -> &[f64] {
        let base = index * self.ds_count;
        &self.rows[base..base + self.ds_count]
    }

    /// Feeds `count` consecutive primary steps that all carry `values`.
    ///
    /// Committed ring slots are pushed onto `dirty`. When more full windows
    /// arrive than the ring holds, the ones that would be overwritten anyway
    /// are skipped, so the work is bounded by `row_count`.
    pub(crate) fn consume(&mut self, values: &[f64], count: u64, dirty: &mut Vec<usize>) -> u64 {
        debug_assert_eq!(values.len(), self.ds_count);
        let steps = u64::from(self.spec.steps_per_row);
        let row_count = self.row_count() as u64;
        let mut remaining = count;
        let mut committed = 0;

        while remaining > 0 {
            if self.pdps_in_window == 0 {
                let windows = remaining / steps;
                if windows > row_count {
                    let skipped = windows - row_count;
                    self.skip_rows(skipped);
                    remaining -= skipped * steps;
                    committed += skipped;
                }
            }

            let take = remaining.min(steps - self.pdps_in_window);
            let function = self.spec.consolidation;
            for (prep, &value) in self.prep.iter_mut().zip(values) {
                prep.accumulate(function, value, take);
            }
            self.pdps_in_window += take;
            remaining -= take;

            if self.pdps_in_window == steps {
                self.commit(dirty);
                committed += 1;
            }
        }

        committed
    }

    fn commit(&mut self, dirty: &mut Vec<usize>) {
        let steps = u64::from(self.spec.steps_per_row);
        let function = self.spec.consolidation;
        let xff = self.spec.xff;

        self.cur_row = (self.cur_row + 1) % self.row_count();
        let base = self.cur_row * self.ds_count;
        for (slot, prep) in self.rows[base..base + self.ds_count]
            .iter_mut()
            .zip(self.prep.iter_mut())
        {
            *slot = prep.finish(function, steps, xff);
            *prep = Consolidator::new(0);
        }

        self.pdps_in_window = 0;
        self.last_row_time += self.row_step;
        dirty.push(self.cur_row);
    }

    fn skip_rows(&mut self, rows: u64) {
        let row_count = self.row_count() as u64;
        self.cur_row = ((self.cur_row as u64 + rows % row_count) % row_count) as usize;
        self.last_row_time += rows * self.row_step;
    }
}
