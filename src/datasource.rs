//! Data sources and their pending primary-interval state.

use crate::schema::{DataSourceKind, DataSourceSpec};

/// Accumulated, not yet consolidated input of one data source.
///
/// Covers the unfinished primary interval that ends at the next step boundary
/// after the database's last update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PendingState {
    /// Previous raw input, NaN when unknown.
    pub last_raw: f64,
    /// Rate times seconds over the known part of the interval.
    pub value: f64,
    /// Seconds of the interval whose rate is unknown.
    pub unknown_secs: u64,
}

impl PendingState {
    /// State of a freshly created database.
    ///
    /// The part of the first primary interval before `start` is unknown.
    pub fn initial(start: u64, step: u64) -> Self {
        Self {
            last_raw: f64::NAN,
            value: 0.0,
            unknown_secs: start % step,
        }
    }
}

/// One named input channel of a database.
#[derive(Debug, Clone)]
pub struct DataSource {
    pub(crate) spec: DataSourceSpec,
    pub(crate) pending: PendingState,
}

impl DataSource {
    pub(crate) fn new(spec: DataSourceSpec, start: u64, step: u64) -> Self {
        Self {
            spec,
            pending: PendingState::initial(start, step),
        }
    }

    /// Returns the data source name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Returns the rate conversion kind.
    pub fn kind(&self) -> DataSourceKind {
        self.spec.kind
    }

    /// Returns the heartbeat in seconds.
    pub fn heartbeat(&self) -> u64 {
        self.spec.heartbeat
    }

    /// Returns the creation spec.
    pub fn spec(&self) -> &DataSourceSpec {
        &self.spec
    }

    /// Returns the last raw input, if it was known.
    pub fn last_raw(&self) -> Option<f64> {
        let raw = self.pending.last_raw;
        (!raw.is_nan()).then_some(raw)
    }

    /// Converts a raw input into a per-second rate over `elapsed` seconds.
    ///
    /// Returns NaN when the rate is unknown. The raw input always becomes the
    /// new previous value, even when the rate itself is rejected.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn to_rate(&mut self, raw: f64, elapsed: u64) -> f64 {
        let raw = if raw.is_finite() { raw } else { f64::NAN };
        let previous = std::mem::replace(&mut self.pending.last_raw, raw);

        if raw.is_nan() || elapsed > self.spec.heartbeat {
            return f64::NAN;
        }

        let secs = elapsed as f64;
        let rate = match self.spec.kind {
            DataSourceKind::Gauge => raw,
            DataSourceKind::Counter => {
                let delta = raw - previous;
                // Wraparound or reset; never report a negative counter rate.
                if previous.is_nan() || delta < 0.0 {
                    f64::NAN
                } else {
                    delta / secs
                }
            }
            DataSourceKind::Derive => (raw - previous) / secs,
            DataSourceKind::Absolute => raw / secs,
        };

        let below = self.spec.min.is_some_and(|min| rate < min);
        let above = self.spec.max.is_some_and(|max| rate > max);
        if rate.is_nan() || below || above {
            f64::NAN
        } else {
            rate
        }
    }

    /// Adds `secs` seconds at `rate` to the pending interval.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn accumulate(&mut self, rate: f64, secs: u64) {
        if secs == 0 {
            return;
        }
        if rate.is_nan() {
            self.pending.unknown_secs += secs;
        } else {
            self.pending.value += rate * secs as f64;
        }
    }

    /// Closes the pending interval and returns its primary value.
    ///
    /// The interval is unknown when none of its seconds are known or when the
    /// unknown part exceeds the heartbeat.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn close_primary(&mut self, step: u64) -> f64 {
        let unknown = self.pending.unknown_secs;
        let known = step.saturating_sub(unknown);
        let primary = if known == 0 || unknown > self.spec.heartbeat {
            f64::NAN
        } else {
            self.pending.value / known as f64
        };

        self.pending.value = 0.0;
        self.pending.unknown_secs = 0;
        primary
    }
}
