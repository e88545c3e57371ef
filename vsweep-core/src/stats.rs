//! Shared cleanup statistics.
//!
//! Every pipeline stage reports into one [`CleanupStats`] aggregate. All
//! mutators take the internal lock, update, and return; no lock is ever
//! held across an await point. The aggregate is emitted once, at shutdown,
//! as a single structured log record.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

use crate::object::ObjectVersion;

// -----------------------------------------------------------------------------
// TimeRange
// -----------------------------------------------------------------------------

/// Observed `[lower, upper]` timestamp range. Absent values are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    lower: Option<DateTime<Utc>>,
    upper: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Widens the range to include `t`.
    pub fn update(&mut self, t: DateTime<Utc>) {
        if self.lower.is_none_or(|lower| t < lower) {
            self.lower = Some(t);
        }

        if self.upper.is_none_or(|upper| t > upper) {
            self.upper = Some(t);
        }
    }

    /// Widens the range to include `t` when present.
    pub fn update_opt(&mut self, t: Option<DateTime<Utc>>) {
        if let Some(t) = t {
            self.update(t);
        }
    }

    /// Earliest observed timestamp.
    #[must_use]
    pub const fn lower(&self) -> Option<DateTime<Utc>> {
        self.lower
    }

    /// Latest observed timestamp.
    #[must_use]
    pub const fn upper(&self) -> Option<DateTime<Utc>> {
        self.upper
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.lower, self.upper) {
            (Some(lower), Some(upper)) => write!(
                f,
                "{}..{}",
                lower.to_rfc3339_opts(SecondsFormat::Secs, true),
                upper.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            _ => f.write_str("none"),
        }
    }
}

// -----------------------------------------------------------------------------
// SizeStats
// -----------------------------------------------------------------------------

/// Cumulative byte count with a human-readable rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeStats(u64);

impl SizeStats {
    /// Adds `bytes` to the total.
    pub fn add(&mut self, bytes: u64) {
        self.0 = self.0.saturating_add(bytes);
    }

    /// Raw byte count.
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SizeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, format_bytes(self.0))
    }
}

/// Formats a byte count with binary prefixes, e.g. `12.1 KiB`.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = 0;

    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{value:.1} {}", UNITS[unit])
}

// -----------------------------------------------------------------------------
// CleanupStats
// -----------------------------------------------------------------------------

/// Counters, ranges and sizes accumulated across all pipeline stages.
#[derive(Debug, Default)]
pub struct CleanupStats {
    inner: Mutex<StatsSnapshot>,
}

/// A point-in-time copy of the aggregate, also used for emission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Records that failed retention annotation and were dropped.
    pub annotation_error_count: u64,

    /// Versions discovered by the enumerator (including tombstones).
    pub total_count: u64,
    /// Cumulative payload bytes discovered.
    pub total_size: SizeStats,
    /// Modification-time range of discovered versions.
    pub total_mod_time: TimeRange,
    /// Retention-expiry range of discovered versions.
    pub total_retain_until: TimeRange,

    /// Retention extensions performed (or logged, in dry-run).
    pub retention_success_count: u64,
    /// Retention extensions that failed.
    pub retention_error_count: u64,
    /// Modification-time range of extended versions.
    pub retention_mod_time: TimeRange,
    /// Pre-extension retention expiries of extended versions.
    pub retention_original: TimeRange,

    /// Versions handed to the deleter.
    pub delete_count: u64,
    /// Cumulative payload bytes handed to the deleter.
    pub delete_size: SizeStats,
    /// Modification-time range of deleted versions.
    pub delete_mod_time: TimeRange,
    /// Retention-expiry range of deleted versions.
    pub delete_retain_until: TimeRange,

    /// Per-item delete successes reported by the provider.
    pub delete_success_count: u64,
    /// Per-item delete failures reported by the provider, plus whole-batch
    /// transport failures.
    pub delete_error_count: u64,
}

impl CleanupStats {
    /// Creates an empty aggregate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a dropped record in the annotator.
    pub fn add_annotation_error(&self) {
        let mut inner = self.lock();
        inner.annotation_error_count += 1;
    }

    /// Records a version discovered by the enumerator.
    pub fn discovered(&self, v: &ObjectVersion) {
        let mut inner = self.lock();
        inner.total_count += 1;
        inner.total_size.add(v.size);
        inner.total_mod_time.update(v.last_modified);
        inner.total_retain_until.update_opt(v.retain_until);
    }

    /// Records a retention extension for `v`.
    pub fn add_retention(&self, v: &ObjectVersion) {
        let mut inner = self.lock();
        inner.retention_success_count += 1;
        inner.retention_mod_time.update(v.last_modified);
        inner.retention_original.update_opt(v.retain_until);
    }

    /// Records a failed retention extension.
    pub fn add_retention_error(&self) {
        let mut inner = self.lock();
        inner.retention_error_count += 1;
    }

    /// Records a version handed to the deleter.
    pub fn add_delete(&self, v: &ObjectVersion) {
        let mut inner = self.lock();
        inner.delete_count += 1;
        inner.delete_size.add(v.size);
        inner.delete_mod_time.update(v.last_modified);
        inner.delete_retain_until.update_opt(v.retain_until);
    }

    /// Records per-item outcomes of one delete batch.
    pub fn add_delete_results(&self, success_count: u64, error_count: u64) {
        if success_count == 0 && error_count == 0 {
            return;
        }

        let mut inner = self.lock();
        inner.delete_success_count += success_count;
        inner.delete_error_count += error_count;
    }

    /// Returns a copy of the current aggregate.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        self.lock().clone()
    }

    /// Emits the aggregate as one structured log record.
    pub fn log_summary(&self) {
        let s = self.snapshot();

        info!(
            total_count = s.total_count,
            total_size = %s.total_size,
            total_mod_time = %s.total_mod_time,
            total_retain_until = %s.total_retain_until,
            annotation_error_count = s.annotation_error_count,
            retention_success_count = s.retention_success_count,
            retention_error_count = s.retention_error_count,
            retention_mod_time = %s.retention_mod_time,
            retention_original = %s.retention_original,
            delete_count = s.delete_count,
            delete_size = %s.delete_size,
            delete_mod_time = %s.delete_mod_time,
            delete_retain_until = %s.delete_retain_until,
            delete_success_count = s.delete_success_count,
            delete_error_count = s.delete_error_count,
            "Statistics"
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatsSnapshot> {
        // A poisoned lock means a stage panicked while counting; the numbers
        // are still the best available report.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
