//! Run statistics shared by the Input and Output threads.
//!
//! Each counter or group is synchronised on its own, so a reader may see a
//! snapshot that mixes values from slightly different instants (for example
//! the lateness sum updated but not yet the lateness count). That is fine
//! for reporting.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Newest errors kept per list; older ones only count towards the totals.
pub const MAX_KEPT_ERRORS: usize = 100;

#[derive(Debug, Default, Clone, Copy)]
struct BehindStats {
    count: u64,
    significant: u64,
    max_ms: u64,
    sum_ms: u64,
}

#[derive(Debug, Default)]
struct ErrorLog {
    temporary: VecDeque<String>,
    permanent: VecDeque<String>,
    temporary_total: u64,
    permanent_total: u64,
}

/// Thread-safe accumulator for one pipeline run.
#[derive(Debug, Default)]
pub struct Feedback {
    read: AtomicU64,
    converted: AtomicU64,
    written: AtomicU64,
    interrupted: AtomicU64,
    dropped: AtomicU64,
    behind: Mutex<BehindStats>,
    errors: Mutex<ErrorLog>,
    started_at: Mutex<Option<DateTime<Local>>>,
    stopped_at: Mutex<Option<DateTime<Local>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Feedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset everything and stamp the start time.
    pub fn started(&self) {
        for counter in [
            &self.read,
            &self.converted,
            &self.written,
            &self.interrupted,
            &self.dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *lock(&self.behind) = BehindStats::default();
        *lock(&self.errors) = ErrorLog::default();
        *lock(&self.started_at) = Some(Local::now());
        *lock(&self.stopped_at) = None;
    }

    /// Stamp the stop time.
    pub fn stopped(&self) {
        *lock(&self.stopped_at) = Some(Local::now());
    }

    pub fn inc_read(&self) {
        self.read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_converted(&self, n: u64) {
        self.converted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_written(&self) {
        self.written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_interrupted(&self) {
        self.interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    /// Record one late dispatch.
    pub fn add_behind(&self, behind: Duration, significant: bool) {
        let ms = behind.as_millis() as u64;
        let mut stats = lock(&self.behind);
        stats.count += 1;
        stats.sum_ms += ms;
        stats.max_ms = stats.max_ms.max(ms);
        if significant {
            stats.significant += 1;
        }
    }

    pub fn add_temporary_error(&self, message: impl Into<String>) {
        let mut errors = lock(&self.errors);
        errors.temporary_total += 1;
        push_capped(&mut errors.temporary, message.into());
    }

    pub fn add_permanent_error(&self, message: impl Into<String>) {
        let mut errors = lock(&self.errors);
        errors.permanent_total += 1;
        push_capped(&mut errors.permanent, message.into());
    }

    pub fn read_count(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    pub fn written_count(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn interrupted_count(&self) -> u64 {
        self.interrupted.load(Ordering::Relaxed)
    }

    pub fn permanent_error_count(&self) -> u64 {
        lock(&self.errors).permanent_total
    }

    pub fn temporary_error_count(&self) -> u64 {
        lock(&self.errors).temporary_total
    }

    /// Average lateness in milliseconds (0 when nothing was late).
    pub fn average_behind_ms(&self) -> f64 {
        let stats = *lock(&self.behind);
        if stats.count == 0 {
            0.0
        } else {
            stats.sum_ms as f64 / stats.count as f64
        }
    }

    /// Copy of all counters and errors.
    pub fn snapshot(&self) -> FeedbackSnapshot {
        let behind = *lock(&self.behind);
        let errors = lock(&self.errors);
        FeedbackSnapshot {
            read: self.read.load(Ordering::Relaxed),
            converted: self.converted.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            behind_count: behind.count,
            behind_significant: behind.significant,
            behind_max_ms: behind.max_ms,
            behind_sum_ms: behind.sum_ms,
            temporary_error_count: errors.temporary_total,
            permanent_error_count: errors.permanent_total,
            temporary_errors: errors.temporary.iter().cloned().collect(),
            permanent_errors: errors.permanent.iter().cloned().collect(),
            started_at: *lock(&self.started_at),
            stopped_at: *lock(&self.stopped_at),
        }
    }
}

fn push_capped(list: &mut VecDeque<String>, message: String) {
    if list.len() == MAX_KEPT_ERRORS {
        list.pop_front();
    }
    list.push_back(message);
}

/// Frozen copy of a [`Feedback`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSnapshot {
    pub read: u64,
    pub converted: u64,
    pub written: u64,
    pub interrupted: u64,
    pub dropped: u64,
    pub behind_count: u64,
    pub behind_significant: u64,
    pub behind_max_ms: u64,
    pub behind_sum_ms: u64,
    pub temporary_error_count: u64,
    pub permanent_error_count: u64,
    pub temporary_errors: Vec<String>,
    pub permanent_errors: Vec<String>,
    pub started_at: Option<DateTime<Local>>,
    pub stopped_at: Option<DateTime<Local>>,
}

impl FeedbackSnapshot {
    pub fn average_behind_ms(&self) -> f64 {
        if self.behind_count == 0 {
            0.0
        } else {
            self.behind_sum_ms as f64 / self.behind_count as f64
        }
    }

    /// Wall-clock duration of the run, if it has both timestamps.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.stopped_at? - self.started_at?)
    }

    /// Key/value rows for tabular display.
    pub fn table(&self) -> Vec<(&'static str, String)> {
        let fmt_time = |t: &Option<DateTime<Local>>| {
            t.map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        vec![
            ("Started", fmt_time(&self.started_at)),
            ("Stopped", fmt_time(&self.stopped_at)),
            ("Records read", self.read.to_string()),
            ("Records converted", self.converted.to_string()),
            ("Records written", self.written.to_string()),
            ("Records dropped", self.dropped.to_string()),
            ("Interruptions", self.interrupted.to_string()),
            ("Late dispatches", self.behind_count.to_string()),
            ("Significantly late", self.behind_significant.to_string()),
            ("Average behind (ms)", format!("{:.1}", self.average_behind_ms())),
            ("Max behind (ms)", self.behind_max_ms.to_string()),
            ("Temporary errors", self.temporary_error_count.to_string()),
            ("Permanent errors", self.permanent_error_count.to_string()),
        ]
    }

    /// Multi-line human-readable summary.
    pub fn summary(&self) -> String {
        let rows = self.table();
        let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        let mut out = String::new();
        for (key, value) in rows {
            out.push_str(&format!("{:<width$}  {}\n", key, value, width = width));
        }
        for e in &self.permanent_errors {
            out.push_str(&format!("permanent: {}\n", e));
        }
        for e in &self.temporary_errors {
            out.push_str(&format!("temporary: {}\n", e));
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
