//! Multi-stage progress record for one reload attempt.
//!
//! A [`Report`] is written by the worker running the reload and read by
//! whoever requested it, often from another thread (a watch loop polling
//! for completion, for example). Progress flags are plain atomics; the
//! message log sits behind a single mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Severity of a report message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Error,
}

/// One line of the report log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub severity: Severity,
    pub message: String,
}

/// Thread-safe progress and diagnostics for a reload attempt.
///
/// Flags only move forward within an attempt:
/// scheduled → compiled → loaded → executed. `failed` is sticky until
/// [`Report::reset`] and never clears progress already made, so a failed
/// report still shows how far the attempt got.
#[derive(Debug, Default)]
pub struct Report {
    scheduled: AtomicBool,
    compiled: AtomicBool,
    loaded: AtomicBool,
    executed: AtomicBool,
    failed: AtomicBool,
    log: Mutex<Vec<ReportEntry>>,
}

impl Report {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_log(&self) -> MutexGuard<'_, Vec<ReportEntry>> {
        // Every critical section is a single push or clear, so a poisoned
        // log is still consistent.
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear all flags and messages.
    ///
    /// The log lock is held while the flags are cleared, so a reader that
    /// takes a snapshot never sees the cleared flags next to stale messages.
    pub fn reset(&self) {
        let mut log = self.lock_log();
        for flag in [
            &self.scheduled,
            &self.compiled,
            &self.loaded,
            &self.executed,
            &self.failed,
        ] {
            flag.store(false, Ordering::SeqCst);
        }
        log.clear();
    }

    /// Append an informational message.
    pub fn log_info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.lock_log().push(ReportEntry {
            severity: Severity::Info,
            message,
        });
    }

    /// Append an error message and mark the attempt as failed.
    pub fn log_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.lock_log().push(ReportEntry {
            severity: Severity::Error,
            message,
        });
        self.mark_failed();
    }

    pub fn mark_scheduled(&self) {
        self.scheduled.store(true, Ordering::SeqCst);
    }

    pub fn mark_compiled(&self) {
        self.compiled.store(true, Ordering::SeqCst);
    }

    pub fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::SeqCst);
    }

    pub fn mark_executed(&self) {
        self.executed.store(true, Ordering::SeqCst);
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn scheduled(&self) -> bool {
        self.scheduled.load(Ordering::SeqCst)
    }

    pub fn compiled(&self) -> bool {
        self.compiled.load(Ordering::SeqCst)
    }

    pub fn loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> bool {
        self.executed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// True iff every stage completed and nothing failed.
    pub fn succeeded(&self) -> bool {
        self.scheduled()
            && self.compiled()
            && self.loaded()
            && self.executed()
            && !self.failed()
    }

    /// Ordered copy of the message texts.
    pub fn messages(&self) -> Vec<String> {
        self.lock_log()
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    /// Ordered copy of the log including severities.
    pub fn entries(&self) -> Vec<ReportEntry> {
        self.lock_log().clone()
    }

    /// Consistent copy of flags and messages.
    pub fn snapshot(&self) -> ReportSnapshot {
        let log = self.lock_log();
        ReportSnapshot {
            scheduled: self.scheduled(),
            compiled: self.compiled(),
            loaded: self.loaded(),
            executed: self.executed(),
            failed: self.failed(),
            succeeded: self.succeeded(),
            messages: log.clone(),
        }
    }
}

/// Plain copy of a [`Report`], suitable for printing or serializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSnapshot {
    pub scheduled: bool,
    pub compiled: bool,
    pub loaded: bool,
    pub executed: bool,
    pub failed: bool,
    pub succeeded: bool,
    pub messages: Vec<ReportEntry>,
}
