//! Structured monitor events
//!
//! The monitor reports its lifecycle through an injected [`EventSink`] rather
//! than a process-wide logger, so tests can capture exactly what was emitted.
//! The default sink forwards to `tracing`; a sink must never block
//! indefinitely, since it is called from the scan/dispatch hot path.

use crate::monitor::types::{CycleReport, UpsertOutcome};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Severity of a monitor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured event record.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// Scanner found a new or changed file, or requeued a failed one
    FileDiscovered { path: String, outcome: UpsertOutcome },
    /// Dispatcher handed a file to the pipeline
    DispatchStarted { path: String, attempt: u32 },
    /// Pipeline completed a file
    FileProcessed { path: String, attempt: u32 },
    /// Pipeline failed a file
    FileFailed {
        path: String,
        attempt: u32,
        error: String,
        /// Retry limit exhausted; no further attempts will be made
        permanent: bool,
    },
    /// One scan-then-dispatch pass finished
    CycleCompleted { report: CycleReport },
}

impl MonitorEvent {
    pub fn level(&self) -> EventLevel {
        match self {
            Self::FileDiscovered { .. } => EventLevel::Info,
            Self::DispatchStarted { .. } => EventLevel::Debug,
            Self::FileProcessed { .. } => EventLevel::Info,
            Self::FileFailed { permanent, .. } => {
                if *permanent {
                    EventLevel::Error
                } else {
                    EventLevel::Warn
                }
            }
            Self::CycleCompleted { .. } => EventLevel::Info,
        }
    }
}

/// Destination for monitor events. Implementations must be cheap and
/// non-blocking; anything slow belongs behind a channel.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MonitorEvent);
}

/// Default sink: forwards events to `tracing` with structured fields.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: MonitorEvent) {
        match event {
            MonitorEvent::FileDiscovered { path, outcome } => {
                info!(path = %path, outcome = outcome.as_str(), "File discovered");
            }
            MonitorEvent::DispatchStarted { path, attempt } => {
                debug!(path = %path, attempt, "Dispatching file to pipeline");
            }
            MonitorEvent::FileProcessed { path, attempt } => {
                info!(path = %path, attempt, "File processed");
            }
            MonitorEvent::FileFailed {
                path,
                attempt,
                error,
                permanent,
            } => {
                if permanent {
                    error!(path = %path, attempt, error = %error, "File failed permanently");
                } else {
                    warn!(path = %path, attempt, error = %error, "File failed, will retry");
                }
            }
            MonitorEvent::CycleCompleted { report } => {
                info!(
                    files_seen = report.scan.files_seen,
                    new = report.scan.files_new,
                    changed = report.scan.files_changed,
                    retried = report.scan.files_retried,
                    deleted = report.scan.files_deleted,
                    candidates = report.candidates,
                    processed = report.dispatch.processed,
                    failed = report.dispatch.failed,
                    scan_ms = report.scan.duration_ms,
                    "Cycle complete"
                );
            }
        }
    }
}

/// Captures events in memory. Used by tests to assert on emitted records.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<MonitorEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: MonitorEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
