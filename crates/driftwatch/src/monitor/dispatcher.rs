//! Candidate dispatch
//!
//! Drains a batch of `Discovered` records and pushes each through
//! queued -> processing -> processed/failed, invoking the pipeline in
//! between. The pipeline call sits behind a panic boundary: any error or
//! panic it raises becomes a `mark_failed` transition, never a torn-down
//! cycle, and one candidate's failure does not stop the rest of the batch.
//!
//! At-most-one-in-flight per path holds because records enter a batch only
//! in `Discovered` state and are transitioned out of it before the pipeline
//! is handed control.

use super::catalog::Catalog;
use super::types::{DispatchReport, FileRecord};
use super::CancellationToken;
use crate::events::{EventSink, MonitorEvent};
use crate::pipeline::{FileRef, Pipeline, PipelineError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::error;

#[derive(Default)]
struct DispatchCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Hands candidates to the pipeline and finalizes their catalog state.
pub struct Dispatcher {
    catalog: Arc<Mutex<Catalog>>,
    pipeline: Arc<dyn Pipeline>,
    events: Arc<dyn EventSink>,
    max_workers: usize,
    retry_limit: u32,
}

impl Dispatcher {
    pub fn new(
        catalog: Arc<Mutex<Catalog>>,
        pipeline: Arc<dyn Pipeline>,
        events: Arc<dyn EventSink>,
        max_workers: usize,
    ) -> Self {
        let retry_limit = catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retry_limit();
        Self {
            catalog,
            pipeline,
            events,
            max_workers: max_workers.max(1),
            retry_limit,
        }
    }

    /// Dispatch a batch in the order supplied.
    ///
    /// With one worker, candidates run sequentially in discovery order. With
    /// more, ordering across candidates is not guaranteed; per-path ordering
    /// still is, because each path appears in the batch at most once.
    /// Cancellation is observed between candidates; in-flight candidates run
    /// to completion.
    pub fn dispatch(
        &self,
        candidates: Vec<FileRecord>,
        cancel: &CancellationToken,
    ) -> DispatchReport {
        let counters = DispatchCounters::default();
        if candidates.is_empty() {
            return DispatchReport::default();
        }

        let workers = self.max_workers.min(candidates.len());
        if workers == 1 {
            for candidate in candidates {
                self.dispatch_one(candidate, cancel, &counters);
            }
        } else {
            let (tx, rx) = mpsc::channel::<FileRecord>();
            for candidate in candidates {
                // Receiver outlives this loop, send cannot fail here
                let _ = tx.send(candidate);
            }
            drop(tx);

            let rx = Mutex::new(rx);
            thread::scope(|scope| {
                for _ in 0..workers {
                    scope.spawn(|| loop {
                        let next = {
                            let guard = rx.lock().unwrap_or_else(PoisonError::into_inner);
                            guard.recv()
                        };
                        match next {
                            Ok(candidate) => self.dispatch_one(candidate, cancel, &counters),
                            Err(_) => break,
                        }
                    });
                }
            });
        }

        DispatchReport {
            processed: counters.processed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
        }
    }

    fn dispatch_one(
        &self,
        candidate: FileRecord,
        cancel: &CancellationToken,
        counters: &DispatchCounters,
    ) {
        if cancel.is_cancelled() {
            // Left in Discovered; the next run picks it up
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let path = candidate.path.clone();
        if let Err(e) = self.lock_catalog().mark_queued(&path) {
            error!(path = %path, error = %e, "Failed to queue candidate");
            return;
        }
        let attempt = match self.lock_catalog().mark_processing(&path) {
            Ok(record) => record.attempt_count,
            Err(e) => {
                error!(path = %path, error = %e, "Failed to claim candidate");
                return;
            }
        };

        self.events.emit(MonitorEvent::DispatchStarted {
            path: path.clone(),
            attempt,
        });

        let file_ref = FileRef {
            path: PathBuf::from(&path),
            size: candidate.size,
            fingerprint: candidate.fingerprint.clone(),
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| self.pipeline.process(&file_ref)));

        match flatten(outcome) {
            Ok(()) => {
                if let Err(e) = self.lock_catalog().mark_processed(&path) {
                    error!(path = %path, error = %e, "Failed to finalize processed file");
                    return;
                }
                self.events
                    .emit(MonitorEvent::FileProcessed { path, attempt });
                counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(detail) => {
                if let Err(e) = self.lock_catalog().mark_failed(&path, &detail) {
                    error!(path = %path, error = %e, "Failed to finalize failed file");
                    return;
                }
                self.events.emit(MonitorEvent::FileFailed {
                    path,
                    attempt,
                    error: detail,
                    permanent: attempt >= self.retry_limit,
                });
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn lock_catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Collapse pipeline result and panic boundary into one failure description.
fn flatten(
    outcome: std::thread::Result<Result<(), PipelineError>>,
) -> Result<(), String> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("pipeline panicked: {detail}"))
        }
    }
}
