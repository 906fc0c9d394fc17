//! Monitor loop
//!
//! Drives repeating scan-then-dispatch cycles as an explicit state machine
//! (`Idle -> Scanning -> Dispatching -> Idle`, with `Stopping -> Stopped`
//! reachable from anywhere via the cancellation token). The loop is
//! single-steppable through [`FileMonitor::run_cycle`] so tests never need
//! wall-clock waits.
//!
//! An error in one cycle is logged and the loop continues; transient trouble
//! with one file or one pass must never stop future discovery.

use super::catalog::Catalog;
use super::dispatcher::Dispatcher;
use super::error::{MonitorError, Result};
use super::scanner::Scanner;
use super::types::{CatalogStats, CycleReport};
use super::CancellationToken;
use crate::config::MonitorConfig;
use crate::events::{EventSink, MonitorEvent};
use crate::pipeline::Pipeline;
use std::fmt;
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;
use tracing::{error, info, warn};

/// Lifecycle state of the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Scanning,
    Dispatching,
    Stopping,
    Stopped,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Dispatching => "dispatching",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    fn is_shutting_down(&self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The top-level monitor: ties scanner and dispatcher together on a cadence.
pub struct FileMonitor {
    config: MonitorConfig,
    catalog: Arc<Mutex<Catalog>>,
    scanner: Scanner,
    dispatcher: Dispatcher,
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
    state: Mutex<MonitorState>,
    // Woken by stop() so a long poll interval never delays shutdown
    wake: Arc<(Mutex<bool>, Condvar)>,
}

impl FileMonitor {
    /// Build a monitor. Fatal here: missing `base_dir`, or a catalog
    /// snapshot that exists but cannot be loaded (proceeding with unknown
    /// catalog state would reprocess or drop work).
    pub fn new(
        config: MonitorConfig,
        pipeline: Arc<dyn Pipeline>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        if !config.base_dir.is_dir() {
            return Err(MonitorError::BaseDirNotFound(
                config.base_dir.display().to_string(),
            ));
        }

        let catalog = if config.memory_only {
            Catalog::new(config.retry_limit)
        } else if config.catalog_path.exists() {
            Catalog::load(&config.catalog_path, config.retry_limit)?
        } else {
            Catalog::new(config.retry_limit)
        };
        let catalog = Arc::new(Mutex::new(catalog));

        let scanner = Scanner::new(catalog.clone(), events.clone(), config.scan_settings());
        let dispatcher = Dispatcher::new(
            catalog.clone(),
            pipeline,
            events.clone(),
            config.max_workers,
        );

        Ok(Self {
            config,
            catalog,
            scanner,
            dispatcher,
            events,
            cancel: CancellationToken::new(),
            state: Mutex::new(MonitorState::Idle),
            wake: Arc::new((Mutex::new(false), Condvar::new())),
        })
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn catalog(&self) -> Arc<Mutex<Catalog>> {
        self.catalog.clone()
    }

    pub fn catalog_stats(&self) -> CatalogStats {
        self.lock_catalog().stats()
    }

    /// One full scan-then-dispatch pass.
    pub fn run_cycle(&self) -> Result<CycleReport> {
        self.set_phase(MonitorState::Scanning);
        let scan = match self.scanner.scan(&self.config.base_dir) {
            Ok(stats) => stats,
            Err(e) => {
                self.set_phase(MonitorState::Idle);
                return Err(e);
            }
        };

        self.set_phase(MonitorState::Dispatching);
        let candidates = self.lock_catalog().list_candidates();
        let candidate_count = candidates.len() as u64;
        let dispatch = self.dispatcher.dispatch(candidates, &self.cancel);

        let report = CycleReport {
            scan,
            candidates: candidate_count,
            dispatch,
        };

        self.persist_catalog();
        self.set_phase(MonitorState::Idle);
        self.events.emit(MonitorEvent::CycleCompleted {
            report: report.clone(),
        });
        Ok(report)
    }

    /// Start the repeating cycle on a background thread.
    pub fn start(self) -> MonitorHandle {
        let monitor = Arc::new(self);
        let loop_monitor = monitor.clone();
        let (done_tx, done_rx) = mpsc::channel();
        let thread = thread::spawn(move || {
            loop_monitor.run_loop();
            let _ = done_tx.send(());
        });
        MonitorHandle {
            monitor,
            thread: Some(thread),
            done_rx,
        }
    }

    fn run_loop(&self) {
        info!(
            base_dir = %self.config.base_dir.display(),
            interval_secs = self.config.interval_secs,
            max_workers = self.config.max_workers,
            "Monitor started"
        );
        while !self.cancel.is_cancelled() {
            if let Err(e) = self.run_cycle() {
                error!(error = %e, "Cycle failed; continuing");
            }
            if self.cancel.is_cancelled() {
                break;
            }
            self.wait_for_next_cycle();
        }
    }

    /// Timed wait between cycles, woken early by `stop()`.
    fn wait_for_next_cycle(&self) {
        let (lock, cvar) = &*self.wake;
        let deadline = Instant::now() + self.config.interval();
        let mut woken = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*woken {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, timeout) = cvar
                .wait_timeout(woken, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            woken = guard;
            if timeout.timed_out() {
                break;
            }
        }
    }

    fn wake_loop(&self) {
        let (lock, cvar) = &*self.wake;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    fn persist_catalog(&self) {
        if self.config.memory_only {
            return;
        }
        // Fatal only at startup; mid-run the monitor keeps going in memory
        if let Err(e) = self.lock_catalog().save(&self.config.catalog_path) {
            error!(
                path = %self.config.catalog_path.display(),
                error = %e,
                "Failed to persist catalog; continuing in memory"
            );
        }
    }

    fn set_phase(&self, phase: MonitorState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.is_shutting_down() {
            *state = phase;
        }
    }

    fn set_state(&self, next: MonitorState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn lock_catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a started monitor. Dropping it without `stop()` leaves the
/// loop running for the life of the process.
pub struct MonitorHandle {
    monitor: Arc<FileMonitor>,
    thread: Option<thread::JoinHandle<()>>,
    done_rx: mpsc::Receiver<()>,
}

impl MonitorHandle {
    pub fn monitor(&self) -> &FileMonitor {
        &self.monitor
    }

    pub fn catalog(&self) -> Arc<Mutex<Catalog>> {
        self.monitor.catalog()
    }

    /// Cooperative shutdown: stop scheduling new cycles, let the in-flight
    /// batch drain up to the configured grace period, then fail anything
    /// still `Processing` so no record is left stuck there.
    pub fn stop(mut self) -> Result<()> {
        self.monitor.set_state(MonitorState::Stopping);
        self.monitor.cancel.cancel();
        self.monitor.wake_loop();

        match self.done_rx.recv_timeout(self.monitor.config.shutdown_grace()) {
            Ok(()) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
            }
            Err(_) => {
                // Detached worker may still finish later; its final catalog
                // transition will be rejected and logged as InvalidTransition
                warn!(
                    grace_secs = self.monitor.config.shutdown_grace_secs,
                    "Shutdown grace elapsed; abandoning in-flight dispatch"
                );
            }
        }

        let (failed, requeued) = self
            .monitor
            .lock_catalog()
            .resolve_in_flight("cancelled during shutdown");
        if failed > 0 || requeued > 0 {
            warn!(failed, requeued, "Resolved in-flight records at shutdown");
        }

        if !self.monitor.config.memory_only {
            self.monitor
                .lock_catalog()
                .save(&self.monitor.config.catalog_path)?;
        }

        self.monitor.set_state(MonitorState::Stopped);
        info!("Monitor stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::monitor::types::FileState;
    use crate::pipeline::{FileRef, LogPipeline, PipelineError};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> MonitorConfig {
        let mut config = MonitorConfig::new(dir.path());
        config.memory_only = true;
        config.interval_secs = 3600;
        config.shutdown_grace_secs = 5;
        config
    }

    fn new_monitor(config: MonitorConfig) -> FileMonitor {
        FileMonitor::new(config, Arc::new(LogPipeline), Arc::new(MemorySink::new())).unwrap()
    }

    #[test]
    fn test_missing_base_dir_is_fatal() {
        let mut config = MonitorConfig::new("/driftwatch-does-not-exist");
        config.memory_only = true;
        let result = FileMonitor::new(
            config,
            Arc::new(LogPipeline),
            Arc::new(MemorySink::new()),
        );
        assert!(matches!(result, Err(MonitorError::BaseDirNotFound(_))));
    }

    #[test]
    fn test_corrupt_snapshot_is_fatal_at_startup() {
        let dir = TempDir::new().unwrap();
        let snapshot = dir.path().join("catalog.json");
        fs::write(&snapshot, "{ not json").unwrap();

        let mut config = test_config(&dir);
        config.memory_only = false;
        config.catalog_path = snapshot;

        let result = FileMonitor::new(
            config,
            Arc::new(LogPipeline),
            Arc::new(MemorySink::new()),
        );
        assert!(matches!(result, Err(MonitorError::Persistence(_))));
    }

    #[test]
    fn test_run_cycle_processes_new_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "data").unwrap();

        let monitor = new_monitor(test_config(&dir));
        let report = monitor.run_cycle().unwrap();
        assert_eq!(report.candidates, 1);
        assert_eq!(report.dispatch.processed, 1);
        assert_eq!(monitor.state(), MonitorState::Idle);

        // Second cycle: nothing new
        let report = monitor.run_cycle().unwrap();
        assert_eq!(report.candidates, 0);
    }

    #[test]
    fn test_cycle_error_leaves_monitor_usable() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("watched");
        fs::create_dir(&base).unwrap();

        let mut config = MonitorConfig::new(&base);
        config.memory_only = true;
        let monitor = new_monitor(config);

        fs::remove_dir(&base).unwrap();
        assert!(monitor.run_cycle().is_err());
        assert_eq!(monitor.state(), MonitorState::Idle);

        fs::create_dir(&base).unwrap();
        fs::write(base.join("late.txt"), "data").unwrap();
        let report = monitor.run_cycle().unwrap();
        assert_eq!(report.dispatch.processed, 1);
    }

    #[test]
    fn test_stop_wakes_a_long_interval_immediately() {
        let dir = TempDir::new().unwrap();
        let handle = new_monitor(test_config(&dir)).start();

        let started = Instant::now();
        handle.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_leaves_no_record_processing() {
        struct SlowPipeline;
        impl crate::pipeline::Pipeline for SlowPipeline {
            fn process(&self, _file: &FileRef) -> std::result::Result<(), PipelineError> {
                thread::sleep(Duration::from_millis(200));
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("slow.txt"), "data").unwrap();

        let monitor = FileMonitor::new(
            test_config(&dir),
            Arc::new(SlowPipeline),
            Arc::new(MemorySink::new()),
        )
        .unwrap();
        let handle = monitor.start();
        let catalog = handle.catalog();

        // Let the cycle get into the slow dispatch
        thread::sleep(Duration::from_millis(50));
        handle.stop().unwrap();

        let stats = catalog.lock().unwrap().stats();
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.queued, 0);
    }
}
