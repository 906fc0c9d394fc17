//! End-to-end monitor behavior over a real temporary directory tree.

use driftwatch::monitor::FileMonitor;
use driftwatch::pipeline::{FileRef, Pipeline, PipelineError};
use driftwatch::{FileState, MemorySink, MonitorConfig, MonitorEvent};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// Pipeline that records every call and fails paths containing a marker.
#[derive(Default)]
struct RecordingPipeline {
    fail_if_contains: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl RecordingPipeline {
    fn succeeding() -> Self {
        Self::default()
    }

    fn failing_on(marker: &str) -> Self {
        Self {
            fail_if_contains: Some(marker.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_for(&self, marker: &str) -> usize {
        self.calls().iter().filter(|p| p.contains(marker)).count()
    }
}

impl Pipeline for RecordingPipeline {
    fn process(&self, file: &FileRef) -> Result<(), PipelineError> {
        let path = file.path.to_string_lossy().into_owned();
        self.calls.lock().unwrap().push(path.clone());
        if let Some(marker) = &self.fail_if_contains {
            if path.contains(marker.as_str()) {
                return Err(PipelineError::Process(format!("cannot ingest {path}")));
            }
        }
        Ok(())
    }
}

fn test_config(dir: &TempDir) -> MonitorConfig {
    let mut config = MonitorConfig::new(dir.path());
    config.memory_only = true;
    config.interval_secs = 3600;
    config.shutdown_grace_secs = 5;
    config
}

fn write_file(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn files_present_before_start_all_reach_processed() {
    let dir = TempDir::new().unwrap();
    for i in 0..5 {
        write_file(dir.path(), &format!("seed/file{i}.csv"), "x,y\n1,2");
    }

    let pipeline = Arc::new(RecordingPipeline::succeeding());
    let monitor = FileMonitor::new(
        test_config(&dir),
        pipeline.clone(),
        Arc::new(MemorySink::new()),
    )
    .unwrap();

    let report = monitor.run_cycle().unwrap();
    assert_eq!(report.candidates, 5);
    assert_eq!(report.dispatch.processed, 5);
    assert_eq!(monitor.catalog_stats().processed, 5);
    assert_eq!(pipeline.calls().len(), 5);
}

#[test]
fn two_files_processed_with_two_success_events() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "a.txt", "alpha");
    write_file(dir.path(), "b.txt", "beta");

    let events = Arc::new(MemorySink::new());
    let monitor = FileMonitor::new(
        test_config(&dir),
        Arc::new(RecordingPipeline::succeeding()),
        events.clone(),
    )
    .unwrap();
    monitor.run_cycle().unwrap();

    let successes: Vec<String> = events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            MonitorEvent::FileProcessed { path, .. } => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(successes.len(), 2);
    assert!(successes.iter().any(|p| p.ends_with("a.txt")));
    assert!(successes.iter().any(|p| p.ends_with("b.txt")));
    assert_eq!(monitor.catalog_stats().processed, 2);
}

#[test]
fn failing_file_exhausts_retry_limit_then_stops() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "c.txt", "gamma");

    let pipeline = Arc::new(RecordingPipeline::failing_on("c.txt"));
    let monitor = FileMonitor::new(
        test_config(&dir),
        pipeline.clone(),
        Arc::new(MemorySink::new()),
    )
    .unwrap();

    // retry_limit = 3: three cycles attempt it, later cycles must not
    for _ in 0..5 {
        monitor.run_cycle().unwrap();
    }
    assert_eq!(pipeline.calls_for("c.txt"), 3);

    let catalog = monitor.catalog();
    let catalog = catalog.lock().unwrap();
    let failed = catalog.permanently_failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempt_count, 3);
    assert_eq!(failed[0].state, FileState::Failed);
    assert!(failed[0].last_error.as_deref().unwrap().contains("c.txt"));
}

#[test]
fn failure_on_one_file_does_not_block_another_in_same_cycle() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "bad.txt", "boom");
    write_file(dir.path(), "good.txt", "fine");

    let monitor = FileMonitor::new(
        test_config(&dir),
        Arc::new(RecordingPipeline::failing_on("bad.txt")),
        Arc::new(MemorySink::new()),
    )
    .unwrap();
    let report = monitor.run_cycle().unwrap();

    assert_eq!(report.dispatch.processed, 1);
    assert_eq!(report.dispatch.failed, 1);
    let stats = monitor.catalog_stats();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 1);
}

#[test]
fn rewrite_triggers_exactly_one_more_attempt_touch_triggers_none() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "doc.txt", "version one");

    let pipeline = Arc::new(RecordingPipeline::succeeding());
    let monitor = FileMonitor::new(
        test_config(&dir),
        pipeline.clone(),
        Arc::new(MemorySink::new()),
    )
    .unwrap();

    monitor.run_cycle().unwrap();
    assert_eq!(pipeline.calls_for("doc.txt"), 1);

    // Touch only: mtime moves, content does not
    filetime::set_file_mtime(
        dir.path().join("doc.txt"),
        filetime::FileTime::from_unix_time(2_000_000_000, 0),
    )
    .unwrap();
    monitor.run_cycle().unwrap();
    assert_eq!(pipeline.calls_for("doc.txt"), 1);

    // Rewrite: content changes
    write_file(dir.path(), "doc.txt", "version two");
    monitor.run_cycle().unwrap();
    assert_eq!(pipeline.calls_for("doc.txt"), 2);

    // And it settles again
    monitor.run_cycle().unwrap();
    assert_eq!(pipeline.calls_for("doc.txt"), 2);
}

#[test]
fn no_overlapping_processing_windows_for_one_path() {
    /// Fails the test's invariant counter if two processing windows for the
    /// same path ever overlap.
    struct OverlapDetector {
        active: Mutex<HashSet<String>>,
        overlaps: AtomicUsize,
    }

    impl Pipeline for OverlapDetector {
        fn process(&self, file: &FileRef) -> Result<(), PipelineError> {
            let path = file.path.to_string_lossy().into_owned();
            if !self.active.lock().unwrap().insert(path.clone()) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(30));
            self.active.lock().unwrap().remove(&path);
            Ok(())
        }
    }

    let dir = TempDir::new().unwrap();
    for i in 0..4 {
        write_file(dir.path(), &format!("f{i}.txt"), "data");
    }

    let pipeline = Arc::new(OverlapDetector {
        active: Mutex::new(HashSet::new()),
        overlaps: AtomicUsize::new(0),
    });
    let mut config = test_config(&dir);
    config.interval_secs = 0; // cycle back-to-back
    config.max_workers = 4;

    let monitor =
        FileMonitor::new(config, pipeline.clone(), Arc::new(MemorySink::new())).unwrap();
    let handle = monitor.start();
    thread::sleep(Duration::from_millis(300));
    handle.stop().unwrap();

    assert_eq!(pipeline.overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn stop_during_slow_dispatch_leaves_nothing_processing() {
    struct SlowPipeline;
    impl Pipeline for SlowPipeline {
        fn process(&self, _file: &FileRef) -> Result<(), PipelineError> {
            thread::sleep(Duration::from_millis(150));
            Ok(())
        }
    }

    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "slow1.txt", "data");
    write_file(dir.path(), "slow2.txt", "data");

    let monitor = FileMonitor::new(
        test_config(&dir),
        Arc::new(SlowPipeline),
        Arc::new(MemorySink::new()),
    )
    .unwrap();
    let handle = monitor.start();
    let catalog = handle.catalog();

    thread::sleep(Duration::from_millis(50));
    handle.stop().unwrap();

    let stats = catalog.lock().unwrap().stats();
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.queued, 0);
}

#[test]
fn persisted_catalog_survives_restart_without_reprocessing() {
    let dir = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    write_file(dir.path(), "once.txt", "data");

    let mut config = test_config(&dir);
    config.memory_only = false;
    config.catalog_path = state_dir.path().join("catalog.json");

    let first_run = Arc::new(RecordingPipeline::succeeding());
    let monitor = FileMonitor::new(
        config.clone(),
        first_run.clone(),
        Arc::new(MemorySink::new()),
    )
    .unwrap();
    monitor.run_cycle().unwrap();
    assert_eq!(first_run.calls().len(), 1);
    drop(monitor);

    // Second process start: snapshot says the file is already processed
    let second_run = Arc::new(RecordingPipeline::succeeding());
    let monitor = FileMonitor::new(
        config,
        second_run.clone(),
        Arc::new(MemorySink::new()),
    )
    .unwrap();
    monitor.run_cycle().unwrap();
    assert_eq!(second_run.calls().len(), 0);
    assert_eq!(monitor.catalog_stats().processed, 1);
}

#[test]
fn deleting_and_restoring_a_file_is_not_reprocessed_when_unchanged() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "blink.txt", "constant content");

    let pipeline = Arc::new(RecordingPipeline::succeeding());
    let monitor = FileMonitor::new(
        test_config(&dir),
        pipeline.clone(),
        Arc::new(MemorySink::new()),
    )
    .unwrap();

    monitor.run_cycle().unwrap();
    fs::remove_file(dir.path().join("blink.txt")).unwrap();
    monitor.run_cycle().unwrap();
    assert_eq!(monitor.catalog_stats().deleted, 1);

    write_file(dir.path(), "blink.txt", "constant content");
    monitor.run_cycle().unwrap();
    assert_eq!(monitor.catalog_stats().deleted, 0);
    // Same fingerprint as the processed version: no new attempt
    assert_eq!(pipeline.calls().len(), 1);
}
