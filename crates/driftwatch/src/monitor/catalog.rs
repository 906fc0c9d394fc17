//! File catalog: exclusive owner of every `FileRecord`
//!
//! All state flows through this type. The scanner creates and refreshes
//! records via `upsert`; the dispatcher moves them through the state machine
//! via the `mark_*` methods. Nothing else mutates records.
//!
//! The catalog is in-memory with an optional JSON snapshot on disk. Snapshot
//! writes are atomic (write to a temp file in the same directory, then
//! rename) so a crash mid-save never corrupts the previous snapshot.

use super::error::{MonitorError, Result};
use super::types::{CatalogStats, FileRecord, FileState, Fingerprint, UpsertOutcome};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Snapshot format version, bumped on incompatible layout changes.
const SNAPSHOT_VERSION: u32 = 1;

/// On-disk snapshot envelope.
#[derive(Debug, Serialize, Deserialize)]
struct CatalogSnapshot {
    version: u32,
    next_seq: u64,
    records: Vec<FileRecord>,
}

/// In-memory catalog of every file the monitor has ever seen.
#[derive(Debug)]
pub struct Catalog {
    records: HashMap<String, FileRecord>,
    next_seq: u64,
    retry_limit: u32,
}

impl Catalog {
    pub fn new(retry_limit: u32) -> Self {
        Self {
            records: HashMap::new(),
            next_seq: 0,
            retry_limit,
        }
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<FileRecord> {
        self.records.get(path).cloned()
    }

    /// Record a sighting of `path` with the given fingerprint.
    ///
    /// - Unseen path: inserted in `Discovered`.
    /// - Fingerprint changed: reset to `Discovered`, attempts and last error
    ///   cleared. Skipped while the record is in flight; the next scan after
    ///   the dispatch finishes will observe the difference and reset then.
    /// - Fingerprint unchanged but `Failed` with attempts remaining: back to
    ///   `Discovered` so the next dispatch retries it.
    /// - Otherwise: refreshes `last_seen_at` only.
    pub fn upsert(
        &mut self,
        path: &str,
        fingerprint: Fingerprint,
        size: u64,
        mtime_ms: i64,
    ) -> (FileRecord, UpsertOutcome) {
        let now = Utc::now();

        if let Some(record) = self.records.get_mut(path) {
            record.last_seen_at = now;
            record.deleted = false;

            let outcome = if record.fingerprint != fingerprint {
                if record.is_in_flight() {
                    UpsertOutcome::Unchanged
                } else {
                    record.fingerprint = fingerprint;
                    record.size = size;
                    record.mtime_ms = mtime_ms;
                    record.state = FileState::Discovered;
                    record.attempt_count = 0;
                    record.last_error = None;
                    UpsertOutcome::Changed
                }
            } else if record.state == FileState::Failed && record.attempt_count < self.retry_limit {
                record.state = FileState::Discovered;
                UpsertOutcome::Retry
            } else {
                UpsertOutcome::Unchanged
            };

            return (record.clone(), outcome);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let record = FileRecord::new(path.to_string(), fingerprint, size, mtime_ms, seq);
        self.records.insert(path.to_string(), record.clone());
        (record, UpsertOutcome::New)
    }

    /// All `Discovered` records, oldest discovery first (approximate FIFO).
    pub fn list_candidates(&self) -> Vec<FileRecord> {
        let mut candidates: Vec<FileRecord> = self
            .records
            .values()
            .filter(|r| r.state == FileState::Discovered && !r.deleted)
            .cloned()
            .collect();
        candidates.sort_by_key(|r| r.discovery_seq);
        candidates
    }

    pub fn mark_queued(&mut self, path: &str) -> Result<FileRecord> {
        self.transition(path, FileState::Queued, |state| {
            state == FileState::Discovered
        })
    }

    /// Claim a queued record for processing. This is the only transition
    /// that counts an attempt.
    pub fn mark_processing(&mut self, path: &str) -> Result<FileRecord> {
        self.transition(path, FileState::Processing, |state| {
            state == FileState::Queued
        })?;
        let record = self
            .records
            .get_mut(path)
            .ok_or_else(|| MonitorError::UnknownFile(path.to_string()))?;
        record.attempt_count += 1;
        Ok(record.clone())
    }

    pub fn mark_processed(&mut self, path: &str) -> Result<FileRecord> {
        self.transition(path, FileState::Processed, |state| {
            state == FileState::Processing
        })?;
        let record = self
            .records
            .get_mut(path)
            .ok_or_else(|| MonitorError::UnknownFile(path.to_string()))?;
        record.processed_at = Some(Utc::now());
        record.last_error = None;
        Ok(record.clone())
    }

    pub fn mark_failed(&mut self, path: &str, error: &str) -> Result<FileRecord> {
        self.transition(path, FileState::Failed, |state| {
            state == FileState::Processing
        })?;
        let record = self
            .records
            .get_mut(path)
            .ok_or_else(|| MonitorError::UnknownFile(path.to_string()))?;
        record.last_error = Some(error.to_string());
        Ok(record.clone())
    }

    fn transition(
        &mut self,
        path: &str,
        to: FileState,
        allowed_from: impl Fn(FileState) -> bool,
    ) -> Result<FileRecord> {
        let record = self
            .records
            .get_mut(path)
            .ok_or_else(|| MonitorError::UnknownFile(path.to_string()))?;

        if !allowed_from(record.state) {
            return Err(MonitorError::InvalidTransition {
                path: path.to_string(),
                from: record.state,
                to,
            });
        }

        record.state = to;
        Ok(record.clone())
    }

    /// Tombstone records whose paths were not seen by a completed scan.
    ///
    /// Only called after a walk with no errors: if a subtree was unreadable
    /// this pass, its files were not seen but are very likely still there.
    /// In-flight records are left alone.
    pub fn sweep_missing(&mut self, seen: &HashSet<String>) -> u64 {
        let mut swept = 0;
        for record in self.records.values_mut() {
            if !record.deleted && !record.is_in_flight() && !seen.contains(&record.path) {
                record.deleted = true;
                swept += 1;
            }
        }
        swept
    }

    /// Resolve anything a shutdown left in flight: `Processing` records are
    /// failed with the given reason, `Queued` records fall back to
    /// `Discovered` for the next run. After this, no record is in flight.
    pub fn resolve_in_flight(&mut self, reason: &str) -> (u64, u64) {
        let mut failed = 0;
        let mut requeued = 0;
        for record in self.records.values_mut() {
            match record.state {
                FileState::Processing => {
                    record.state = FileState::Failed;
                    record.last_error = Some(reason.to_string());
                    failed += 1;
                }
                FileState::Queued => {
                    record.state = FileState::Discovered;
                    requeued += 1;
                }
                _ => {}
            }
        }
        (failed, requeued)
    }

    pub fn stats(&self) -> CatalogStats {
        let mut stats = CatalogStats {
            total: self.records.len() as u64,
            ..Default::default()
        };
        for record in self.records.values() {
            if record.deleted {
                stats.deleted += 1;
            }
            match record.state {
                FileState::Discovered => stats.discovered += 1,
                FileState::Queued => stats.queued += 1,
                FileState::Processing => stats.processing += 1,
                FileState::Processed => stats.processed += 1,
                FileState::Failed => {
                    stats.failed += 1;
                    if record.attempt_count >= self.retry_limit {
                        stats.failed_permanently += 1;
                    }
                }
            }
        }
        stats
    }

    /// Failed records that exhausted the retry limit, for inspection.
    pub fn permanently_failed(&self) -> Vec<FileRecord> {
        let mut failed: Vec<FileRecord> = self
            .records
            .values()
            .filter(|r| r.state == FileState::Failed && r.attempt_count >= self.retry_limit)
            .cloned()
            .collect();
        failed.sort_by(|a, b| a.path.cmp(&b.path));
        failed
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Load a catalog snapshot from disk.
    ///
    /// Records a crash left in `Queued`/`Processing` are reset to
    /// `Discovered`, so an interrupted dispatch is redelivered rather than
    /// stuck. A missing file is an error; callers decide whether to start
    /// fresh instead.
    pub fn load(path: &Path, retry_limit: u32) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MonitorError::Persistence(format!("failed to read {}: {e}", path.display()))
        })?;
        let snapshot: CatalogSnapshot = serde_json::from_str(&content).map_err(|e| {
            MonitorError::Persistence(format!("failed to parse {}: {e}", path.display()))
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(MonitorError::Persistence(format!(
                "unsupported catalog snapshot version {} in {}",
                snapshot.version,
                path.display()
            )));
        }

        let mut records = HashMap::with_capacity(snapshot.records.len());
        let mut recovered = 0;
        for mut record in snapshot.records {
            if record.is_in_flight() {
                record.state = FileState::Discovered;
                recovered += 1;
            }
            records.insert(record.path.clone(), record);
        }
        if recovered > 0 {
            warn!(recovered, "Reset in-flight records from previous run to discovered");
        }
        info!(records = records.len(), path = %path.display(), "Loaded catalog snapshot");

        Ok(Self {
            records,
            next_seq: snapshot.next_seq,
            retry_limit,
        })
    }

    /// Save a snapshot atomically: write to a temp file next to the target,
    /// then rename over it.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(|e| {
                MonitorError::Persistence(format!("failed to create {}: {e}", dir.display()))
            })?;
        }

        let mut records: Vec<FileRecord> = self.records.values().cloned().collect();
        records.sort_by_key(|r| r.discovery_seq);
        let snapshot = CatalogSnapshot {
            version: SNAPSHOT_VERSION,
            next_seq: self.next_seq,
            records,
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let dir = parent.unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
            MonitorError::Persistence(format!("failed to create temp file in {}: {e}", dir.display()))
        })?;
        tmp.write_all(&json).map_err(|e| {
            MonitorError::Persistence(format!("failed to write snapshot: {e}"))
        })?;
        tmp.persist(path).map_err(|e| {
            MonitorError::Persistence(format!("failed to persist {}: {e}", path.display()))
        })?;
        Ok(())
    }
}
