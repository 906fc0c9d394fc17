//! Core types for the file monitor
//!
//! The monitor is the **File Discovery + Dispatch** layer.
//! It watches a directory tree, fingerprints files, and hands each one to the
//! pipeline. What the pipeline does with a file is opaque to this layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// File state machine
// ============================================================================

/// Processing state of a cataloged file.
///
/// States only move forward along
/// `Discovered -> Queued -> Processing -> {Processed | Failed}`.
/// A `Failed` record with attempts remaining re-enters `Discovered` through
/// `Catalog::upsert`, as does any record whose fingerprint changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    /// Seen by the scanner, eligible for dispatch
    Discovered,
    /// Claimed by a dispatch batch
    Queued,
    /// Handed to the pipeline, awaiting completion
    Processing,
    /// Pipeline completed successfully (terminal for this fingerprint)
    Processed,
    /// Pipeline failed; permanent once attempts are exhausted
    Failed,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "discovered" => Some(Self::Discovered),
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Fingerprints
// ============================================================================

/// Change-detection value for a file.
///
/// Small files are identified by a blake3 content hash so an in-place rewrite
/// is caught even when size and mtime are unchanged, and a bare `touch` does
/// not trigger reprocessing. Files above the configured hash ceiling fall
/// back to (size, mtime) to bound scan cost.
///
/// The two variants never compare equal, so switching strategies for a path
/// (e.g. a file growing past the ceiling) forces one reprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Fingerprint {
    /// Blake3 hash of the full content, hex encoded
    Content { hash: String },
    /// Size + mtime pair for files too large to hash every cycle
    Metadata { size: u64, mtime_ms: i64 },
}

// ============================================================================
// Catalog records
// ============================================================================

/// One entry per file path ever observed under the watched tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Absolute path, forward-slash normalized
    pub path: String,
    /// Fingerprint at last sighting
    pub fingerprint: Fingerprint,
    /// File size in bytes at last sighting
    pub size: u64,
    /// Last modification time (Unix timestamp milliseconds)
    pub mtime_ms: i64,
    /// Current state
    pub state: FileState,
    /// Processing attempts made for the current fingerprint
    pub attempt_count: u32,
    /// Last failure detail, if any
    pub last_error: Option<String>,
    /// Monotonic discovery order, used for FIFO candidate fairness
    pub discovery_seq: u64,
    /// No longer present on disk (tombstone; records are never removed)
    #[serde(default)]
    pub deleted: bool,
    /// When the path was first discovered
    pub first_seen_at: DateTime<Utc>,
    /// When the path was last seen by a scan
    pub last_seen_at: DateTime<Utc>,
    /// When the file was last processed successfully (if ever)
    pub processed_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn new(path: String, fingerprint: Fingerprint, size: u64, mtime_ms: i64, seq: u64) -> Self {
        let now = Utc::now();
        Self {
            path,
            fingerprint,
            size,
            mtime_ms,
            state: FileState::Discovered,
            attempt_count: 0,
            last_error: None,
            discovery_seq: seq,
            deleted: false,
            first_seen_at: now,
            last_seen_at: now,
            processed_at: None,
        }
    }

    /// True while the record is owned by a dispatch batch.
    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, FileState::Queued | FileState::Processing)
    }
}

/// Classification of what `Catalog::upsert` did with a sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First time this path was seen
    New,
    /// Fingerprint differs from the stored one; reset for reprocessing
    Changed,
    /// Unchanged but previously failed with attempts remaining; requeued
    Retry,
    /// Nothing to do
    Unchanged,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Changed => "changed",
            Self::Retry => "retry",
            Self::Unchanged => "unchanged",
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Statistics from one scan pass.
#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    /// Number of directories walked
    pub dirs_scanned: u64,
    /// Number of regular files seen
    pub files_seen: u64,
    /// Files seen for the first time
    pub files_new: u64,
    /// Files whose fingerprint changed
    pub files_changed: u64,
    /// Failed files requeued for another attempt
    pub files_retried: u64,
    /// Files with nothing to do
    pub files_unchanged: u64,
    /// Files that vanished between listing and fingerprinting
    pub files_vanished: u64,
    /// Cataloged files no longer present on disk (tombstoned this pass)
    pub files_deleted: u64,
    /// Walk/metadata errors (skipped subtrees count once per entry)
    pub errors: u64,
    /// Wall-clock duration of the pass
    pub duration_ms: u64,
}

/// Outcome of dispatching one candidate batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchReport {
    /// Candidates that reached `Processed`
    pub processed: u64,
    /// Candidates that reached `Failed`
    pub failed: u64,
    /// Candidates skipped because shutdown was requested
    pub skipped: u64,
}

/// One full scan-then-dispatch pass of the monitor loop.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub scan: ScanStats,
    /// Candidates handed to the dispatcher this cycle
    pub candidates: u64,
    pub dispatch: DispatchReport,
}

/// Per-state record counts, for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub total: u64,
    pub discovered: u64,
    pub queued: u64,
    pub processing: u64,
    pub processed: u64,
    pub failed: u64,
    /// Subset of `failed` that exhausted the retry limit
    pub failed_permanently: u64,
    pub deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_state_roundtrip() {
        for state in [
            FileState::Discovered,
            FileState::Queued,
            FileState::Processing,
            FileState::Processed,
            FileState::Failed,
        ] {
            assert_eq!(FileState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn test_file_state_parse_unknown() {
        assert!(FileState::parse("pending").is_none());
        assert!(FileState::parse("").is_none());
    }

    #[test]
    fn test_file_state_case_insensitive() {
        assert_eq!(FileState::parse("QUEUED"), Some(FileState::Queued));
        assert_eq!(FileState::parse("Processed"), Some(FileState::Processed));
    }

    #[test]
    fn test_fingerprint_variants_never_equal() {
        let content = Fingerprint::Content {
            hash: "abc".to_string(),
        };
        let meta = Fingerprint::Metadata {
            size: 3,
            mtime_ms: 1_000,
        };
        assert_ne!(content, meta);
    }

    #[test]
    fn test_record_serialization_roundtrip() {
        let record = FileRecord::new(
            "/data/a.csv".to_string(),
            Fingerprint::Metadata {
                size: 42,
                mtime_ms: 1_700_000_000_000,
            },
            42,
            1_700_000_000_000,
            7,
        );

        let json = serde_json::to_string(&record).unwrap();
        let parsed: FileRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.path, "/data/a.csv");
        assert_eq!(parsed.state, FileState::Discovered);
        assert_eq!(parsed.discovery_seq, 7);
        assert!(!parsed.deleted);
    }
}
