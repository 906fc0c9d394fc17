//! Filesystem scanner with polling-based change detection
//!
//! Walks the watched tree, fingerprints every regular file, and records the
//! sighting in the catalog. Files that vanish between listing and
//! fingerprinting are transient (the next cycle re-evaluates them), not
//! errors. An unreadable subtree is logged and skipped; discovery elsewhere
//! continues.

use super::catalog::Catalog;
use super::error::{MonitorError, Result};
use super::types::{Fingerprint, ScanStats, UpsertOutcome};
use crate::events::{EventSink, MonitorEvent};
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Directory names excluded from the walk by default. These are caches and
/// VCS internals that churn constantly and are never ingestion inputs.
pub const DEFAULT_EXCLUDE_DIR_NAMES: &[&str] = &[".git", "node_modules", "__pycache__", ".cache"];

/// Scanner knobs, derived from `MonitorConfig`.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Hash file content up to this many bytes; larger files use (size, mtime)
    pub hash_max_bytes: u64,
    /// Whether to follow symlinks (off by default to avoid cycles)
    pub follow_symlinks: bool,
    /// Whether to include hidden files/directories
    pub include_hidden: bool,
    /// Directory names to skip entirely
    pub exclude_dir_names: Vec<String>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            hash_max_bytes: 4 * 1024 * 1024,
            follow_symlinks: false,
            include_hidden: true,
            exclude_dir_names: DEFAULT_EXCLUDE_DIR_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Filesystem scanner. Shares the catalog with the dispatcher; all mutation
/// goes through `Catalog::upsert`.
pub struct Scanner {
    catalog: Arc<Mutex<Catalog>>,
    events: Arc<dyn EventSink>,
    settings: ScanSettings,
}

impl Scanner {
    pub fn new(
        catalog: Arc<Mutex<Catalog>>,
        events: Arc<dyn EventSink>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            catalog,
            events,
            settings,
        }
    }

    /// Walk `base_dir` and record every regular file in the catalog.
    ///
    /// Cataloged files not seen by a clean walk (no errors) are tombstoned.
    /// After a walk with errors the sweep is skipped: files inside an
    /// unreadable subtree were not seen but are very likely still there.
    pub fn scan(&self, base_dir: &Path) -> Result<ScanStats> {
        let start = Instant::now();
        if !base_dir.is_dir() {
            return Err(MonitorError::BaseDirNotFound(
                base_dir.display().to_string(),
            ));
        }

        let mut stats = ScanStats::default();
        let mut seen: HashSet<String> = HashSet::new();

        let exclude_dir_names: Arc<[String]> =
            Arc::from(self.settings.exclude_dir_names.clone());
        let walker = WalkBuilder::new(base_dir)
            .hidden(!self.settings.include_hidden)
            .follow_links(self.settings.follow_symlinks)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .filter_entry(move |entry| {
                if !entry.file_type().map_or(false, |ft| ft.is_dir()) {
                    return true;
                }
                match entry.path().file_name() {
                    Some(name) => !exclude_dir_names
                        .iter()
                        .any(|excluded| name.to_string_lossy() == excluded.as_str()),
                    None => true,
                }
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    stats.errors += 1;
                    continue;
                }
            };

            if entry.path() == base_dir {
                continue;
            }
            if entry.file_type().map_or(false, |ft| ft.is_dir()) {
                stats.dirs_scanned += 1;
                continue;
            }
            // file_type() reflects the entry itself; metadata() would follow
            // the link and misreport symlinks as regular files
            if entry.file_type().map_or(true, |ft| !ft.is_file()) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    if vanished(&e) {
                        debug!(path = %entry.path().display(), "File vanished before stat");
                        stats.files_vanished += 1;
                    } else {
                        warn!(path = %entry.path().display(), error = %e, "Failed to stat file");
                        stats.errors += 1;
                    }
                    continue;
                }
            };

            let size = metadata.len();
            let mtime_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);

            let fingerprint = if size <= self.settings.hash_max_bytes {
                match hash_file(entry.path()) {
                    Ok(hash) => Fingerprint::Content { hash },
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        debug!(path = %entry.path().display(), "File vanished before hashing");
                        stats.files_vanished += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "Failed to hash file");
                        stats.errors += 1;
                        continue;
                    }
                }
            } else {
                Fingerprint::Metadata { size, mtime_ms }
            };

            let path = normalize_path(entry.path());
            stats.files_seen += 1;

            let (_, outcome) = self
                .lock_catalog()
                .upsert(&path, fingerprint, size, mtime_ms);
            match outcome {
                UpsertOutcome::New => stats.files_new += 1,
                UpsertOutcome::Changed => stats.files_changed += 1,
                UpsertOutcome::Retry => stats.files_retried += 1,
                UpsertOutcome::Unchanged => stats.files_unchanged += 1,
            }
            if outcome != UpsertOutcome::Unchanged {
                self.events
                    .emit(MonitorEvent::FileDiscovered { path: path.clone(), outcome });
            }
            seen.insert(path);
        }

        if stats.errors == 0 {
            stats.files_deleted = self.lock_catalog().sweep_missing(&seen);
        } else {
            warn!(
                errors = stats.errors,
                "Skipping deletion sweep after scan errors"
            );
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            dirs = stats.dirs_scanned,
            seen = stats.files_seen,
            new = stats.files_new,
            changed = stats.files_changed,
            retried = stats.files_retried,
            deleted = stats.files_deleted,
            vanished = stats.files_vanished,
            errors = stats.errors,
            duration_ms = stats.duration_ms,
            "Scan complete"
        );
        Ok(stats)
    }

    fn lock_catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Normalize to forward slashes so records compare equal across platforms.
fn normalize_path(path: &Path) -> String {
    use std::path::Component;

    let mut out = String::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push_str(&prefix.as_os_str().to_string_lossy()),
            Component::RootDir => out.push('/'),
            other => {
                if !out.is_empty() && !out.ends_with('/') {
                    out.push('/');
                }
                out.push_str(&other.as_os_str().to_string_lossy());
            }
        }
    }
    out
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn vanished(err: &ignore::Error) -> bool {
    err.io_error()
        .map_or(false, |io_err| io_err.kind() == io::ErrorKind::NotFound)
}
