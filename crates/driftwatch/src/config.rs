//! Configuration for the monitor

use crate::monitor::error::{MonitorError, Result};
use crate::monitor::scanner::{ScanSettings, DEFAULT_EXCLUDE_DIR_NAMES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Root of the watched directory tree
    pub base_dir: PathBuf,

    /// Seconds between scan cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Concurrency bound for dispatch workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Max processing attempts before a file is permanently failed
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Where the catalog snapshot lives
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// Skip catalog persistence entirely (degraded mode: every restart
    /// reprocesses from scratch)
    #[serde(default)]
    pub memory_only: bool,

    /// Hash file content up to this many bytes; larger files use (size, mtime)
    #[serde(default = "default_hash_max_bytes")]
    pub hash_max_bytes: u64,

    /// Whether to follow symlinks while walking
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Whether to include hidden files/directories
    #[serde(default = "default_include_hidden")]
    pub include_hidden: bool,

    /// Directory names to skip while walking
    #[serde(default = "default_exclude_dir_names")]
    pub exclude_dir_names: Vec<String>,

    /// Seconds to wait for in-flight work to drain on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// argv of the per-file pipeline command; empty means log-only pipeline
    #[serde(default)]
    pub pipeline_command: Vec<String>,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_max_workers() -> usize {
    1
}

fn default_retry_limit() -> u32 {
    3
}

fn default_catalog_path() -> PathBuf {
    driftwatch_logging::driftwatch_home().join("catalog.json")
}

fn default_hash_max_bytes() -> u64 {
    4 * 1024 * 1024
}

fn default_include_hidden() -> bool {
    true
}

fn default_exclude_dir_names() -> Vec<String> {
    DEFAULT_EXCLUDE_DIR_NAMES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl MonitorConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            interval_secs: default_interval_secs(),
            max_workers: default_max_workers(),
            retry_limit: default_retry_limit(),
            catalog_path: default_catalog_path(),
            memory_only: false,
            hash_max_bytes: default_hash_max_bytes(),
            follow_symlinks: false,
            include_hidden: default_include_hidden(),
            exclude_dir_names: default_exclude_dir_names(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            pipeline_command: Vec::new(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MonitorConfig =
            toml::from_str(&content).map_err(|e| MonitorError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| MonitorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            hash_max_bytes: self.hash_max_bytes,
            follow_symlinks: self.follow_symlinks,
            include_hidden: self.include_hidden,
            exclude_dir_names: self.exclude_dir_names.clone(),
        }
    }
}
