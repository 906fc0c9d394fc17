//! Shared logging utilities for Driftwatch binaries.
//!
//! Sets up `tracing` with two outputs: a size-capped rotating log file under
//! the Driftwatch home directory, and stderr for the operator. Rotation
//! renames the live file to a timestamped archive and prunes the oldest
//! archives beyond a fixed count.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "driftwatch=info";
const MAX_ARCHIVED_LOGS: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by Driftwatch binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a rotating file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let writer = RotatingWriter::open(log_dir, config.app_name)
        .context("Failed to initialize rotating log writer")?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// The Driftwatch home directory: `~/.driftwatch`, or `DRIFTWATCH_HOME`.
pub fn driftwatch_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("DRIFTWATCH_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".driftwatch")
}

/// The logs directory: `~/.driftwatch/logs`.
pub fn logs_dir() -> PathBuf {
    driftwatch_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

struct WriterState {
    dir: PathBuf,
    base_name: String,
    max_size: u64,
    max_archives: usize,
    file: File,
    size: u64,
}

impl WriterState {
    fn open(dir: PathBuf, base_name: String, max_size: u64, max_archives: usize) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{base_name}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            dir,
            base_name,
            max_size,
            max_archives,
            file,
            size,
        })
    }

    fn live_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base_name))
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let mut archive = self.dir.join(format!("{}-{stamp}.log", self.base_name));
        let mut n = 1;
        while archive.exists() {
            archive = self
                .dir
                .join(format!("{}-{stamp}.{n}.log", self.base_name));
            n += 1;
        }
        fs::rename(self.live_path(), &archive)?;
        self.prune_archives()?;

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.live_path())?;
        self.size = 0;
        Ok(())
    }

    fn prune_archives(&self) -> io::Result<()> {
        let prefix = format!("{}-", self.base_name);
        let mut archives: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with(&prefix) && n.ends_with(".log"))
            })
            .collect();
        // Timestamped names sort chronologically
        archives.sort();
        while archives.len() > self.max_archives {
            let oldest = archives.remove(0);
            fs::remove_file(oldest)?;
        }
        Ok(())
    }
}

impl Write for WriterState {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let written = self.file.write(buf)?;
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Rotating log writer shared across tracing's worker threads.
#[derive(Clone)]
pub struct RotatingWriter {
    state: Arc<Mutex<WriterState>>,
}

impl RotatingWriter {
    pub fn open(dir: impl Into<PathBuf>, app_name: &str) -> Result<Self> {
        Self::with_limits(dir, app_name, MAX_LOG_FILE_SIZE, MAX_ARCHIVED_LOGS)
    }

    fn with_limits(
        dir: impl Into<PathBuf>,
        app_name: &str,
        max_size: u64,
        max_archives: usize,
    ) -> Result<Self> {
        let base_name = sanitize_name(app_name);
        let state = WriterState::open(dir.into(), base_name, max_size, max_archives)
            .with_context(|| format!("Failed to open log file for {app_name}"))?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }
}

pub struct RotatingWriterGuard {
    state: Arc<Mutex<WriterState>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriterGuard {
            state: Arc::clone(&self.state),
        }
    }
}

impl Write for RotatingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
