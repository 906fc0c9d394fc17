//! Driftwatch launcher
//!
//! Wires together the logger, a pipeline, and the file monitor, then runs
//! the monitor until interrupted.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use driftwatch::monitor::{Catalog, FileMonitor};
use driftwatch::pipeline::{CommandPipeline, LogPipeline, Pipeline};
use driftwatch::{MonitorConfig, TracingSink};
use driftwatch_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "driftwatch", about = "Polling file monitor feeding a processing pipeline")]
struct Cli {
    /// Enable verbose logging (debug level to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch a directory and process files until interrupted
    Run {
        /// Path to a TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Root of the watched directory tree (overrides the config file)
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Seconds between scan cycles
        #[arg(long)]
        interval: Option<u64>,

        /// Concurrency bound for dispatch workers
        #[arg(long)]
        max_workers: Option<usize>,

        /// Max attempts before a file is permanently failed
        #[arg(long)]
        retry_limit: Option<u32>,

        /// Keep the catalog in memory only (no snapshot on disk)
        #[arg(long)]
        memory_only: bool,
    },
    /// Run exactly one scan-then-dispatch cycle and exit
    Scan {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        base_dir: Option<PathBuf>,

        #[arg(long)]
        max_workers: Option<usize>,

        #[arg(long)]
        retry_limit: Option<u32>,

        #[arg(long)]
        memory_only: bool,
    },
    /// Print catalog state counts and permanently failed files
    Status {
        #[arg(long)]
        config: Option<PathBuf>,

        /// Catalog snapshot to inspect (overrides the config file)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(LogConfig {
        app_name: "driftwatch",
        verbose: cli.verbose,
    }) {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Run {
            config,
            base_dir,
            interval,
            max_workers,
            retry_limit,
            memory_only,
        } => run(
            load_config(config, base_dir)
                .map(|mut c| {
                    apply_overrides(&mut c, interval, max_workers, retry_limit, memory_only);
                    c
                }),
        ),
        Commands::Scan {
            config,
            base_dir,
            max_workers,
            retry_limit,
            memory_only,
        } => scan_once(load_config(config, base_dir).map(|mut c| {
            apply_overrides(&mut c, None, max_workers, retry_limit, memory_only);
            c
        })),
        Commands::Status { config, catalog } => status(config, catalog),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(config: Option<PathBuf>, base_dir: Option<PathBuf>) -> Result<MonitorConfig> {
    let mut loaded = match &config {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let base = base_dir
                .clone()
                .context("Either --config or --base-dir is required")?;
            MonitorConfig::new(base)
        }
    };
    if let Some(base) = base_dir {
        loaded.base_dir = base;
    }
    Ok(loaded)
}

fn apply_overrides(
    config: &mut MonitorConfig,
    interval: Option<u64>,
    max_workers: Option<usize>,
    retry_limit: Option<u32>,
    memory_only: bool,
) {
    if let Some(interval) = interval {
        config.interval_secs = interval;
    }
    if let Some(max_workers) = max_workers {
        config.max_workers = max_workers;
    }
    if let Some(retry_limit) = retry_limit {
        config.retry_limit = retry_limit;
    }
    if memory_only {
        config.memory_only = true;
    }
}

fn build_pipeline(config: &MonitorConfig) -> Result<Arc<dyn Pipeline>> {
    if config.pipeline_command.is_empty() {
        Ok(Arc::new(LogPipeline))
    } else {
        let pipeline = CommandPipeline::new(config.pipeline_command.clone())
            .context("Invalid pipeline_command")?;
        Ok(Arc::new(pipeline))
    }
}

fn run(config: Result<MonitorConfig>) -> Result<()> {
    let config = config?;
    let pipeline = build_pipeline(&config)?;
    let monitor = FileMonitor::new(config, pipeline, Arc::new(TracingSink))
        .context("Failed to start monitor")?;
    let handle = monitor.start();

    let (interrupt_tx, interrupt_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })
    .context("Failed to install interrupt handler")?;

    interrupt_rx.recv().ok();
    info!("Interrupt received, shutting down");
    handle.stop().context("Shutdown did not complete cleanly")?;
    Ok(())
}

fn scan_once(config: Result<MonitorConfig>) -> Result<()> {
    let config = config?;
    let pipeline = build_pipeline(&config)?;
    let monitor = FileMonitor::new(config, pipeline, Arc::new(TracingSink))
        .context("Failed to start monitor")?;
    let report = monitor.run_cycle().context("Cycle failed")?;

    println!(
        "scanned {} files ({} new, {} changed, {} retried, {} deleted)",
        report.scan.files_seen,
        report.scan.files_new,
        report.scan.files_changed,
        report.scan.files_retried,
        report.scan.files_deleted,
    );
    println!(
        "dispatched {} candidates: {} processed, {} failed",
        report.candidates, report.dispatch.processed, report.dispatch.failed,
    );
    Ok(())
}

/// Resolve which snapshot to inspect and the retry limit to classify it
/// with. A config file supplies both; `--catalog` overrides only the path.
fn status_target(
    config: Option<PathBuf>,
    catalog: Option<PathBuf>,
) -> Result<(PathBuf, u32)> {
    let base = match &config {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => MonitorConfig::new("."),
    };
    let retry_limit = base.retry_limit;
    let catalog_path = catalog.unwrap_or(base.catalog_path);
    Ok((catalog_path, retry_limit))
}

fn status(config: Option<PathBuf>, catalog: Option<PathBuf>) -> Result<()> {
    let (catalog_path, retry_limit) = status_target(config, catalog)?;

    let catalog = Catalog::load(&catalog_path, retry_limit)
        .with_context(|| format!("Failed to load catalog from {}", catalog_path.display()))?;
    let stats = catalog.stats();

    println!("catalog: {}", catalog_path.display());
    println!("  total:      {}", stats.total);
    println!("  discovered: {}", stats.discovered);
    println!("  processed:  {}", stats.processed);
    println!("  failed:     {}", stats.failed);
    println!("  deleted:    {}", stats.deleted);

    let failed = catalog.permanently_failed();
    if !failed.is_empty() {
        println!("permanently failed ({}):", failed.len());
        for record in failed {
            println!(
                "  {} after {} attempts: {}",
                record.path,
                record.attempt_count,
                record.last_error.as_deref().unwrap_or("unknown error"),
            );
        }
    }
    Ok(())
}
