//! Driftwatch - polling file monitor feeding a processing pipeline
//!
//! Watches a directory tree on a cadence, fingerprints what it finds, and
//! hands each new or changed file to a [`pipeline::Pipeline`] exactly once
//! per content version, retrying failures up to a bounded limit. State lives
//! in a [`monitor::Catalog`] that can be snapshotted to disk so a restart
//! does not reprocess finished work.

pub mod config;
pub mod events;
pub mod monitor;
pub mod pipeline;

pub use config::MonitorConfig;
pub use events::{EventLevel, EventSink, MemorySink, MonitorEvent, TracingSink};
pub use monitor::{
    Catalog, CatalogStats, CycleReport, DispatchReport, FileMonitor, FileRecord, FileState,
    Fingerprint, MonitorError, MonitorHandle, MonitorState, ScanStats, UpsertOutcome,
};
pub use pipeline::{CommandPipeline, FileRef, LogPipeline, Pipeline, PipelineError};
