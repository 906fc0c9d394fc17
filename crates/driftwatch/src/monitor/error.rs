//! Error types for the file monitor

use super::types::FileState;
use std::io;
use thiserror::Error;

/// Monitor error type
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] ignore::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Watched directory not found: {0}")]
    BaseDirNotFound(String),

    #[error("Unknown file: {0}")]
    UnknownFile(String),

    /// A catalog invariant violation. Indicates a logic bug in the caller,
    /// not a data problem; always logged at error level, never swallowed.
    #[error("Invalid state transition for {path}: {from} -> {to}")]
    InvalidTransition {
        path: String,
        from: FileState,
        to: FileState,
    },

    #[error("Catalog persistence error: {0}")]
    Persistence(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, MonitorError>;
