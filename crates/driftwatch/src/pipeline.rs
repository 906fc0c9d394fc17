//! Pipeline boundary
//!
//! The monitor treats processing as an opaque capability: something that
//! takes a file reference and either completes or fails. Everything behind
//! [`Pipeline::process`] is a distinct trust boundary; errors and panics
//! raised there are converted into catalog failures by the dispatcher and
//! never terminate a cycle.

use crate::monitor::types::Fingerprint;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

/// Processing failure detail, recorded on the file's catalog entry.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Process(String),

    #[error("pipeline configuration error: {0}")]
    Config(String),
}

/// Reference to one file handed to the pipeline.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub path: PathBuf,
    pub size: u64,
    pub fingerprint: Fingerprint,
}

/// A processing pipeline. Implementations may be slow and may fail; the
/// dispatcher awaits completion before finalizing catalog state.
pub trait Pipeline: Send + Sync {
    fn process(&self, file: &FileRef) -> Result<(), PipelineError>;
}

/// Pipeline that only records the hand-off. Default when no command is
/// configured; useful for dry runs and for exercising the monitor itself.
#[derive(Debug, Default)]
pub struct LogPipeline;

impl Pipeline for LogPipeline {
    fn process(&self, file: &FileRef) -> Result<(), PipelineError> {
        debug!(path = %file.path.display(), size = file.size, "Pipeline received file");
        Ok(())
    }
}

/// Pipeline that spawns a subprocess per file, appending the file path to a
/// configured argv. A non-zero exit status is a processing failure.
pub struct CommandPipeline {
    argv: Vec<String>,
}

impl CommandPipeline {
    pub fn new(argv: Vec<String>) -> Result<Self, PipelineError> {
        if argv.is_empty() {
            return Err(PipelineError::Config(
                "pipeline command must have at least a program name".to_string(),
            ));
        }
        Ok(Self { argv })
    }
}

impl Pipeline for CommandPipeline {
    fn process(&self, file: &FileRef) -> Result<(), PipelineError> {
        let status = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .arg(&file.path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    PipelineError::Config(format!(
                        "pipeline command '{}' not found; check pipeline_command in the config",
                        self.argv[0]
                    ))
                } else {
                    PipelineError::Io(e)
                }
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(PipelineError::Process(format!(
                "pipeline command exited with {status}"
            )))
        }
    }
}
