//! Error types for the builder

use kiln_core::{ConfigError, RecordError};
use kiln_engine::EngineError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for build operations
pub type Result<T> = std::result::Result<T, BuildError>;

/// Errors that abort a build or clean run
///
/// There is no retry and no rollback: images and containers created before
/// the failure stay in the engine until the next successful run or `clean`.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Invalid pipeline configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The container engine failed
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// An engine image could not be turned into an image record
    #[error("Image record error: {0}")]
    Record(#[from] RecordError),

    /// A command step exited with a non-zero status
    #[error("Command step {step} failed with exit status {exit_code}")]
    StepExecution { step: usize, exit_code: i64 },

    /// The archive for a copy step could not be built
    #[error("Failed to build archive for step {step}: {source}")]
    Archive {
        step: usize,
        #[source]
        source: std::io::Error,
    },

    /// A step exceeded the configured step timeout
    #[error("Step {step} timed out after {after:?}")]
    Timeout { step: usize, after: Duration },
}

impl BuildError {
    /// Process exit code to report for this error
    ///
    /// A failed command step reports the command's own status, everything
    /// else reports 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::StepExecution { exit_code, .. } => (*exit_code).clamp(1, 255) as i32,
            _ => 1,
        }
    }
}
