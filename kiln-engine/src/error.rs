//! Error types for the engine facade

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur when talking to the container engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine binary could not be started
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine answered with a non-zero status
    #[error("'{command}' failed (status {status:?}): {stderr}")]
    CommandFailed {
        /// The command line, without the program
        command: String,
        /// Exit status, if the process exited normally
        status: Option<i32>,
        /// Trimmed standard error
        stderr: String,
    },

    /// Image or container does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Engine output could not be understood
    #[error("Failed to parse engine output: {0}")]
    ParseError(String),

    /// Stream I/O failed while talking to the engine
    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Build a command failure from a finished process
    pub fn command_failed(command: impl Into<String>, status: Option<i32>, stderr: &str) -> Self {
        Self::CommandFailed {
            command: command.into(),
            status,
            stderr: stderr.trim().to_string(),
        }
    }

    /// Check if this error means the image or container is already gone
    ///
    /// Docker answers "No such image"/"No such container", podman answers
    /// "image not known"/"no container with name or ID".
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::CommandFailed { stderr, .. } => is_not_found_message(stderr),
            _ => false,
        }
    }
}

/// Whether an engine error message reports a missing image or container
pub fn is_not_found_message(message: &str) -> bool {
    let message = message.to_lowercase();
    [
        "no such image",
        "no such container",
        "no such object",
        "image not known",
        "no container with name or id",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}
