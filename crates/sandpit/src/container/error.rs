//! Container runtime error types.

use thiserror::Error;

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors that can occur during container operations.
///
/// A nonzero exit status from an exec'd command is not an error; these
/// variants only describe infrastructure failures and rejected input.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Container was not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Container exists but is not running.
    #[error("container is not running: {0}")]
    NotRunning(String),

    /// A container with the requested name already exists.
    #[error("container already exists: {0}")]
    AlreadyExists(String),

    /// Image was not found.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// The engine API returned an error or could not be reached.
    #[error("container engine error: {0}")]
    Engine(String),

    /// The exec did not finish within its wall-clock budget.
    #[error("command timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A file primitive received a path outside the workspace rules.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The target of a file primitive does not exist.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// A file primitive's helper command failed inside the container.
    #[error("file operation failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i64, stderr: String },

    /// Output exceeded the configured capture limit.
    #[error("output exceeds the {limit} byte limit")]
    OutputTooLarge { limit: usize },

    /// Failed to parse helper command output.
    #[error("failed to parse container output: {0}")]
    ParseError(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ContainerError {
    /// Whether the error was caused by the caller rather than the engine.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ContainerError::InvalidPath(_)
                | ContainerError::InvalidInput(_)
                | ContainerError::FileNotFound(_)
                | ContainerError::OutputTooLarge { .. }
        )
    }
}

impl From<bollard::errors::Error> for ContainerError {
    fn from(err: bollard::errors::Error) -> Self {
        ContainerError::Engine(err.to_string())
    }
}
