//! Error types for sync and indexing

use thiserror::Error;

use crate::providers::ProviderError;

/// Result type alias for indexer operations
pub type Result<T> = std::result::Result<T, Error>;

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Comprehensive error type for sync and indexing operations
#[derive(Error, Debug)]
pub enum Error {
    /// Subprocess exited unsuccessfully
    #[error("{command} failed with {}: {stderr}", describe_exit(.code))]
    Process {
        /// Command line that was run.
        command: String,
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// Subprocess could not be started
    #[error("failed to launch {command}: {source}")]
    Spawn {
        /// Command line that was attempted.
        command: String,
        /// Launch failure.
        source: std::io::Error,
    },

    /// Subprocess was terminated because its cancellation token fired
    #[error("{command} was cancelled")]
    Cancelled {
        /// Command line that was running.
        command: String,
    },

    /// Git operation failed
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// Provider error
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Blocking task panicked or was aborted
    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Whether this is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Captured standard error, for process failures.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Process { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
