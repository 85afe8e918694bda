//! Error types for archipelago

use thiserror::Error;

use crate::providers::ProviderError;
use crate::providers::local::LocalPathError;

/// Result type alias for crate-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for crate-level operations
#[derive(Error, Debug)]
pub enum Error {
    /// Indexer error
    #[error("indexer error: {0}")]
    Indexer(#[from] crate::indexer::Error),

    /// Provider error
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Local source path is unusable
    #[error("{0}")]
    LocalPath(#[from] LocalPathError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Whether this wraps a cancelled subprocess.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Indexer(e) if e.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::Config("missing field".to_string());
        assert_eq!(err.to_string(), "configuration error: missing field");
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ invalid }").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_error_from_yaml() {
        let yaml_err = serde_yaml::from_str::<Vec<String>>("key: value").unwrap_err();
        let err: Error = yaml_err.into();
        assert!(matches!(err, Error::Yaml(_)));
    }

    #[test]
    fn test_local_path_error_message_is_kept() {
        let err: Error = LocalPathError::NotFound {
            path: PathBuf::from("/config/nonexistent"),
            base: PathBuf::from("/config"),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "The local repository path '/config/nonexistent' referenced in /config does not exist"
        );
    }

    #[test]
    fn test_is_cancelled() {
        let err: Error = crate::indexer::Error::Cancelled {
            command: "git fetch".to_string(),
        }
        .into();
        assert!(err.is_cancelled());
        assert!(!Error::Config("x".to_string()).is_cancelled());
    }
}
