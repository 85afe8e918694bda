//! Local filesystem connector.
//!
//! Validates a configured path and produces one local repository record.
//! No network or process calls.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::config::LocalSourceConfig;
use crate::repository::LocalRepository;

/// Configured local path cannot be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocalPathError {
    #[error("The local repository path '{}' referenced in {} does not exist", .path.display(), .base.display())]
    NotFound { path: PathBuf, base: PathBuf },

    #[error("The local repository path '{}' referenced in {} is not a directory", .path.display(), .base.display())]
    NotADirectory { path: PathBuf, base: PathBuf },
}

impl LocalPathError {
    /// The resolved path that failed validation.
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound { path, .. } | Self::NotADirectory { path, .. } => path,
        }
    }
}

/// Resolve `path` against `base` and collapse `.` and `..` lexically.
///
/// Symlinks are not followed, so the result names the path as configured.
pub fn resolve_path(path: &Path, base: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut resolved = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other.as_os_str()),
        }
    }

    if resolved.is_relative() {
        std::path::absolute(&resolved).unwrap_or(resolved)
    } else {
        resolved
    }
}

/// Produce the local repository described by `config`.
///
/// `base_dir` is the directory of the configuration file; relative paths
/// resolve against it.
pub fn local_repository(
    config: &LocalSourceConfig,
    base_dir: &Path,
) -> Result<LocalRepository, LocalPathError> {
    let path = resolve_path(Path::new(&config.path), base_dir);

    let metadata = std::fs::metadata(&path).map_err(|_| LocalPathError::NotFound {
        path: path.clone(),
        base: base_dir.to_path_buf(),
    })?;
    if !metadata.is_dir() {
        return Err(LocalPathError::NotADirectory {
            path,
            base: base_dir.to_path_buf(),
        });
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    debug!("Resolved local repository {} at {:?}", name, path);

    Ok(LocalRepository {
        id: path.display().to_string(),
        name,
        path,
        excluded_paths: config.exclude.paths.clone(),
        watch: config.watch,
        is_stale: false,
    })
}
