//! Invocation of the zoekt indexing binaries.
//!
//! Remote repositories go through `zoekt-git-index` with an explicit branch
//! list; local directories go through `zoekt-index` with a directory
//! exclusion list.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::Result;
use super::process::{CommandOutput, run_command};
use crate::config::Settings;
use crate::repository::{LocalRepository, RemoteRepository, Repository};

/// Directory names never indexed for local repositories.
pub const ALWAYS_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "bower_components",
    "vendor",
    "target",
    "dist",
    "build",
    "out",
];

/// Runs the indexing engine against one repository at a time.
#[derive(Debug, Clone)]
pub struct IndexInvoker {
    index_command: String,
    git_index_command: String,
    index_dir: PathBuf,
    max_file_size: u64,
}

impl IndexInvoker {
    pub fn new(
        index_command: impl Into<String>,
        git_index_command: impl Into<String>,
        index_dir: impl Into<PathBuf>,
        max_file_size: u64,
    ) -> Self {
        Self {
            index_command: index_command.into(),
            git_index_command: git_index_command.into(),
            index_dir: index_dir.into(),
            max_file_size,
        }
    }

    /// Invoker using the commands and limits from `settings`.
    pub fn from_settings(settings: &Settings, index_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            &settings.index_command,
            &settings.git_index_command,
            index_dir,
            settings.max_file_size,
        )
    }

    /// Directory shards are written to.
    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Arguments for indexing a bare clone: `HEAD`, branches, then tags.
    pub fn remote_args(&self, repo: &RemoteRepository) -> Vec<String> {
        vec![
            "-allow_missing_branches".to_string(),
            "-index".to_string(),
            self.index_dir.display().to_string(),
            "-file_limit".to_string(),
            self.max_file_size.to_string(),
            "-branches".to_string(),
            repo.index_revisions().join(","),
            repo.path.display().to_string(),
        ]
    }

    /// Arguments for indexing a local directory.
    ///
    /// The ignore list is the built-in set followed by the repository's own
    /// excluded paths, without repeats.
    pub fn local_args(&self, repo: &LocalRepository) -> Vec<String> {
        let mut ignored: Vec<&str> = ALWAYS_EXCLUDED_DIRS.to_vec();
        for path in &repo.excluded_paths {
            if !ignored.contains(&path.as_str()) {
                ignored.push(path);
            }
        }

        vec![
            "-index".to_string(),
            self.index_dir.display().to_string(),
            "-file_limit".to_string(),
            self.max_file_size.to_string(),
            "-ignore_dirs".to_string(),
            ignored.join(","),
            repo.path.display().to_string(),
        ]
    }

    /// Index `repo`, killing the indexer if `cancel` fires.
    pub async fn index(
        &self,
        repo: &Repository,
        cancel: Option<&CancellationToken>,
    ) -> Result<CommandOutput> {
        tokio::fs::create_dir_all(&self.index_dir).await?;

        info!("Indexing {}", repo.id());
        let output = match repo {
            Repository::Remote(remote) => {
                run_command(&self.git_index_command, &self.remote_args(remote), None, cancel)
                    .await?
            }
            Repository::Local(local) => {
                run_command(
                    &self.index_command,
                    &self.local_args(local),
                    Some(&local.path),
                    cancel,
                )
                .await?
            }
        };
        info!("Indexed {}", repo.id());

        Ok(output)
    }

    /// Remove every shard written for `repo`. Returns how many were deleted.
    pub async fn delete_shards(&self, repo: &Repository) -> Result<usize> {
        let prefix = shard_prefix(repo);

        let mut entries = match tokio::fs::read_dir(&self.index_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut deleted = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with(&prefix) && name.ends_with(".zoekt")) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!("Deleted shard {}", name);
                    deleted += 1;
                }
                Err(e) => warn!("Failed to delete shard {}: {}", name, e),
            }
        }
        Ok(deleted)
    }
}

/// Shard file name prefix: the escaped repository name followed by `_v`.
///
/// Remote shards are named after `zoekt.name` (the id); local shards after
/// the directory name.
pub fn shard_prefix(repo: &Repository) -> String {
    let name = match repo {
        Repository::Remote(r) => r.id.as_str(),
        Repository::Local(r) => r.name.as_str(),
    };
    format!("{}_v", urlencoding::encode(name))
}
