//! Bare mirror clones and fetches through the `git` command line.
//!
//! Clone and fetch run as subprocesses so they can be cancelled; config
//! writes and HEAD inspection go through `git2`.

use std::collections::BTreeMap;
use std::path::Path;

use git2::{ConfigLevel, ErrorCode, Repository as GitRepo};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::Result;
use super::process::{CommandOutput, run_command};
use crate::repository::RemoteRepository;

/// Refspec mirroring every remote branch onto a local branch of the same name.
pub const MIRROR_FETCH_REFSPEC: &str = "+refs/heads/*:refs/heads/*";

/// What a sync of a remote repository will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// No clone on disk yet.
    Clone,
    /// Clone present; fetch into it.
    Fetch,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clone => "clone",
            Self::Fetch => "fetch",
        }
    }

    /// Clone when `path` does not exist, fetch otherwise.
    pub fn plan(path: &Path) -> Self {
        if path.exists() {
            Self::Fetch
        } else {
            Self::Clone
        }
    }
}

/// Arguments for a bare clone carrying `repo`'s git config metadata.
pub fn clone_args(repo: &RemoteRepository) -> Vec<String> {
    let mut args = vec!["clone".to_string(), "--bare".to_string()];
    for (key, value) in &repo.git_config_metadata {
        args.push("--config".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(repo.clone_url.clone());
    args.push(repo.path.display().to_string());
    args
}

/// Arguments for a prune-and-progress fetch of `origin`.
pub fn fetch_args() -> Vec<String> {
    ["fetch", "origin", "--prune", "--progress"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Write `entries` into the repository-local config of the clone at `path`.
pub fn write_config(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
    let repo = GitRepo::open_bare(path)?;
    let mut config = repo.config()?.open_level(ConfigLevel::Local)?;
    for (key, value) in entries {
        config.set_str(key, value)?;
    }
    Ok(())
}

/// Commit id HEAD points at, `None` for an empty repository.
pub fn head_commit(path: &Path) -> Result<Option<String>> {
    let repo = GitRepo::open(path)?;
    let head = match repo.head() {
        Ok(head) => head,
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Some(head.peel_to_commit()?.id().to_string()))
}

/// Runs git for remote repositories.
#[derive(Debug, Clone)]
pub struct GitClient {
    program: String,
}

impl Default for GitClient {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitClient {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Clone on first sight, fetch afterwards.
    pub async fn sync(
        &self,
        repo: &RemoteRepository,
        cancel: Option<&CancellationToken>,
    ) -> Result<SyncAction> {
        let action = SyncAction::plan(&repo.path);
        match action {
            SyncAction::Clone => self.clone_repository(repo, cancel).await?,
            SyncAction::Fetch => self.fetch_repository(repo, cancel).await?,
        };
        Ok(action)
    }

    /// Bare-clone `repo` into its path, then enable full-branch fetches.
    ///
    /// A failed or cancelled clone leaves nothing behind at the path.
    pub async fn clone_repository(
        &self,
        repo: &RemoteRepository,
        cancel: Option<&CancellationToken>,
    ) -> Result<CommandOutput> {
        info!("Cloning {} to {:?}", repo.id, repo.path);

        if let Some(parent) = repo.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let result = self.clone_and_configure(repo, cancel).await;
        if result.is_err() {
            remove_partial(&repo.path).await;
        } else {
            info!("Successfully cloned {}", repo.id);
        }
        result
    }

    async fn clone_and_configure(
        &self,
        repo: &RemoteRepository,
        cancel: Option<&CancellationToken>,
    ) -> Result<CommandOutput> {
        let output = run_command(&self.program, &clone_args(repo), None, cancel).await?;

        let path = repo.path.clone();
        let refspec = BTreeMap::from([(
            "remote.origin.fetch".to_string(),
            MIRROR_FETCH_REFSPEC.to_string(),
        )]);
        tokio::task::spawn_blocking(move || write_config(&path, &refspec)).await??;

        Ok(output)
    }

    /// Refresh `repo`'s metadata in its config, then fetch from origin.
    pub async fn fetch_repository(
        &self,
        repo: &RemoteRepository,
        cancel: Option<&CancellationToken>,
    ) -> Result<CommandOutput> {
        info!("Fetching {}", repo.id);

        let path = repo.path.clone();
        let metadata = repo.git_config_metadata.clone();
        tokio::task::spawn_blocking(move || write_config(&path, &metadata)).await??;

        run_command(&self.program, &fetch_args(), Some(&repo.path), cancel).await
    }
}

async fn remove_partial(path: &Path) {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_dir_all(path).await {
            warn!("Failed to remove partial clone {:?}: {}", path, e);
        }
    }
}
