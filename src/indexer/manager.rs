//! Repository manager for syncing, indexing and state tracking

use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::repository::Repository;
use crate::telemetry::{Telemetry, events};

use super::error::{Error, Result};
use super::git::{GitClient, head_commit};
use super::state::{Reconciliation, RepositoryState, StateStore};
use super::zoekt::IndexInvoker;

/// What happened to one repository in a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Synced (remote) and indexed.
    Indexed,
    /// Stale; nothing ran.
    Skipped,
    /// Cancellation token fired mid-run.
    Cancelled,
}

/// Counts for a batch sync.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub indexed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub failed: usize,
}

/// Syncs and indexes repositories, bounded by a concurrency limit
pub struct RepositoryManager {
    git: GitClient,
    indexer: IndexInvoker,
    /// Semaphore for limiting concurrent sync+index runs
    semaphore: Semaphore,
    /// Persisted repository states
    store: RwLock<StateStore>,
    telemetry: Telemetry,
}

impl RepositoryManager {
    /// Create a new repository manager
    #[must_use]
    pub fn new(
        git: GitClient,
        indexer: IndexInvoker,
        store: StateStore,
        max_concurrent: usize,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            git,
            indexer,
            semaphore: Semaphore::new(max_concurrent.max(1)),
            store: RwLock::new(store),
            telemetry,
        }
    }

    /// Manager using the directories and settings from `config`.
    pub async fn from_config(config: &Config, telemetry: Telemetry) -> Result<Self> {
        let store = StateStore::load(config.state_path()).await?;
        Ok(Self::new(
            GitClient::default(),
            IndexInvoker::from_settings(&config.settings, config.index_dir()),
            store,
            config.settings.max_concurrent_syncs,
            telemetry,
        ))
    }

    /// Get the current state of a repository
    pub async fn get_state(&self, id: &str) -> Option<RepositoryState> {
        self.store.read().await.get(id).cloned()
    }

    /// List all tracked repository states
    pub async fn list_states(&self) -> Vec<RepositoryState> {
        self.store.read().await.iter().cloned().collect()
    }

    /// Record a complete discovery, marking vanished repositories stale.
    pub async fn reconcile(&self, discovered: &[Repository]) -> Result<Reconciliation> {
        let mut store = self.store.write().await;
        let outcome = store.reconcile(discovered);
        store.save().await?;
        Ok(outcome)
    }

    /// Record a partial discovery. Nothing is marked stale.
    pub async fn record(&self, discovered: &[Repository]) -> Result<Reconciliation> {
        let mut store = self.store.write().await;
        let outcome = store.record(discovered);
        store.save().await?;
        Ok(outcome)
    }

    /// Repositories due for sync and indexing under `interval`.
    pub async fn due(&self, interval: Duration) -> Vec<Repository> {
        self.store.read().await.due(interval, Utc::now())
    }

    /// Bring `repo` up to date on disk and index it.
    ///
    /// Stale repositories are skipped. A cancelled run records no error.
    pub async fn sync_and_index(
        &self,
        repo: &Repository,
        cancel: Option<&CancellationToken>,
    ) -> Result<SyncOutcome> {
        if repo.is_stale() {
            debug!("Skipping stale repository {}", repo.id());
            return Ok(SyncOutcome::Skipped);
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| Error::Task(e.to_string()))?;

        match self.run(repo, cancel).await {
            Ok(()) => Ok(SyncOutcome::Indexed),
            Err(e) if e.is_cancelled() => {
                debug!("Sync of {} cancelled", repo.id());
                Ok(SyncOutcome::Cancelled)
            }
            Err(e) => {
                error!("Failed to sync {}: {}", repo.id(), e);
                self.update(repo, |state| state.set_error(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    async fn run(&self, repo: &Repository, cancel: Option<&CancellationToken>) -> Result<()> {
        if let Repository::Remote(remote) = repo {
            let action = self.git.sync(remote, cancel).await?;

            let path = remote.path.clone();
            let commit = tokio::task::spawn_blocking(move || head_commit(&path)).await??;
            self.update(repo, |state| state.mark_synced(commit)).await;
            self.telemetry.capture(
                events::REPO_SYNCED,
                json!({ "vcs": "remote", "action": action.as_str() }),
            );
        }

        self.indexer.index(repo, cancel).await?;
        self.update(repo, RepositoryState::mark_indexed).await;
        self.telemetry
            .capture(events::REPO_INDEXED, json!({ "vcs": repo.vcs() }));
        Ok(())
    }

    /// Apply `f` to the stored state of `repo`. Untracked repositories,
    /// including ones deleted while the run was in flight, are left alone.
    async fn update(&self, repo: &Repository, f: impl FnOnce(&mut RepositoryState)) {
        let mut store = self.store.write().await;
        let Some(state) = store.get_mut(repo.id()) else {
            debug!("{} is no longer tracked; dropping state update", repo.id());
            return;
        };
        f(state);
        if let Err(e) = store.save().await {
            warn!("Failed to save state for {}: {}", repo.id(), e);
        }
    }

    /// Sync and index `repos` concurrently, up to the concurrency limit.
    pub async fn sync_all(&self, repos: &[Repository], cancel: &CancellationToken) -> SyncSummary {
        let results = join_all(
            repos
                .iter()
                .map(|repo| self.sync_and_index(repo, Some(cancel))),
        )
        .await;

        let mut summary = SyncSummary::default();
        for result in results {
            match result {
                Ok(SyncOutcome::Indexed) => summary.indexed += 1,
                Ok(SyncOutcome::Skipped) => summary.skipped += 1,
                Ok(SyncOutcome::Cancelled) => summary.cancelled += 1,
                Err(_) => summary.failed += 1,
            }
        }
        info!(
            "Sync pass finished: {} indexed, {} failed, {} skipped, {} cancelled",
            summary.indexed, summary.failed, summary.skipped, summary.cancelled
        );
        summary
    }

    /// Delete the artifacts of every repository discovery no longer returns,
    /// and forget it.
    ///
    /// Remote clones are removed along with their shards; local source
    /// directories are never touched.
    pub async fn delete_stale(&self) -> Result<usize> {
        let stale = self.store.read().await.missing();

        let mut deleted = 0;
        for repo in stale {
            if let Repository::Remote(remote) = &repo {
                if tokio::fs::try_exists(&remote.path).await? {
                    tokio::fs::remove_dir_all(&remote.path).await?;
                }
            }
            let shards = self.indexer.delete_shards(&repo).await?;

            self.store.write().await.remove(repo.id());
            info!("Removed stale {} ({} shard(s))", repo.id(), shards);
            self.telemetry
                .capture(events::REPO_DELETED, json!({ "vcs": repo.vcs() }));
            deleted += 1;
        }

        if deleted > 0 {
            self.store.read().await.save().await?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use git2::Repository as GitRepo;
    use tempfile::TempDir;

    use super::*;
    use crate::repository::fixtures::{local, remote};

    async fn create_manager(root: &Path, index_command: &str) -> RepositoryManager {
        let store = StateStore::load(root.join("state.json")).await.unwrap();
        RepositoryManager::new(
            GitClient::new("true"),
            IndexInvoker::new(index_command, index_command, root.join("index"), 1024),
            store,
            2,
            Telemetry::disabled(),
        )
    }

    #[tokio::test]
    async fn test_list_states_empty() {
        let temp_dir = TempDir::new().unwrap();
        let manager = create_manager(temp_dir.path(), "true").await;

        assert!(manager.list_states().await.is_empty());
        assert!(manager.get_state("github.com/org/repo").await.is_none());
    }

    #[tokio::test]
    async fn test_stale_repository_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let manager = create_manager(temp_dir.path(), "false").await;

        let mut repo: Repository = local(temp_dir.path()).into();
        repo.set_stale(true);

        let outcome = manager.sync_and_index(&repo, None).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped);
        assert!(manager.list_states().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_repository_indexed_and_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let manager = create_manager(temp_dir.path(), "true").await;
        let repo: Repository = local(temp_dir.path()).into();
        manager.reconcile(&[repo.clone()]).await.unwrap();

        let outcome = manager.sync_and_index(&repo, None).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Indexed);

        let state = manager.get_state(repo.id()).await.unwrap();
        assert!(state.last_indexed.is_some());
        assert!(state.last_synced.is_none());

        let reloaded = StateStore::load(temp_dir.path().join("state.json"))
            .await
            .unwrap();
        assert!(reloaded.get(repo.id()).unwrap().last_indexed.is_some());
        assert!(manager.due(Duration::from_secs(3600)).await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remote_repository_fetched_then_indexed() {
        let temp_dir = TempDir::new().unwrap();
        let manager = create_manager(temp_dir.path(), "true").await;

        let mut remote = remote("github.com/org/repo");
        remote.path = temp_dir.path().join("repos/github.com/org/repo.git");
        GitRepo::init_bare(&remote.path).unwrap();
        let repo: Repository = remote.into();
        manager.reconcile(&[repo.clone()]).await.unwrap();

        let outcome = manager.sync_and_index(&repo, None).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Indexed);

        let state = manager.get_state(repo.id()).await.unwrap();
        assert!(state.last_synced.is_some());
        assert!(state.last_indexed.is_some());
        assert!(state.last_commit.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_index_failure_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let manager = create_manager(temp_dir.path(), "false").await;
        let repo: Repository = local(temp_dir.path()).into();
        manager.reconcile(&[repo.clone()]).await.unwrap();

        assert!(manager.sync_and_index(&repo, None).await.is_err());

        let state = manager.get_state(repo.id()).await.unwrap();
        assert!(state.error.is_some());
        assert_eq!(manager.due(Duration::from_secs(3600)).await.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_run_records_no_error() {
        let temp_dir = TempDir::new().unwrap();
        let manager = create_manager(temp_dir.path(), "sleep").await;
        let repo: Repository = local(temp_dir.path()).into();
        manager.reconcile(&[repo.clone()]).await.unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let outcome = manager.sync_and_index(&repo, Some(&token)).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Cancelled);
        let state = manager.get_state(repo.id()).await.unwrap();
        assert!(state.error.is_none());
        assert!(state.last_indexed.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_untracked_repository_not_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let manager = create_manager(temp_dir.path(), "true").await;
        let repo: Repository = local(temp_dir.path()).into();

        let outcome = manager.sync_and_index(&repo, None).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Indexed);
        assert!(manager.list_states().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_removal_during_sync_is_not_undone() {
        let temp_dir = TempDir::new().unwrap();
        let manager = Arc::new(create_manager(temp_dir.path(), "true").await);
        let repo: Repository = local(temp_dir.path()).into();
        manager.reconcile(&[repo.clone()]).await.unwrap();

        // Hold the store so the run cannot record anything before the removal.
        let mut store = manager.store.write().await;
        let task = tokio::spawn({
            let manager = manager.clone();
            let repo = repo.clone();
            async move { manager.sync_and_index(&repo, None).await }
        });
        store.reconcile(&[]);
        store.remove(repo.id());
        drop(store);

        assert_eq!(task.await.unwrap().unwrap(), SyncOutcome::Indexed);
        assert!(manager.get_state(repo.id()).await.is_none());
        assert!(manager.due(Duration::from_secs(3600)).await.is_empty());
        assert_eq!(manager.delete_stale().await.unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_mark_during_sync_is_kept() {
        let temp_dir = TempDir::new().unwrap();
        let manager = Arc::new(create_manager(temp_dir.path(), "true").await);
        let repo: Repository = local(temp_dir.path()).into();
        manager.reconcile(&[repo.clone()]).await.unwrap();

        let mut store = manager.store.write().await;
        let task = tokio::spawn({
            let manager = manager.clone();
            let repo = repo.clone();
            async move { manager.sync_and_index(&repo, None).await }
        });
        store.reconcile(&[]);
        drop(store);

        task.await.unwrap().unwrap();
        let state = manager.get_state(repo.id()).await.unwrap();
        assert!(state.repository.is_stale());
        assert!(manager.due(Duration::from_secs(3600)).await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sync_all_summary() {
        let temp_dir = TempDir::new().unwrap();
        let manager = create_manager(temp_dir.path(), "true").await;

        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        let mut stale: Repository = local(&b).into();
        stale.set_stale(true);

        let summary = manager
            .sync_all(&[local(&a).into(), stale], &CancellationToken::new())
            .await;
        assert_eq!(
            summary,
            SyncSummary {
                indexed: 1,
                skipped: 1,
                cancelled: 0,
                failed: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_delete_stale_removes_clone_and_shards() {
        let temp_dir = TempDir::new().unwrap();
        let manager = create_manager(temp_dir.path(), "true").await;

        let mut kept = remote("github.com/org/kept");
        kept.path = temp_dir.path().join("repos/github.com/org/kept.git");
        let mut gone = remote("github.com/org/gone");
        gone.path = temp_dir.path().join("repos/github.com/org/gone.git");
        std::fs::create_dir_all(&gone.path).unwrap();

        let source = temp_dir.path().join("src/app");
        std::fs::create_dir_all(&source).unwrap();
        let local_repo = local(&source);

        let index_dir = temp_dir.path().join("index");
        std::fs::create_dir_all(&index_dir).unwrap();
        std::fs::write(index_dir.join("github.com%2Forg%2Fgone_v16.00000.zoekt"), "").unwrap();
        std::fs::write(index_dir.join("app_v16.00000.zoekt"), "").unwrap();

        manager
            .reconcile(&[kept.clone().into(), gone.clone().into(), local_repo.into()])
            .await
            .unwrap();
        let outcome = manager.reconcile(&[kept.into()]).await.unwrap();
        assert_eq!(outcome.stale.len(), 2);

        assert_eq!(manager.delete_stale().await.unwrap(), 2);

        assert!(!gone.path.exists());
        assert!(source.exists());
        assert_eq!(std::fs::read_dir(&index_dir).unwrap().count(), 0);
        assert_eq!(manager.list_states().await.len(), 1);
    }
}
