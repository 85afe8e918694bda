//! Long-running sync service.
//!
//! Discovers repositories, keeps the state store reconciled, re-indexes on a
//! schedule and reacts to filesystem changes in watched local repositories.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::discovery::discover_all;
use crate::repository::Repository;
use crate::telemetry::{Telemetry, events};

use super::error::Result;
use super::manager::{RepositoryManager, SyncOutcome, SyncSummary};
use super::state::Reconciliation;
use super::watcher::{WatchEvent, WatchState, WatcherRegistry};

/// Drives discovery, scheduled re-indexing and watch-triggered syncs.
pub struct SyncService {
    config: Config,
    manager: Arc<RepositoryManager>,
    registry: Arc<WatcherRegistry>,
    events: mpsc::Receiver<WatchEvent>,
    telemetry: Telemetry,
}

impl SyncService {
    pub fn new(config: Config, manager: Arc<RepositoryManager>, telemetry: Telemetry) -> Self {
        let (registry, events) = WatcherRegistry::new();
        Self {
            config,
            manager,
            registry: Arc::new(registry),
            events,
            telemetry,
        }
    }

    pub fn manager(&self) -> &Arc<RepositoryManager> {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<WatcherRegistry> {
        &self.registry
    }

    /// Discover, reconcile, drop stale artifacts and refresh watches.
    ///
    /// When any source fails, the pass only records what was found: nothing
    /// is marked stale or deleted until every source answers again.
    pub async fn resync(&self) -> Result<Reconciliation> {
        let discovery = discover_all(&self.config).await;
        let complete = discovery.failures.is_empty();

        let outcome = if complete {
            self.manager.reconcile(&discovery.repositories).await?
        } else {
            warn!(
                "{} source(s) failed; keeping previously discovered repositories",
                discovery.failures.len()
            );
            self.manager.record(&discovery.repositories).await?
        };
        if !outcome.added.is_empty() || !outcome.stale.is_empty() {
            info!(
                "Reconciled: {} new, {} stale, {} revived",
                outcome.added.len(),
                outcome.stale.len(),
                outcome.revived.len()
            );
        }

        if complete && self.config.settings.auto_delete_stale_repos {
            let deleted = self.manager.delete_stale().await?;
            if deleted > 0 {
                info!("Deleted {} stale repositories", deleted);
            }
        }

        self.refresh_watches(&discovery.repositories).await;
        Ok(outcome)
    }

    async fn refresh_watches(&self, discovered: &[Repository]) {
        let mut keep = Vec::new();
        for repo in discovered {
            if let Repository::Local(local) = repo {
                match self.registry.register(local).await {
                    Ok(WatchState::Idle) => {}
                    Ok(_) => keep.push(local.path.clone()),
                    Err(e) => warn!("Failed to watch {:?}: {}", local.path, e),
                }
            }
        }
        for path in self.registry.watched_paths().await {
            if !keep.contains(&path) {
                self.registry.teardown(&path).await;
            }
        }
    }

    /// One sync+index of every non-stale repository, optionally narrowed to `id`.
    pub async fn run_once(&self, id: Option<&str>, cancel: &CancellationToken) -> Result<SyncSummary> {
        self.resync().await?;

        let repos: Vec<Repository> = self
            .manager
            .list_states()
            .await
            .into_iter()
            .map(|state| state.repository)
            .filter(|repo| id.is_none_or(|id| repo.id() == id))
            .collect();
        Ok(self.manager.sync_all(&repos, cancel).await)
    }

    /// Run until `shutdown` fires, then tear down every watch and wait for
    /// in-flight work to stop.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let settings = &self.config.settings;
        info!(
            "Starting sync service (reindex every {:?}, resync every {:?})",
            settings.reindex_interval(),
            settings.resync_interval()
        );
        self.telemetry.capture(
            events::CONFIG_LOADED,
            json!({ "sources": self.config.repos.len() }),
        );

        let reindex_period = settings.reindex_interval();
        let resync_period = settings.resync_interval();
        let mut reindex_ticker = interval_at(Instant::now() + reindex_period, reindex_period);
        let mut resync_ticker = interval_at(Instant::now() + resync_period, resync_period);

        if let Err(e) = self.resync().await {
            error!("Initial discovery failed: {}", e);
        }
        let mut reindex: Option<JoinHandle<()>> = Some(self.spawn_reindex(&shutdown));
        let mut watch_tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(event) = self.events.recv() => {
                    self.handle_event(event, &mut watch_tasks).await;
                }
                Some(_) = watch_tasks.join_next(), if !watch_tasks.is_empty() => {}
                _ = resync_ticker.tick() => {
                    if let Err(e) = self.resync().await {
                        error!("Resync failed: {}", e);
                    }
                }
                _ = reindex_ticker.tick() => {
                    if reindex.as_ref().is_none_or(JoinHandle::is_finished) {
                        reindex = Some(self.spawn_reindex(&shutdown));
                    } else {
                        debug!("Previous reindex pass still running");
                    }
                }
            }
        }

        info!("Shutting down sync service");
        self.registry.teardown_all().await;
        if let Some(handle) = reindex {
            let _ = handle.await;
        }
        while watch_tasks.join_next().await.is_some() {}
        info!("Sync service stopped");
        Ok(())
    }

    /// Re-run sync+index for the repository rooted at `event.path`.
    ///
    /// Any in-flight sync for the same path is cancelled first.
    async fn handle_event(&self, event: WatchEvent, tasks: &mut JoinSet<()>) {
        if self.registry.state(&event.path).await == WatchState::Idle {
            debug!("Ignoring change for unwatched {:?}", event.path);
            return;
        }
        let Some(repo) = self.local_repository(&event.path).await else {
            debug!("Ignoring change for unknown {:?}", event.path);
            return;
        };

        info!("Change detected in {}", repo.id());
        let ticket = self.registry.supersede(&event.path).await;
        let manager = self.manager.clone();
        let registry = self.registry.clone();
        tasks.spawn(async move {
            let _ = manager.sync_and_index(&repo, Some(&ticket.token)).await;
            registry.complete(&ticket).await;
        });
    }

    async fn local_repository(&self, path: &Path) -> Option<Repository> {
        let id = path.display().to_string();
        self.manager
            .get_state(&id)
            .await
            .map(|state| state.repository)
            .filter(|repo| matches!(repo, Repository::Local(_)) && !repo.is_stale())
    }

    fn spawn_reindex(&self, shutdown: &CancellationToken) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let registry = self.registry.clone();
        let interval = self.config.settings.reindex_interval();
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            let due = manager.due(interval).await;
            if due.is_empty() {
                return;
            }
            debug!("{} repositories due at {}", due.len(), Utc::now());
            reindex_pass(&manager, &registry, due, &shutdown).await;
        })
    }
}

/// Sync+index `due`. Local repositories go through the registry so a
/// scheduled run and a watch-triggered run never overlap on one path.
async fn reindex_pass(
    manager: &RepositoryManager,
    registry: &WatcherRegistry,
    due: Vec<Repository>,
    shutdown: &CancellationToken,
) {
    let (local, remote): (Vec<_>, Vec<_>) = due
        .into_iter()
        .partition(|repo| matches!(repo, Repository::Local(_)));

    let local_runs = join_all(local.iter().map(|repo| async move {
        if shutdown.is_cancelled() {
            return Ok(SyncOutcome::Cancelled);
        }
        let ticket = registry.supersede(repo.path()).await;
        let outcome = manager.sync_and_index(repo, Some(&ticket.token)).await;
        registry.complete(&ticket).await;
        outcome
    }));

    let (local_results, remote_summary) =
        tokio::join!(local_runs, manager.sync_all(&remote, shutdown));

    let local_indexed = local_results
        .iter()
        .filter(|r| matches!(r, Ok(SyncOutcome::Indexed)))
        .count();
    info!(
        "Reindex pass: {} local, {} remote indexed",
        local_indexed, remote_summary.indexed
    );
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::{GiteaSourceConfig, LocalSourceConfig, RepoSourceConfig, Settings};

    fn config(temp_dir: &TempDir, index_command: &str, sources: &[&str]) -> Config {
        Config {
            data_dir: temp_dir.path().join("data"),
            base_dir: temp_dir.path().to_path_buf(),
            repos: sources
                .iter()
                .map(|path| {
                    RepoSourceConfig::Local(LocalSourceConfig {
                        path: path.to_string(),
                        watch: true,
                        exclude: Default::default(),
                    })
                })
                .collect(),
            settings: Settings {
                index_command: index_command.to_string(),
                git_index_command: index_command.to_string(),
                ..Settings::default()
            },
            ..Default::default()
        }
    }

    async fn service(config: Config) -> SyncService {
        let manager = RepositoryManager::from_config(&config, Telemetry::disabled())
            .await
            .unwrap();
        SyncService::new(config, Arc::new(manager), Telemetry::disabled())
    }

    fn source_dir(temp_dir: &TempDir, name: &str) -> PathBuf {
        let path = temp_dir.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_once_indexes_discovered() {
        let temp_dir = TempDir::new().unwrap();
        source_dir(&temp_dir, "app");
        source_dir(&temp_dir, "lib");
        let service = service(config(&temp_dir, "true", &["app", "lib", "missing"])).await;

        let summary = service
            .run_once(None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.indexed, 2);
        assert_eq!(service.registry().watched_paths().await.len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_once_narrowed_to_id() {
        let temp_dir = TempDir::new().unwrap();
        let app = source_dir(&temp_dir, "app");
        source_dir(&temp_dir, "lib");
        let service = service(config(&temp_dir, "true", &["app", "lib"])).await;

        let id = app.display().to_string();
        let summary = service
            .run_once(Some(&id), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.indexed, 1);
        assert!(service.manager().get_state(&id).await.unwrap().last_indexed.is_some());
    }

    #[tokio::test]
    async fn test_resync_marks_removed_source_stale_and_unwatches() {
        let temp_dir = TempDir::new().unwrap();
        let app = source_dir(&temp_dir, "app");

        let mut cfg = config(&temp_dir, "true", &["app"]);
        cfg.settings.auto_delete_stale_repos = false;
        let first = service(cfg.clone()).await;
        first.resync().await.unwrap();
        assert_eq!(first.registry().watched_paths().await, vec![app.clone()]);

        cfg.repos.clear();
        let second = service(cfg).await;
        second.registry().register(&crate::repository::fixtures::local(&app)).await.unwrap();
        let outcome = second.resync().await.unwrap();

        assert_eq!(outcome.stale, vec![app.display().to_string()]);
        assert!(second.registry().watched_paths().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_source_keeps_previous_repositories() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/orgs/org/repos"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-total-count", "1")
                    .set_body_json(json!([{
                        "id": 1,
                        "full_name": "org/repo",
                        "clone_url": format!("{}/org/repo.git", server.uri()),
                        "html_url": format!("{}/org/repo", server.uri()),
                    }])),
            )
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let mut cfg = config(&temp_dir, "true", &[]);
        cfg.repos.push(RepoSourceConfig::Gitea(GiteaSourceConfig {
            url: Some(server.uri()),
            orgs: vec!["org".to_string()],
            ..Default::default()
        }));
        assert!(cfg.settings.auto_delete_stale_repos);
        let service = service(cfg).await;

        let first = service.resync().await.unwrap();
        assert_eq!(first.added.len(), 1);
        let id = first.added[0].clone();
        let clone = service
            .manager()
            .get_state(&id)
            .await
            .unwrap()
            .repository
            .path()
            .to_path_buf();
        std::fs::create_dir_all(&clone).unwrap();

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/orgs/org/repos"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let second = service.resync().await.unwrap();
        assert!(second.stale.is_empty());

        let state = service.manager().get_state(&id).await.unwrap();
        assert!(!state.repository.is_stale());
        assert!(clone.exists());
        assert_eq!(
            service.manager().due(Duration::from_secs(3600)).await.len(),
            1
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reindex_after_shutdown_skips_local() {
        let temp_dir = TempDir::new().unwrap();
        let app = source_dir(&temp_dir, "app");
        let service = service(config(&temp_dir, "true", &["app"])).await;
        service.resync().await.unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        service.registry().teardown_all().await;

        let due = service.manager().due(Duration::from_secs(3600)).await;
        assert_eq!(due.len(), 1);
        reindex_pass(service.manager(), service.registry(), due, &shutdown).await;

        let id = app.display().to_string();
        let state = service.manager().get_state(&id).await.unwrap();
        assert!(state.last_indexed.is_none());
        assert!(state.error.is_none());
        assert_eq!(service.registry().state(&app).await, WatchState::Idle);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reacts_to_change_and_shuts_down() {
        let temp_dir = TempDir::new().unwrap();
        let app = source_dir(&temp_dir, "app");
        let service = service(config(&temp_dir, "true", &["app"])).await;
        let manager = service.manager().clone();
        let registry = service.registry().clone();
        let id = app.display().to_string();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(service.run(shutdown.clone()));

        let first = wait_for_index(&manager, &id, None).await;

        registry.notify(&app).await;
        wait_for_index(&manager, &id, Some(first)).await;

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(registry.watched_paths().await.is_empty());
    }

    async fn wait_for_index(
        manager: &RepositoryManager,
        id: &str,
        after: Option<chrono::DateTime<Utc>>,
    ) -> chrono::DateTime<Utc> {
        for _ in 0..200 {
            if let Some(at) = manager.get_state(id).await.and_then(|s| s.last_indexed) {
                if after.is_none_or(|prev| at > prev) {
                    return at;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("{id} was not indexed in time");
    }
}
