//! Filesystem watches for local repositories.
//!
//! Each watched path has at most one subscription and at most one live
//! cancellation token. Change notifications are delivered on a single
//! channel; the consumer calls [`WatcherRegistry::supersede`] for each one,
//! which cancels the previous token for that path before installing the next.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::repository::LocalRepository;

const EVENT_BUFFER: usize = 100;

/// A change somewhere under a watched repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Root of the repository that changed.
    pub path: PathBuf,
}

/// Per-path watch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// No subscription.
    Idle,
    /// Subscribed, nothing in flight.
    Watching,
    /// Subscribed with one sync task holding a live token.
    Syncing,
}

/// Handle for one sync run started by [`WatcherRegistry::supersede`].
#[derive(Debug, Clone)]
pub struct SyncTicket {
    pub path: PathBuf,
    pub token: CancellationToken,
    generation: u64,
}

/// Registry of filesystem subscriptions and in-flight sync tokens, keyed by
/// repository path.
pub struct WatcherRegistry {
    subscriptions: Mutex<HashMap<PathBuf, RecommendedWatcher>>,
    tokens: Mutex<HashMap<PathBuf, (u64, CancellationToken)>>,
    generation: AtomicU64,
    /// Set by `teardown_all`; later tickets start cancelled.
    closed: AtomicBool,
    events: mpsc::Sender<WatchEvent>,
}

impl std::fmt::Debug for WatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherRegistry").finish_non_exhaustive()
    }
}

impl WatcherRegistry {
    /// Create an empty registry and the receiving end of its event channel.
    pub fn new() -> (Self, mpsc::Receiver<WatchEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let registry = Self {
            subscriptions: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            events: tx,
        };
        (registry, rx)
    }

    /// Subscribe to changes under `repo.path`.
    ///
    /// Stale or unwatched repositories are torn down instead. Registering an
    /// already watched path keeps the existing subscription.
    pub async fn register(&self, repo: &LocalRepository) -> notify::Result<WatchState> {
        if repo.is_stale || !repo.watch {
            self.teardown(&repo.path).await;
            return Ok(WatchState::Idle);
        }

        let mut subscriptions = self.subscriptions.lock().await;
        if !subscriptions.contains_key(&repo.path) {
            let watcher = self.subscribe(&repo.path)?;
            subscriptions.insert(repo.path.clone(), watcher);
            info!("Started watching: {:?}", repo.path);
        }
        drop(subscriptions);

        Ok(self.state(&repo.path).await)
    }

    fn subscribe(&self, root: &Path) -> notify::Result<RecommendedWatcher> {
        let tx = self.events.clone();
        let event_root = root.to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let Ok(event) = res else {
                    return;
                };
                if !is_content_change(&event.kind) {
                    return;
                }
                if event.paths.iter().all(|p| is_vcs_path(&event_root, p)) {
                    return;
                }
                let _ = tx.blocking_send(WatchEvent {
                    path: event_root.clone(),
                });
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        Ok(watcher)
    }

    /// Queue a change event for `path` as if the filesystem reported one.
    pub async fn notify(&self, path: &Path) {
        let _ = self
            .events
            .send(WatchEvent {
                path: path.to_path_buf(),
            })
            .await;
    }

    /// Cancel any in-flight sync for `path` and install a fresh token.
    ///
    /// The previous task is not awaited. After [`teardown_all`] the returned
    /// token is already cancelled.
    ///
    /// [`teardown_all`]: WatcherRegistry::teardown_all
    pub async fn supersede(&self, path: &Path) -> SyncTicket {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();

        let mut tokens = self.tokens.lock().await;
        if self.closed.load(Ordering::Acquire) {
            token.cancel();
            return SyncTicket {
                path: path.to_path_buf(),
                token,
                generation,
            };
        }
        if let Some((_, previous)) = tokens.remove(path) {
            debug!("Superseding in-flight sync for {:?}", path);
            previous.cancel();
        }
        tokens.insert(path.to_path_buf(), (generation, token.clone()));

        SyncTicket {
            path: path.to_path_buf(),
            token,
            generation,
        }
    }

    /// Release `ticket`'s token if it is still the authoritative one.
    pub async fn complete(&self, ticket: &SyncTicket) {
        let mut tokens = self.tokens.lock().await;
        if tokens
            .get(&ticket.path)
            .is_some_and(|(generation, _)| *generation == ticket.generation)
        {
            tokens.remove(&ticket.path);
        }
    }

    /// Cancel the live token and drop the subscription for `path`.
    pub async fn teardown(&self, path: &Path) {
        if let Some((_, token)) = self.tokens.lock().await.remove(path) {
            token.cancel();
        }
        if self.subscriptions.lock().await.remove(path).is_some() {
            info!("Stopped watching: {:?}", path);
        }
    }

    /// Tear down every path and refuse live tokens from now on.
    pub async fn teardown_all(&self) {
        let mut tokens = self.tokens.lock().await;
        self.closed.store(true, Ordering::Release);
        for (_, (_, token)) in tokens.drain() {
            token.cancel();
        }
        drop(tokens);
        let mut subscriptions = self.subscriptions.lock().await;
        let count = subscriptions.len();
        subscriptions.clear();
        if count > 0 {
            info!("Stopped {} file watcher(s)", count);
        }
    }

    pub async fn state(&self, path: &Path) -> WatchState {
        if !self.subscriptions.lock().await.contains_key(path) {
            WatchState::Idle
        } else if self.tokens.lock().await.contains_key(path) {
            WatchState::Syncing
        } else {
            WatchState::Watching
        }
    }

    /// Paths with an active subscription.
    pub async fn watched_paths(&self) -> Vec<PathBuf> {
        self.subscriptions.lock().await.keys().cloned().collect()
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Whether `path` is inside version-control metadata under `root`.
fn is_vcs_path(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|c| match c {
        Component::Normal(name) => name == ".git" || name == ".hg" || name == ".svn",
        _ => false,
    })
}
