//! Repository state tracking and persistence

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::Result;
use crate::repository::Repository;

/// Tracks the state of a managed repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryState {
    /// The repository metadata
    pub repository: Repository,
    /// Last known commit SHA
    #[serde(default)]
    pub last_commit: Option<String>,
    /// Timestamp of last sync
    #[serde(default)]
    pub last_synced: Option<DateTime<Utc>>,
    /// Timestamp of last indexing
    #[serde(default)]
    pub last_indexed: Option<DateTime<Utc>>,
    /// Error message if any
    #[serde(default)]
    pub error: Option<String>,
    /// No longer returned by discovery
    #[serde(default)]
    pub missing: bool,
}

impl RepositoryState {
    /// Create a new repository state
    #[must_use]
    pub fn new(repository: Repository) -> Self {
        Self {
            repository,
            last_commit: None,
            last_synced: None,
            last_indexed: None,
            error: None,
            missing: false,
        }
    }

    /// Get the unique key for this repository
    #[must_use]
    pub fn key(&self) -> &str {
        self.repository.id()
    }

    /// Whether the repository is due for sync and indexing.
    ///
    /// Never-indexed and failed repositories are always due; stale ones
    /// never are.
    #[must_use]
    pub fn needs_reindex(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        if self.repository.is_stale() {
            return false;
        }
        if self.error.is_some() {
            return true;
        }
        match self.last_indexed {
            None => true,
            Some(at) => now
                .signed_duration_since(at)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= interval),
        }
    }

    /// Mark as synced with the given commit
    pub fn mark_synced(&mut self, commit: Option<String>) {
        self.last_commit = commit;
        self.last_synced = Some(Utc::now());
        self.error = None;
    }

    /// Mark as indexed
    pub fn mark_indexed(&mut self) {
        self.last_indexed = Some(Utc::now());
        self.error = None;
    }

    /// Set error state
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }
}

/// Outcome of reconciling the store against a fresh discovery.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Ids seen for the first time.
    pub added: Vec<String>,
    /// Ids no longer discovered, now marked stale.
    pub stale: Vec<String>,
    /// Previously missing ids discovered again.
    pub revived: Vec<String>,
}

/// Repository states keyed by id, persisted as a JSON file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    states: BTreeMap<String, RepositoryState>,
}

impl StateStore {
    /// Load the store at `path`; a missing file is an empty store.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let states = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Loaded {} repository state(s) from {:?}", states.len(), path);
        Ok(Self { path, states })
    }

    /// Write the store through a temp file and rename.
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(&self.states)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &str) -> Option<&RepositoryState> {
        self.states.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RepositoryState> {
        self.states.get_mut(id)
    }

    /// All states ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &RepositoryState> {
        self.states.values()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn remove(&mut self, id: &str) -> Option<RepositoryState> {
        self.states.remove(id)
    }

    /// Insert or update the state for `repository`, keeping timestamps.
    pub fn upsert(&mut self, repository: Repository) -> &mut RepositoryState {
        let id = repository.id().to_string();
        let state = self
            .states
            .entry(id)
            .or_insert_with(|| RepositoryState::new(repository.clone()));
        state.repository = repository;
        state
    }

    /// Record discovered repositories without touching the rest.
    ///
    /// Each discovered record replaces the stored one, keeping the stale flag
    /// its provider reported, and stops being missing.
    pub fn record(&mut self, discovered: &[Repository]) -> Reconciliation {
        let mut outcome = Reconciliation::default();
        for repo in discovered {
            match self.states.get(repo.id()) {
                None => outcome.added.push(repo.id().to_string()),
                Some(existing) if existing.missing => {
                    outcome.revived.push(repo.id().to_string())
                }
                Some(_) => {}
            }
            self.upsert(repo.clone()).missing = false;
        }
        outcome
    }

    /// Bring the store in line with a complete discovery.
    ///
    /// Stored repositories absent from `discovered` become missing and stale.
    pub fn reconcile(&mut self, discovered: &[Repository]) -> Reconciliation {
        let mut outcome = self.record(discovered);
        let seen: HashSet<&str> = discovered.iter().map(Repository::id).collect();

        for (id, state) in self.states.iter_mut() {
            if !seen.contains(id.as_str()) && !state.missing {
                state.missing = true;
                state.repository.set_stale(true);
                outcome.stale.push(id.clone());
            }
        }

        if !outcome.stale.is_empty() {
            info!("Marked {} repository(ies) stale", outcome.stale.len());
        }
        outcome
    }

    /// Non-stale repositories due for sync and indexing.
    pub fn due(&self, interval: Duration, now: DateTime<Utc>) -> Vec<Repository> {
        self.states
            .values()
            .filter(|s| s.needs_reindex(interval, now))
            .map(|s| s.repository.clone())
            .collect()
    }

    /// Repositories no longer returned by discovery.
    pub fn missing(&self) -> Vec<Repository> {
        self.states
            .values()
            .filter(|s| s.missing)
            .map(|s| s.repository.clone())
            .collect()
    }
}
