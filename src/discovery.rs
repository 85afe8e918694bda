//! Discovery across every configured source.

use std::collections::HashSet;
use std::time::Instant;

use futures::future::join_all;
use tracing::{info, warn};

use crate::config::{Config, RepoSourceConfig};
use crate::error::Result;
use crate::providers::factory::connector_for;
use crate::providers::local::local_repository;
use crate::repository::Repository;

/// A source that could not be discovered.
#[derive(Debug)]
pub struct SourceFailure {
    /// Position in `Config::repos`.
    pub index: usize,
    /// Source type.
    pub kind: &'static str,
    pub error: crate::Error,
}

/// Combined discovery result.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Canonical repositories, first occurrence of each id kept.
    pub repositories: Vec<Repository>,
    pub failures: Vec<SourceFailure>,
}

/// Discover one source. Fails atomically.
pub async fn discover_source(source: &RepoSourceConfig, config: &Config) -> Result<Vec<Repository>> {
    if let RepoSourceConfig::Local(local) = source {
        return Ok(vec![local_repository(local, &config.base_dir)?.into()]);
    }

    match connector_for(source, &config.repos_dir())? {
        Some(connector) => Ok(connector
            .discover()
            .await?
            .into_iter()
            .map(Repository::from)
            .collect()),
        None => Ok(Vec::new()),
    }
}

/// Discover every source concurrently. A failing source is logged and
/// skipped; the others still contribute.
pub async fn discover_all(config: &Config) -> Discovery {
    let start = Instant::now();
    let results = join_all(
        config
            .repos
            .iter()
            .map(|source| discover_source(source, config)),
    )
    .await;

    let mut discovery = Discovery::default();
    let mut seen = HashSet::new();
    for (index, (source, result)) in config.repos.iter().zip(results).enumerate() {
        match result {
            Ok(repos) => {
                for repo in repos {
                    if seen.insert(repo.id().to_string()) {
                        discovery.repositories.push(repo);
                    }
                }
            }
            Err(error) => {
                warn!("Skipping {} source #{}: {}", source.kind(), index, error);
                discovery.failures.push(SourceFailure {
                    index,
                    kind: source.kind(),
                    error,
                });
            }
        }
    }

    info!(
        "Discovered {} repositories from {} source(s) in {:?}",
        discovery.repositories.len(),
        config.repos.len() - discovery.failures.len(),
        start.elapsed()
    );
    discovery
}
