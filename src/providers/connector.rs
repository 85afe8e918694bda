//! Discovery pipeline for one configured remote source.
//!
//! A [`Connector`] pairs a [`GitProvider`] with what the source asks for
//! (scopes, explicit projects, filters, revision patterns) and turns it into
//! a list of canonical repositories. Any failure fails the whole source: no
//! partial list is ever returned.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use super::base::{GitProvider, RawRepository, Scope};
use super::error::Result;
use super::filter::{NameFilter, Normalizer, RepoPredicates, resolve_revisions};
use crate::repository::RemoteRepository;

/// Branch/tag listings issued concurrently per source.
const REF_LOOKUP_CONCURRENCY: usize = 8;

/// What a configured source selects.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    /// Listings to run.
    pub scopes: Vec<Scope>,
    /// Explicit projects fetched one by one.
    pub projects: Vec<String>,
    /// Include/exclude by name.
    pub filter: NameFilter,
    /// Fork/archive exclusion.
    pub predicates: RepoPredicates,
    /// Branch patterns; empty means default branch only.
    pub branches: Vec<String>,
    /// Tag patterns; empty means no tags.
    pub tags: Vec<String>,
}

impl Default for SourceSpec {
    fn default() -> Self {
        Self {
            scopes: Vec::new(),
            projects: Vec::new(),
            filter: NameFilter::allow_all(),
            predicates: RepoPredicates::default(),
            branches: Vec::new(),
            tags: Vec::new(),
        }
    }
}

/// A provider bound to one source's selection.
#[derive(Clone)]
pub struct Connector {
    provider: Arc<dyn GitProvider>,
    spec: SourceSpec,
    normalizer: Normalizer,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("provider", &self.provider.provider_name())
            .field("base_url", &self.provider.base_url())
            .field("spec", &self.spec)
            .finish()
    }
}

impl Connector {
    pub fn new(provider: Arc<dyn GitProvider>, spec: SourceSpec, repos_root: &Path) -> Self {
        let normalizer = Normalizer::new(provider.code_host(), provider.host(), repos_root);
        Self {
            provider,
            spec,
            normalizer,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    /// Run every listing, then normalize, filter and resolve revisions.
    pub async fn discover(&self) -> Result<Vec<RemoteRepository>> {
        let start = Instant::now();
        let records = self.collect().await?;
        let listed = records.len();

        let survivors: Vec<_> = records
            .into_iter()
            .filter_map(|raw| {
                let repo = self.normalizer.normalize(raw.clone());
                let keep = self.spec.filter.allows(&repo.name) && self.spec.predicates.allows(&repo);
                keep.then_some((raw, repo))
            })
            .collect();

        let repos: Vec<RemoteRepository> = stream::iter(survivors)
            .map(|(raw, repo)| self.resolve_refs(raw, repo))
            .buffered(REF_LOOKUP_CONCURRENCY)
            .try_collect()
            .await?;

        info!(
            "{}: discovered {} repositories ({} listed) in {:?}",
            self.provider_name(),
            repos.len(),
            listed,
            start.elapsed()
        );
        Ok(repos)
    }

    /// Combined raw records, de-duplicated by native id in first-seen order.
    async fn collect(&self) -> Result<Vec<RawRepository>> {
        let mut records = Vec::new();

        for scope in &self.spec.scopes {
            let start = Instant::now();
            let batch = self.provider.list_for_scope(scope).await?;
            debug!(
                "{}: found {} repositories for {} in {:?}",
                self.provider_name(),
                batch.len(),
                scope.describe(),
                start.elapsed()
            );
            records.extend(batch);
        }

        for project in &self.spec.projects {
            records.push(self.provider.get_project(project).await?);
        }

        let mut seen = HashSet::new();
        records.retain(|r| seen.insert(r.native_id.clone()));
        Ok(records)
    }

    async fn resolve_refs(
        &self,
        raw: RawRepository,
        mut repo: RemoteRepository,
    ) -> Result<RemoteRepository> {
        if !self.spec.branches.is_empty() {
            let names = self.provider.list_branches(&raw).await?;
            repo.branches = resolve_revisions(&self.spec.branches, &names)?;
        }
        if !self.spec.tags.is_empty() {
            let names = self.provider.list_tags(&raw).await?;
            repo.tags = resolve_revisions(&self.spec.tags, &names)?;
        }
        Ok(repo)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use reqwest::header::HeaderMap;

    use super::*;
    use crate::providers::error::ProviderError;
    use crate::repository::CodeHost;

    /// In-memory provider recording which calls were made.
    #[derive(Default)]
    struct FakeProvider {
        scopes: Vec<(Scope, Vec<RawRepository>)>,
        projects: Vec<RawRepository>,
        branches: Vec<String>,
        tags: Vec<String>,
        fail_tags: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl GitProvider for FakeProvider {
        fn code_host(&self) -> CodeHost {
            CodeHost::GitHub
        }

        fn host(&self) -> &str {
            "github.com"
        }

        fn base_url(&self) -> &str {
            "https://api.github.com"
        }

        fn build_auth_headers(&self) -> HeaderMap {
            HeaderMap::new()
        }

        async fn list_for_scope(&self, scope: &Scope) -> Result<Vec<RawRepository>> {
            self.record(format!("list {}", scope.describe()));
            Ok(self
                .scopes
                .iter()
                .find(|(s, _)| s == scope)
                .map(|(_, repos)| repos.clone())
                .unwrap_or_default())
        }

        async fn get_project(&self, identifier: &str) -> Result<RawRepository> {
            self.record(format!("get {identifier}"));
            self.projects
                .iter()
                .find(|p| p.name == identifier)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound {
                    provider: "github".to_string(),
                    resource: identifier.to_string(),
                })
        }

        async fn list_branches(&self, project: &RawRepository) -> Result<Vec<String>> {
            self.record(format!("branches {}", project.name));
            Ok(self.branches.clone())
        }

        async fn list_tags(&self, project: &RawRepository) -> Result<Vec<String>> {
            self.record(format!("tags {}", project.name));
            if self.fail_tags {
                return Err(ProviderError::ApiError {
                    provider: "github".to_string(),
                    status: 500,
                    message: "Internal Server Error".to_string(),
                });
            }
            Ok(self.tags.clone())
        }
    }

    fn raw(id: &str, name: &str) -> RawRepository {
        RawRepository {
            native_id: id.to_string(),
            name: name.to_string(),
            clone_url: format!("https://github.com/{name}.git"),
            ..Default::default()
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn connector(provider: FakeProvider, spec: SourceSpec) -> (Arc<FakeProvider>, Connector) {
        let provider = Arc::new(provider);
        let connector = Connector::new(provider.clone(), spec, Path::new("/mock/path"));
        (provider, connector)
    }

    #[tokio::test]
    async fn test_scopes_and_projects_are_combined_and_deduplicated() {
        let provider = FakeProvider {
            scopes: vec![
                (Scope::Org("mock-org".into()), vec![raw("1", "mock-org/mock-repo")]),
                (
                    Scope::User("mock-user".into()),
                    vec![raw("2", "mock-user/mock-repo"), raw("1", "mock-org/mock-repo")],
                ),
            ],
            projects: vec![raw("2", "mock-user/mock-repo")],
            ..Default::default()
        };
        let spec = SourceSpec {
            scopes: vec![Scope::Org("mock-org".into()), Scope::User("mock-user".into())],
            projects: strings(&["mock-user/mock-repo"]),
            ..Default::default()
        };

        let (_, connector) = connector(provider, spec);
        let repos = connector.discover().await.unwrap();

        let ids: Vec<_> = repos.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["github.com/mock-org/mock-repo", "github.com/mock-user/mock-repo"]);
        assert_eq!(
            repos[0].path,
            Path::new("/mock/path/github.com/mock-org/mock-repo.git")
        );
    }

    #[tokio::test]
    async fn test_forks_archived_and_excluded_names_are_dropped() {
        let mut fork = raw("1", "mock-org/mock-fork");
        fork.is_fork = true;
        let mut archived = raw("2", "mock-org/mock-archived");
        archived.is_archived = true;

        let provider = FakeProvider {
            scopes: vec![(
                Scope::Org("mock-org".into()),
                vec![fork, archived, raw("3", "mock-org/excluded-repo"), raw("4", "mock-org/kept")],
            )],
            ..Default::default()
        };
        let spec = SourceSpec {
            scopes: vec![Scope::Org("mock-org".into())],
            filter: NameFilter::new(&[], &strings(&["mock-org/excluded-repo"])).unwrap(),
            predicates: RepoPredicates {
                exclude_forks: true,
                exclude_archived: true,
            },
            ..Default::default()
        };

        let (_, connector) = connector(provider, spec);
        let repos = connector.discover().await.unwrap();

        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "mock-org/kept");
    }

    #[tokio::test]
    async fn test_revisions_resolved_when_configured() {
        let provider = FakeProvider {
            scopes: vec![(Scope::Org("mock-org".into()), vec![raw("1", "mock-org/mock-repo")])],
            branches: strings(&["main", "dev", "feature"]),
            tags: strings(&["v1.0", "v1.1", "v2.0"]),
            ..Default::default()
        };
        let spec = SourceSpec {
            scopes: vec![Scope::Org("mock-org".into())],
            branches: strings(&["main", "dev"]),
            tags: strings(&["v1.*"]),
            ..Default::default()
        };

        let (_, connector) = connector(provider, spec);
        let repos = connector.discover().await.unwrap();

        assert_eq!(repos[0].branches, vec!["main", "dev"]);
        assert_eq!(repos[0].tags, vec!["v1.0", "v1.1"]);
    }

    #[tokio::test]
    async fn test_refs_not_listed_without_patterns() {
        let provider = FakeProvider {
            scopes: vec![(Scope::All, vec![raw("1", "org/repo")])],
            branches: strings(&["main"]),
            ..Default::default()
        };
        let spec = SourceSpec {
            scopes: vec![Scope::All],
            ..Default::default()
        };

        let (provider, connector) = connector(provider, spec);
        let repos = connector.discover().await.unwrap();

        assert!(repos[0].branches.is_empty() && repos[0].tags.is_empty());
        assert_eq!(provider.calls(), vec!["list all repositories"]);
    }

    #[tokio::test]
    async fn test_filtered_repositories_skip_ref_lookup() {
        let provider = FakeProvider {
            scopes: vec![(Scope::All, vec![raw("1", "org/a"), raw("2", "org/b")])],
            branches: strings(&["main"]),
            ..Default::default()
        };
        let spec = SourceSpec {
            scopes: vec![Scope::All],
            filter: NameFilter::new(&strings(&["org/a"]), &[]).unwrap(),
            branches: strings(&["main"]),
            ..Default::default()
        };

        let (provider, connector) = connector(provider, spec);
        connector.discover().await.unwrap();

        assert!(provider.calls().contains(&"branches org/a".to_string()));
        assert!(!provider.calls().contains(&"branches org/b".to_string()));
    }

    #[tokio::test]
    async fn test_any_failure_fails_the_whole_source() {
        let provider = FakeProvider {
            scopes: vec![(Scope::All, vec![raw("1", "org/a"), raw("2", "org/b")])],
            tags: strings(&["v1"]),
            fail_tags: true,
            ..Default::default()
        };
        let spec = SourceSpec {
            scopes: vec![Scope::All],
            tags: strings(&["v*"]),
            ..Default::default()
        };

        let (_, connector) = connector(provider, spec);
        let err = connector.discover().await.unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_missing_project_fails_the_source() {
        let spec = SourceSpec {
            projects: strings(&["org/missing"]),
            ..Default::default()
        };

        let (_, connector) = connector(FakeProvider::default(), spec);
        let err = connector.discover().await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }
}
