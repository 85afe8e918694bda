//! Provider factory: configured sources to connectors.

use std::path::Path;
use std::sync::Arc;

use super::base::{GitProvider, ProviderConfig, Scope};
use super::connector::{Connector, SourceSpec};
use super::error::{ProviderError, Result};
use super::filter::{NameFilter, RepoPredicates};
use super::gerrit::GerritProvider;
use super::gitea::GiteaProvider;
use super::github::GitHubProvider;
use super::gitlab::GitLabProvider;
use crate::config::{
    GerritSourceConfig, GitHubSourceConfig, GitLabSourceConfig, GiteaSourceConfig,
    RepoSourceConfig, RevisionsConfig, Token,
};

/// Supported provider types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    /// GitHub (github.com or GitHub Enterprise)
    GitHub,
    /// GitLab (gitlab.com or self-hosted)
    GitLab,
    /// Gitea / Forgejo
    Gitea,
    /// Gerrit code review
    Gerrit,
}

impl ProviderType {
    /// Parse provider type from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "github" | "github.com" => Some(Self::GitHub),
            "gitlab" | "gitlab.com" => Some(Self::GitLab),
            "gitea" | "gitea.com" => Some(Self::Gitea),
            "gerrit" => Some(Self::Gerrit),
            _ => None,
        }
    }

    /// Get the default base URL for this provider type.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::GitHub => Some(GitHubProvider::DEFAULT_BASE_URL),
            Self::GitLab => Some(GitLabProvider::DEFAULT_BASE_URL),
            Self::Gitea => Some(GiteaProvider::DEFAULT_BASE_URL),
            Self::Gerrit => None, // Gerrit requires a url
        }
    }
}

/// Create a provider by name.
pub fn create_provider(provider_type: &str, config: ProviderConfig) -> Result<Arc<dyn GitProvider>> {
    let provider_type = ProviderType::parse(provider_type)
        .ok_or_else(|| ProviderError::UnsupportedProvider(provider_type.to_string()))?;

    let provider: Arc<dyn GitProvider> = match provider_type {
        ProviderType::GitHub => Arc::new(GitHubProvider::new(config)?),
        ProviderType::GitLab => Arc::new(GitLabProvider::new(config)?),
        ProviderType::Gitea => Arc::new(GiteaProvider::new(config)?),
        ProviderType::Gerrit => Arc::new(GerritProvider::new(config)?),
    };
    Ok(provider)
}

fn provider_config(url: Option<&str>, token: Option<&Token>) -> crate::Result<ProviderConfig> {
    Ok(ProviderConfig {
        base_url: url.unwrap_or_default().to_string(),
        token: token.map(Token::resolve).transpose()?,
        ..Default::default()
    })
}

fn with_revisions(mut spec: SourceSpec, revisions: &RevisionsConfig) -> SourceSpec {
    spec.branches = revisions.branches.clone();
    spec.tags = revisions.tags.clone();
    spec
}

/// What a GitHub source selects.
pub fn github_spec(config: &GitHubSourceConfig) -> Result<SourceSpec> {
    let scopes = config
        .orgs
        .iter()
        .cloned()
        .map(Scope::Org)
        .chain(config.users.iter().cloned().map(Scope::User))
        .collect();
    let spec = SourceSpec {
        scopes,
        projects: config.repos.clone(),
        filter: NameFilter::new(&[], &config.exclude.repos)?,
        predicates: RepoPredicates {
            exclude_forks: config.exclude.forks,
            exclude_archived: config.exclude.archived,
        },
        ..Default::default()
    };
    Ok(with_revisions(spec, &config.revisions))
}

/// What a GitLab source selects.
pub fn gitlab_spec(config: &GitLabSourceConfig) -> Result<SourceSpec> {
    let mut scopes = Vec::new();
    if config.all {
        scopes.push(Scope::All);
    }
    scopes.extend(config.groups.iter().cloned().map(Scope::Group));
    scopes.extend(config.users.iter().cloned().map(Scope::User));

    let spec = SourceSpec {
        scopes,
        projects: config.projects.clone(),
        filter: NameFilter::new(&[], &config.exclude.projects)?,
        predicates: RepoPredicates {
            exclude_forks: config.exclude.forks,
            exclude_archived: config.exclude.archived,
        },
        ..Default::default()
    };
    Ok(with_revisions(spec, &config.revisions))
}

/// What a Gitea source selects.
pub fn gitea_spec(config: &GiteaSourceConfig) -> Result<SourceSpec> {
    let scopes = config
        .orgs
        .iter()
        .cloned()
        .map(Scope::Org)
        .chain(config.users.iter().cloned().map(Scope::User))
        .collect();
    let spec = SourceSpec {
        scopes,
        projects: config.repos.clone(),
        filter: NameFilter::new(&[], &config.exclude.repos)?,
        predicates: RepoPredicates {
            exclude_forks: config.exclude.forks,
            exclude_archived: config.exclude.archived,
        },
        ..Default::default()
    };
    Ok(with_revisions(spec, &config.revisions))
}

/// What a Gerrit source selects: every project, narrowed by include globs.
pub fn gerrit_spec(config: &GerritSourceConfig) -> Result<SourceSpec> {
    Ok(SourceSpec {
        scopes: vec![Scope::All],
        filter: NameFilter::new(&config.projects, &config.exclude.projects)?,
        ..Default::default()
    })
}

/// Build the connector for a remote source. Local sources have none.
pub fn connector_for(
    source: &RepoSourceConfig,
    repos_root: &Path,
) -> crate::Result<Option<Connector>> {
    let (provider, spec) = match source {
        RepoSourceConfig::GitHub(c) => (
            create_provider("github", provider_config(c.url.as_deref(), c.token.as_ref())?)?,
            github_spec(c)?,
        ),
        RepoSourceConfig::GitLab(c) => (
            create_provider("gitlab", provider_config(c.url.as_deref(), c.token.as_ref())?)?,
            gitlab_spec(c)?,
        ),
        RepoSourceConfig::Gitea(c) => (
            create_provider("gitea", provider_config(c.url.as_deref(), c.token.as_ref())?)?,
            gitea_spec(c)?,
        ),
        RepoSourceConfig::Gerrit(c) => (
            create_provider("gerrit", provider_config(Some(&c.url), None)?)?,
            gerrit_spec(c)?,
        ),
        RepoSourceConfig::Local(_) => return Ok(None),
    };
    Ok(Some(Connector::new(provider, spec, repos_root)))
}
