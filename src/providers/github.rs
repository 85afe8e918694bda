//! GitHub API connector.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::base::{BaseProvider, GitProvider, ProviderConfig, RawRepository, Scope, host_of};
use super::error::Result;
use super::pagination::paginate_until_short;
use crate::repository::CodeHost;

/// GitHub API response for a repository.
#[derive(Debug, Deserialize)]
struct GitHubRepo {
    id: u64,
    full_name: String,
    clone_url: String,
    html_url: Option<String>,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    archived: bool,
    stargazers_count: Option<u64>,
    watchers_count: Option<u64>,
    forks_count: Option<u64>,
}

/// Branch or tag entry; both listings share this shape.
#[derive(Debug, Deserialize)]
struct GitHubRef {
    name: String,
}

/// GitHub API connector.
#[derive(Debug, Clone)]
pub struct GitHubProvider {
    base: BaseProvider,
    host: String,
    page_size: usize,
}

impl GitHubProvider {
    /// Default GitHub API URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.github.com";

    /// Create a new GitHub provider with the given configuration.
    pub fn new(mut config: ProviderConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            config.base_url = Self::DEFAULT_BASE_URL.to_string();
        }
        let host = match host_of(&config.base_url, "github.com").as_str() {
            "api.github.com" => "github.com".to_string(),
            other => other.to_string(),
        };
        let base = BaseProvider::new("github", config)?;
        Ok(Self {
            base,
            host,
            page_size: 100,
        })
    }

    /// Create a new GitHub provider with default settings and a token.
    pub fn with_token(token: impl Into<String>) -> Result<Self> {
        Self::new(ProviderConfig {
            token: Some(token.into()),
            ..Default::default()
        })
    }

    /// Create a new GitHub provider with a custom base URL (for GitHub Enterprise).
    pub fn with_base_url(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        Self::new(ProviderConfig {
            base_url: base_url.into(),
            token,
            ..Default::default()
        })
    }

    /// Override the number of records requested per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn parse_repository(&self, data: GitHubRepo) -> RawRepository {
        let mut extra_metadata = Vec::new();
        for (key, value) in [
            ("zoekt.github-stars", data.stargazers_count),
            ("zoekt.github-watchers", data.watchers_count),
            ("zoekt.github-forks", data.forks_count),
        ] {
            extra_metadata.push((key.to_string(), value.unwrap_or(0).to_string()));
        }

        RawRepository {
            native_id: data.id.to_string(),
            name: data.full_name,
            clone_url: data.clone_url,
            web_url: data.html_url,
            is_fork: data.fork,
            is_archived: data.archived,
            is_public: !data.private,
            is_stale: false,
            extra_metadata,
        }
    }

    /// GET `path` page by page until a short page comes back.
    async fn list_paginated<T>(&self, path: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let per_page = self.page_size.to_string();
        let per_page = per_page.as_str();

        paginate_until_short(self.provider_name(), self.page_size, |page| async move {
            let page = page.to_string();
            let params = [("per_page", per_page), ("page", page.as_str())];
            let response = self
                .base
                .get(path, self.build_auth_headers(), &params)
                .await?;
            Ok(response.json::<Vec<T>>().await?)
        })
        .await
    }

    async fn list_repos(&self, path: &str) -> Result<Vec<RawRepository>> {
        let repos: Vec<GitHubRepo> = self.list_paginated(path).await?;
        Ok(repos
            .into_iter()
            .map(|r| self.parse_repository(r))
            .collect())
    }

    async fn list_ref_names(&self, path: &str) -> Result<Vec<String>> {
        let refs: Vec<GitHubRef> = self.list_paginated(path).await?;
        Ok(refs.into_iter().map(|r| r.name).collect())
    }
}

#[async_trait]
impl GitProvider for GitHubProvider {
    fn code_host(&self) -> CodeHost {
        CodeHost::GitHub
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn base_url(&self) -> &str {
        &self.base.base_url
    }

    fn build_auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );

        if let Some(token) = &self.base.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers
    }

    async fn list_for_scope(&self, scope: &Scope) -> Result<Vec<RawRepository>> {
        let path = match scope {
            Scope::Org(org) | Scope::Group(org) => {
                format!("/orgs/{}/repos", urlencoding::encode(org))
            }
            Scope::User(user) => format!("/users/{}/repos", urlencoding::encode(user)),
            Scope::All => "/user/repos".to_string(),
        };
        self.list_repos(&path).await
    }

    async fn get_project(&self, identifier: &str) -> Result<RawRepository> {
        let path = format!("/repos/{}", identifier.trim_matches('/'));
        let response = self
            .base
            .get(&path, self.build_auth_headers(), &[])
            .await?;
        let repo: GitHubRepo = response.json().await?;
        Ok(self.parse_repository(repo))
    }

    async fn list_branches(&self, project: &RawRepository) -> Result<Vec<String>> {
        self.list_ref_names(&format!("/repos/{}/branches", project.name))
            .await
    }

    async fn list_tags(&self, project: &RawRepository) -> Result<Vec<String>> {
        self.list_ref_names(&format!("/repos/{}/tags", project.name))
            .await
    }
}
