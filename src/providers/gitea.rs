//! Gitea API connector.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::base::{BaseProvider, GitProvider, ProviderConfig, RawRepository, Scope, host_of};
use super::error::Result;
use super::pagination::{Page, paginate, total_from_headers};
use crate::repository::CodeHost;

/// Header Gitea uses to announce the size of a listing.
const TOTAL_HEADER: &str = "x-total-count";

/// Gitea API response for a repository.
#[derive(Debug, Deserialize)]
struct GiteaRepo {
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
    #[serde(default)]
    empty: bool,
}

#[derive(Debug, Deserialize)]
struct GiteaRef {
    name: String,
}

/// Gitea API connector.
#[derive(Debug, Clone)]
pub struct GiteaProvider {
    base: BaseProvider,
    host: String,
    page_size: usize,
}

impl GiteaProvider {
    /// Public instance used when no URL is configured.
    pub const DEFAULT_BASE_URL: &'static str = "https://gitea.com/api/v1";

    /// Create a new Gitea provider. `base_url` may omit the `/api/v1` suffix.
    pub fn new(mut config: ProviderConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            config.base_url = Self::DEFAULT_BASE_URL.to_string();
        }

        // Ensure the URL ends with /api/v1
        let trimmed = config.base_url.trim_end_matches('/');
        if !trimmed.ends_with("/api/v1") {
            config.base_url = format!("{}/api/v1", trimmed);
        }

        let host = host_of(&config.base_url, "gitea.com");
        let base = BaseProvider::new("gitea", config)?;
        Ok(Self {
            base,
            host,
            page_size: 50,
        })
    }

    /// Create a new Gitea provider with the given base URL and token.
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

    fn parse_repository(&self, data: GiteaRepo) -> RawRepository {
        RawRepository {
            native_id: data.id.to_string(),
            name: data.full_name,
            clone_url: data.clone_url,
            web_url: data.html_url,
            is_fork: data.fork,
            is_archived: data.archived,
            is_public: !data.private,
            // A repository without commits has nothing to clone.
            is_stale: data.empty,
            extra_metadata: Vec::new(),
        }
    }

    /// GET `path` page by page until the `x-total-count` is reached.
    async fn list_paginated<T>(&self, path: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let limit = self.page_size.to_string();
        let limit = limit.as_str();

        paginate(self.provider_name(), |page| async move {
            let page = page.to_string();
            let params = [("limit", limit), ("page", page.as_str())];
            let response = self
                .base
                .get(path, self.build_auth_headers(), &params)
                .await?;
            let total = total_from_headers(response.headers(), TOTAL_HEADER);
            let records = response.json::<Vec<T>>().await?;
            Ok(Page::with_total(records, total))
        })
        .await
    }

    async fn list_repos(&self, path: &str) -> Result<Vec<RawRepository>> {
        let repos: Vec<GiteaRepo> = self.list_paginated(path).await?;
        Ok(repos
            .into_iter()
            .map(|r| self.parse_repository(r))
            .collect())
    }

    async fn list_ref_names(&self, path: &str) -> Result<Vec<String>> {
        let refs: Vec<GiteaRef> = self.list_paginated(path).await?;
        Ok(refs.into_iter().map(|r| r.name).collect())
    }
}

#[async_trait]
impl GitProvider for GiteaProvider {
    fn code_host(&self) -> CodeHost {
        CodeHost::Gitea
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn base_url(&self) -> &str {
        &self.base.base_url
    }

    fn build_auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = &self.base.token {
            if let Ok(value) = HeaderValue::from_str(&format!("token {}", token)) {
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
        let repo: GiteaRepo = response.json().await?;
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
