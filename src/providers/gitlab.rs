//! GitLab API connector.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use super::base::{BaseProvider, GitProvider, ProviderConfig, RawRepository, Scope, host_of};
use super::error::Result;
use super::pagination::{Page, paginate, total_from_headers};
use crate::repository::CodeHost;

/// Header GitLab uses to announce the size of a listing.
const TOTAL_HEADER: &str = "x-total";

/// GitLab API response for a project.
#[derive(Debug, Deserialize)]
struct GitLabProject {
    id: u64,
    path_with_namespace: String,
    http_url_to_repo: String,
    web_url: Option<String>,
    #[serde(default)]
    archived: bool,
    /// Present (any shape) only on forks.
    forked_from_project: Option<serde_json::Value>,
    star_count: Option<u64>,
    forks_count: Option<u64>,
    visibility: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitLabRef {
    name: String,
}

/// GitLab API connector.
#[derive(Debug, Clone)]
pub struct GitLabProvider {
    base: BaseProvider,
    host: String,
    page_size: usize,
}

impl GitLabProvider {
    /// Default GitLab API URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://gitlab.com/api/v4";

    /// Host of the shared instance, where listing every project is refused.
    pub const CLOUD_HOST: &'static str = "gitlab.com";

    /// Create a new GitLab provider. `base_url` may omit the `/api/v4` suffix.
    pub fn new(mut config: ProviderConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            config.base_url = Self::DEFAULT_BASE_URL.to_string();
        }
        let trimmed = config.base_url.trim_end_matches('/');
        if !trimmed.ends_with("/api/v4") {
            config.base_url = format!("{}/api/v4", trimmed);
        }
        let host = host_of(&config.base_url, Self::CLOUD_HOST);
        let base = BaseProvider::new("gitlab", config)?;
        Ok(Self {
            base,
            host,
            page_size: 100,
        })
    }

    /// Create a new GitLab provider with default settings and a token.
    pub fn with_token(token: impl Into<String>) -> Result<Self> {
        Self::new(ProviderConfig {
            token: Some(token.into()),
            ..Default::default()
        })
    }

    /// Create a new GitLab provider with a custom base URL (for self-hosted GitLab).
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

    /// Whether this connector talks to gitlab.com.
    pub fn is_cloud(&self) -> bool {
        self.host == Self::CLOUD_HOST
    }

    fn parse_repository(&self, data: GitLabProject) -> RawRepository {
        RawRepository {
            native_id: data.id.to_string(),
            name: data.path_with_namespace,
            clone_url: data.http_url_to_repo,
            web_url: data.web_url,
            is_fork: data.forked_from_project.is_some(),
            is_archived: data.archived,
            is_public: data.visibility.as_deref() == Some("public"),
            is_stale: false,
            extra_metadata: vec![
                (
                    "zoekt.gitlab-stars".to_string(),
                    data.star_count.unwrap_or(0).to_string(),
                ),
                (
                    "zoekt.gitlab-forks".to_string(),
                    data.forks_count.unwrap_or(0).to_string(),
                ),
            ],
        }
    }

    /// URL-encode a `group/sub/project` path for use as an id segment.
    fn encode_project_path(path: &str) -> String {
        urlencoding::encode(path.trim_matches('/')).into_owned()
    }

    /// GET `path` page by page until the `x-total` count is reached.
    async fn list_paginated<T>(&self, path: &str, extra: &[(&str, &str)]) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let per_page = self.page_size.to_string();
        let per_page = per_page.as_str();

        paginate(self.provider_name(), |page| async move {
            let page = page.to_string();
            let mut params = vec![("per_page", per_page), ("page", page.as_str())];
            params.extend_from_slice(extra);

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

    async fn list_projects(&self, path: &str, extra: &[(&str, &str)]) -> Result<Vec<RawRepository>> {
        let projects: Vec<GitLabProject> = self.list_paginated(path, extra).await?;
        Ok(projects
            .into_iter()
            .map(|p| self.parse_repository(p))
            .collect())
    }

    async fn list_ref_names(&self, project: &RawRepository, kind: &str) -> Result<Vec<String>> {
        let path = format!(
            "/projects/{}/repository/{}",
            Self::encode_project_path(&project.name),
            kind
        );
        let refs: Vec<GitLabRef> = self.list_paginated(&path, &[]).await?;
        Ok(refs.into_iter().map(|r| r.name).collect())
    }
}

#[async_trait]
impl GitProvider for GitLabProvider {
    fn code_host(&self) -> CodeHost {
        CodeHost::GitLab
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
            if let Ok(value) = HeaderValue::from_str(token) {
                headers.insert("PRIVATE-TOKEN", value);
            }
        }

        headers
    }

    async fn list_for_scope(&self, scope: &Scope) -> Result<Vec<RawRepository>> {
        match scope {
            Scope::All if self.is_cloud() => {
                warn!("Listing all projects is not supported on {}; skipping", Self::CLOUD_HOST);
                Ok(Vec::new())
            }
            Scope::All => self.list_projects("/projects", &[]).await,
            Scope::Group(group) | Scope::Org(group) => {
                let path = format!("/groups/{}/projects", Self::encode_project_path(group));
                self.list_projects(&path, &[("include_subgroups", "true")])
                    .await
            }
            Scope::User(user) => {
                let path = format!("/users/{}/projects", urlencoding::encode(user));
                self.list_projects(&path, &[]).await
            }
        }
    }

    async fn get_project(&self, identifier: &str) -> Result<RawRepository> {
        let path = format!("/projects/{}", Self::encode_project_path(identifier));
        let response = self
            .base
            .get(&path, self.build_auth_headers(), &[])
            .await?;
        let project: GitLabProject = response.json().await?;
        Ok(self.parse_repository(project))
    }

    async fn list_branches(&self, project: &RawRepository) -> Result<Vec<String>> {
        self.list_ref_names(project, "branches").await
    }

    async fn list_tags(&self, project: &RawRepository) -> Result<Vec<String>> {
        self.list_ref_names(project, "tags").await
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::providers::error::ProviderError;

    fn project_json(id: u64, name: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "path_with_namespace": name,
            "http_url_to_repo": format!("http://repo{id}.git"),
            "web_url": format!("http://web{id}"),
            "archived": false,
            "star_count": 10,
            "forks_count": 5,
            "visibility": "public"
        })
    }

    fn provider_for(server: &MockServer) -> GitLabProvider {
        GitLabProvider::with_base_url(server.uri(), Some("test-token".to_string())).unwrap()
    }

    #[test]
    fn test_default_base_url() {
        let provider = GitLabProvider::with_token("token").unwrap();
        assert_eq!(provider.base_url(), "https://gitlab.com/api/v4");
        assert_eq!(provider.host(), "gitlab.com");
        assert!(provider.is_cloud());
    }

    #[test]
    fn test_custom_base_url_gets_api_suffix() {
        let provider = GitLabProvider::with_base_url("https://gitlab.example.com/", None).unwrap();
        assert_eq!(provider.base_url(), "https://gitlab.example.com/api/v4");
        assert_eq!(provider.host(), "gitlab.example.com");
        assert!(!provider.is_cloud());
    }

    #[test]
    fn test_auth_headers() {
        let provider = GitLabProvider::with_token("my-token").unwrap();
        let headers = provider.build_auth_headers();
        assert_eq!(headers.get("PRIVATE-TOKEN").unwrap(), "my-token");

        let anonymous = GitLabProvider::with_base_url("https://gitlab.example.com", None).unwrap();
        assert!(!anonymous.build_auth_headers().contains_key("PRIVATE-TOKEN"));
    }

    #[test]
    fn test_encode_project_path() {
        assert_eq!(
            GitLabProvider::encode_project_path("group/sub/project"),
            "group%2Fsub%2Fproject"
        );
    }

    #[test]
    fn test_parse_repository_fork_and_visibility() {
        let provider = GitLabProvider::with_token("token").unwrap();
        let data: GitLabProject = serde_json::from_value(serde_json::json!({
            "id": 5,
            "path_with_namespace": "group/project5",
            "http_url_to_repo": "http://repo5.git",
            "archived": true,
            "forked_from_project": {},
            "star_count": 5,
            "forks_count": 2,
            "visibility": "internal"
        }))
        .unwrap();

        let repo = provider.parse_repository(data);
        assert!(repo.is_fork);
        assert!(repo.is_archived);
        assert!(!repo.is_public);
        assert!(repo.web_url.is_none());
        assert!(
            repo.extra_metadata
                .contains(&("zoekt.gitlab-stars".to_string(), "5".to_string()))
        );
    }

    #[tokio::test]
    async fn test_all_projects_on_self_hosted() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v4/projects"))
            .and(header("PRIVATE-TOKEN", "test-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-total", "1")
                    .set_body_json(serde_json::json!([project_json(1, "group/project1")])),
            )
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server);
        let repos = provider.list_for_scope(&Scope::All).await.unwrap();

        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "group/project1");
    }

    #[tokio::test]
    async fn test_all_projects_refused_on_cloud() {
        let provider = GitLabProvider::with_token("token").unwrap();
        let repos = provider.list_for_scope(&Scope::All).await.unwrap();
        assert!(repos.is_empty());
    }

    #[tokio::test]
    async fn test_group_listing_includes_subgroups_and_paginates() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v4/groups/my-group/projects"))
            .and(query_param("include_subgroups", "true"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-total", "3")
                    .set_body_json(serde_json::json!([
                        project_json(1, "my-group/a"),
                        project_json(2, "my-group/sub/b")
                    ])),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v4/groups/my-group/projects"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-total", "3")
                    .set_body_json(serde_json::json!([project_json(3, "my-group/c")])),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server).with_page_size(2);
        let repos = provider
            .list_for_scope(&Scope::Group("my-group".to_string()))
            .await
            .unwrap();

        let names: Vec<_> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["my-group/a", "my-group/sub/b", "my-group/c"]);
    }

    #[tokio::test]
    async fn test_missing_total_header_is_protocol_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v4/users/my-user/projects"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([project_json(3, "user/project3")])),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server);
        let err = provider
            .list_for_scope(&Scope::User("my-user".to_string()))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_get_project_and_refs() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v4/projects/specific%2Fproject"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(project_json(4, "specific/project")),
            )
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v4/projects/specific%2Fproject/repository/branches"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-total", "3")
                    .set_body_json(serde_json::json!([
                        { "name": "main" },
                        { "name": "dev" },
                        { "name": "feature" }
                    ])),
            )
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v4/projects/specific%2Fproject/repository/tags"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-total", "2")
                    .set_body_json(serde_json::json!([{ "name": "v1.0" }, { "name": "v2.0" }])),
            )
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server);
        let project = provider.get_project("specific/project").await.unwrap();
        assert_eq!(project.name, "specific/project");
        assert_eq!(project.clone_url, "http://repo4.git");

        assert_eq!(
            provider.list_branches(&project).await.unwrap(),
            vec!["main", "dev", "feature"]
        );
        assert_eq!(provider.list_tags(&project).await.unwrap(), vec!["v1.0", "v2.0"]);
    }
}
