//! Base traits and types for code host connectors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use super::error::{ProviderError, Result};
use crate::repository::CodeHost;

/// Where to look for repositories on a code host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Scope {
    /// Organization (GitHub, Gitea).
    Org(String),
    /// Group, subgroups included (GitLab).
    Group(String),
    /// User namespace.
    User(String),
    /// Everything visible to the configured credentials.
    All,
}

impl Scope {
    /// Short description for log lines.
    pub fn describe(&self) -> String {
        match self {
            Self::Org(name) => format!("org {name}"),
            Self::Group(name) => format!("group {name}"),
            Self::User(name) => format!("user {name}"),
            Self::All => "all repositories".to_string(),
        }
    }
}

/// Provider record reduced to the fields the normalizer consumes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRepository {
    /// Provider-native unique identifier, used to de-duplicate listings.
    pub native_id: String,
    /// Namespace path (`owner/name`, `group/sub/project`).
    pub name: String,
    /// HTTPS clone URL.
    pub clone_url: String,
    /// Browser URL, if the provider reports one.
    pub web_url: Option<String>,
    pub is_fork: bool,
    pub is_archived: bool,
    pub is_public: bool,
    /// Provider reports the repository as hidden, moved or otherwise unreachable.
    pub is_stale: bool,
    /// Provider-specific `zoekt.*` hints (stars, forks, ...).
    pub extra_metadata: Vec<(String, String)>,
}

/// Capability set every code host connector implements.
#[async_trait]
pub trait GitProvider: Send + Sync {
    /// Which code host this connector talks to.
    fn code_host(&self) -> CodeHost;

    /// Get the provider name.
    fn provider_name(&self) -> &'static str {
        self.code_host().as_str()
    }

    /// Host name used as the repository id prefix.
    fn host(&self) -> &str;

    /// Get the base URL.
    fn base_url(&self) -> &str;

    /// Build authentication headers for API requests.
    fn build_auth_headers(&self) -> HeaderMap;

    /// List every repository in `scope`.
    async fn list_for_scope(&self, scope: &Scope) -> Result<Vec<RawRepository>>;

    /// Fetch a single project by its qualified name.
    async fn get_project(&self, identifier: &str) -> Result<RawRepository>;

    /// Names of all branches of `project`.
    async fn list_branches(&self, project: &RawRepository) -> Result<Vec<String>>;

    /// Names of all tags of `project`.
    async fn list_tags(&self, project: &RawRepository) -> Result<Vec<String>>;
}

/// Configuration for a connector's HTTP plumbing.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL for the API.
    pub base_url: String,
    /// API token.
    pub token: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Base implementation helper for connectors.
#[derive(Debug, Clone)]
pub struct BaseProvider {
    /// Provider name used in error messages.
    pub provider: &'static str,
    /// HTTP client with connection pooling.
    pub client: Client,
    /// Base URL for the API, without trailing slash.
    pub base_url: String,
    /// API token.
    pub token: Option<String>,
}

impl BaseProvider {
    /// Create a new base provider.
    pub fn new(provider: &'static str, config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .user_agent(concat!("archipelago/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ProviderError::HttpError)?;

        Ok(Self {
            provider,
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    /// Make a GET request with query parameters.
    pub async fn get(
        &self,
        path: &str,
        headers: HeaderMap,
        params: &[(&str, &str)],
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .headers(headers)
            .query(params)
            .send()
            .await?;
        self.check_response(path, response).await
    }

    /// Check response status and return error if not successful.
    pub async fn check_response(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let provider = self.provider.to_string();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound {
                provider,
                resource: path.to_string(),
            });
        }

        let reason = status.canonical_reason().unwrap_or("unknown status");

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::AuthenticationError {
                provider,
                message: format!("{} on {path}", reason),
            });
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            reason.to_string()
        } else {
            format!("{reason}: {body}")
        };
        Err(ProviderError::ApiError {
            provider,
            status: status.as_u16(),
            message,
        })
    }
}

/// Host component of `url`, or `fallback` when it has none.
pub fn host_of(url: &str, fallback: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_provider_config_default() {
        let config = ProviderConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.token.is_none());
    }

    #[test]
    fn test_base_provider_trims_trailing_slash() {
        let config = ProviderConfig {
            base_url: "https://api.github.com/".to_string(),
            ..Default::default()
        };

        let provider = BaseProvider::new("github", config).unwrap();
        assert_eq!(provider.base_url, "https://api.github.com");
    }

    #[test]
    fn test_scope_describe() {
        assert_eq!(Scope::Org("acme".to_string()).describe(), "org acme");
        assert_eq!(Scope::All.describe(), "all repositories");
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://github.example.com/org/repo.git", "github.com"),
            "github.example.com"
        );
        assert_eq!(host_of("not a url", "github.com"), "github.com");
    }

    #[tokio::test]
    async fn test_check_response_maps_statuses() {
        let mock_server = MockServer::start().await;
        for (status, route) in [(404, "/missing"), (401, "/denied"), (500, "/broken")] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
                .mount(&mock_server)
                .await;
        }

        let provider = BaseProvider::new(
            "gitea",
            ProviderConfig {
                base_url: mock_server.uri(),
                ..Default::default()
            },
        )
        .unwrap();

        let err = provider.get("/missing", HeaderMap::new(), &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));

        let err = provider.get("/denied", HeaderMap::new(), &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationError { .. }));

        let err = provider.get("/broken", HeaderMap::new(), &[]).await.unwrap_err();
        match err {
            ProviderError::ApiError {
                provider,
                status,
                message,
            } => {
                assert_eq!(provider, "gitea");
                assert_eq!(status, 500);
                assert!(message.contains("nope"));
            }
            e => panic!("Expected ApiError, got {:?}", e),
        }
    }
}
