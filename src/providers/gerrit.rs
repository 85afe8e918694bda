//! Gerrit REST connector.
//!
//! Gerrit prefixes every JSON body with `)]}'` to defeat cross-site script
//! inclusion; the prefix is stripped before parsing. Projects come back as a
//! single unpaginated map keyed by project name.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::base::{BaseProvider, GitProvider, ProviderConfig, RawRepository, Scope, host_of};
use super::error::{ProviderError, Result};
use crate::repository::CodeHost;

/// Anti-XSSI prefix Gerrit puts in front of JSON bodies.
const XSSI_PREFIX: &str = ")]}'";

/// Meta projects every Gerrit server carries; never indexed.
const META_PROJECTS: [&str; 2] = ["All-Projects", "All-Users"];

#[derive(Debug, Deserialize)]
struct GerritProject {
    id: String,
    name: Option<String>,
    state: Option<String>,
    #[serde(default)]
    web_links: Vec<GerritWebLink>,
}

#[derive(Debug, Deserialize)]
struct GerritWebLink {
    name: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct GerritRef {
    #[serde(rename = "ref")]
    name: String,
}

/// Strip the anti-XSSI prefix and parse the remainder.
fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T> {
    let json = body.trim_start().strip_prefix(XSSI_PREFIX).unwrap_or(body);
    Ok(serde_json::from_str(json)?)
}

/// Gerrit REST connector.
#[derive(Debug, Clone)]
pub struct GerritProvider {
    base: BaseProvider,
    host: String,
}

impl GerritProvider {
    /// Create a new Gerrit provider. The URL is required.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(ProviderError::ConfigurationError(
                "Gerrit provider requires a url".to_string(),
            ));
        }
        let host = host_of(&config.base_url, &config.base_url);
        let base = BaseProvider::new("gerrit", config)?;
        Ok(Self { base, host })
    }

    /// Create a new Gerrit provider for `url`.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        Self::new(ProviderConfig {
            base_url: base_url.into(),
            ..Default::default()
        })
    }

    fn parse_repository(&self, name: String, project: GerritProject) -> RawRepository {
        let web_url = project
            .web_links
            .into_iter()
            .find(|link| link.name == "gitiles")
            .map(|link| link.url);
        let state = project.state.as_deref().unwrap_or("ACTIVE");

        RawRepository {
            native_id: project.id,
            clone_url: format!("{}/{}", self.base.base_url, name),
            name,
            web_url,
            is_fork: false,
            is_archived: state == "READ_ONLY",
            is_public: true,
            is_stale: state == "HIDDEN",
            extra_metadata: Vec::new(),
        }
    }

    /// GET `path` and parse the prefixed body. Failures name the status text.
    async fn fetch<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let url = format!("{}{}", self.base.base_url, path);
        let response = self
            .base
            .client
            .get(&url)
            .headers(self.build_auth_headers())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ApiError {
                provider: self.provider_name().to_string(),
                status: status.as_u16(),
                message: format!(
                    "Failed to fetch {} from Gerrit: {}",
                    what,
                    status.canonical_reason().unwrap_or("unknown status")
                ),
            });
        }

        parse_body(&response.text().await?)
    }

    /// Short names of the refs under `prefix`, from `/projects/<name>/<endpoint>/`.
    async fn list_ref_names(
        &self,
        project: &RawRepository,
        endpoint: &str,
        prefix: &str,
    ) -> Result<Vec<String>> {
        let path = format!("/projects/{}/{}/", urlencoding::encode(&project.name), endpoint);
        let refs: Vec<GerritRef> = self.fetch(&path, endpoint).await?;
        Ok(refs
            .into_iter()
            .filter_map(|r| r.name.strip_prefix(prefix).map(str::to_string))
            .collect())
    }
}

#[async_trait]
impl GitProvider for GerritProvider {
    fn code_host(&self) -> CodeHost {
        CodeHost::Gerrit
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
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers
    }

    /// Gerrit has no owners; every scope lists the whole server.
    async fn list_for_scope(&self, _scope: &Scope) -> Result<Vec<RawRepository>> {
        let projects: BTreeMap<String, GerritProject> = self.fetch("/projects/", "projects").await?;

        Ok(projects
            .into_iter()
            .filter(|(name, _)| !META_PROJECTS.contains(&name.as_str()))
            .map(|(name, project)| self.parse_repository(name, project))
            .collect())
    }

    async fn get_project(&self, identifier: &str) -> Result<RawRepository> {
        let path = format!("/projects/{}", urlencoding::encode(identifier));
        let project: GerritProject = self.fetch(&path, "project").await?;
        let name = project
            .name
            .clone()
            .unwrap_or_else(|| identifier.to_string());
        Ok(self.parse_repository(name, project))
    }

    async fn list_branches(&self, project: &RawRepository) -> Result<Vec<String>> {
        self.list_ref_names(project, "branches", "refs/heads/").await
    }

    async fn list_tags(&self, project: &RawRepository) -> Result<Vec<String>> {
        self.list_ref_names(project, "tags", "refs/tags/").await
    }
}
