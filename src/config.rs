//! Configuration management

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Prefix of every environment variable the configuration reads.
pub const ENV_PREFIX: &str = "ARCHIPELAGO_";

/// A credential given literally or by environment variable name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Token {
    /// `"token": "ghp_..."`
    Literal(String),
    /// `"token": { "env": "GITHUB_TOKEN" }`
    Env {
        /// Variable holding the secret.
        env: String,
    },
}

impl Token {
    /// The secret value. A missing environment variable is a configuration error.
    pub fn resolve(&self) -> Result<String> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Env { env } => std::env::var(env).map_err(|_| {
                Error::Config(format!("environment variable {env} referenced by token is not set"))
            }),
        }
    }
}

/// Branch and tag patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevisionsConfig {
    pub branches: Vec<String>,
    pub tags: Vec<String>,
}

/// Exclusions for GitHub and Gitea sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoExclude {
    pub forks: bool,
    pub archived: bool,
    /// Names or globs (`owner/name`).
    pub repos: Vec<String>,
}

/// Exclusions for GitLab sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectExclude {
    pub forks: bool,
    pub archived: bool,
    /// Names or globs (`group/project`).
    pub projects: Vec<String>,
}

/// Exclusions for Gerrit sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GerritExclude {
    pub projects: Vec<String>,
}

/// Exclusions for local sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalExclude {
    /// Directory names skipped by the indexer.
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSourceConfig {
    /// API base; defaults to `https://api.github.com`.
    pub url: Option<String>,
    pub token: Option<Token>,
    pub orgs: Vec<String>,
    pub users: Vec<String>,
    /// Explicit `owner/name` repositories.
    pub repos: Vec<String>,
    pub exclude: RepoExclude,
    pub revisions: RevisionsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitLabSourceConfig {
    /// Instance URL; defaults to `https://gitlab.com`.
    pub url: Option<String>,
    pub token: Option<Token>,
    /// Every project visible to the token. Ignored on gitlab.com.
    pub all: bool,
    /// Groups, subgroups included.
    pub groups: Vec<String>,
    pub users: Vec<String>,
    /// Explicit `group/project` paths.
    pub projects: Vec<String>,
    pub exclude: ProjectExclude,
    pub revisions: RevisionsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GiteaSourceConfig {
    /// Instance URL; defaults to `https://gitea.com`.
    pub url: Option<String>,
    pub token: Option<Token>,
    pub orgs: Vec<String>,
    pub users: Vec<String>,
    pub repos: Vec<String>,
    pub exclude: RepoExclude,
    pub revisions: RevisionsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GerritSourceConfig {
    pub url: String,
    /// Include list of names or globs; empty includes everything.
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub exclude: GerritExclude,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSourceConfig {
    /// Absolute, or relative to the configuration file.
    pub path: String,
    #[serde(default = "default_true")]
    pub watch: bool,
    #[serde(default)]
    pub exclude: LocalExclude,
}

/// One configured repository source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RepoSourceConfig {
    GitHub(GitHubSourceConfig),
    GitLab(GitLabSourceConfig),
    Gitea(GiteaSourceConfig),
    Gerrit(GerritSourceConfig),
    Local(LocalSourceConfig),
}

impl RepoSourceConfig {
    /// Source type as written in the configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GitHub(_) => "github",
            Self::GitLab(_) => "gitlab",
            Self::Gitea(_) => "gitea",
            Self::Gerrit(_) => "gerrit",
            Self::Local(_) => "local",
        }
    }
}

/// Sync and indexing knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Files larger than this many bytes are not indexed.
    pub max_file_size: u64,
    /// Delete clones and shards of repositories that disappeared from the sources.
    pub auto_delete_stale_repos: bool,
    pub reindex_interval_ms: u64,
    pub resync_interval_ms: u64,
    pub max_concurrent_syncs: usize,
    /// Indexer for plain directories.
    pub index_command: String,
    /// Indexer for git repositories.
    pub git_index_command: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_file_size: 2 * 1024 * 1024,
            auto_delete_stale_repos: true,
            reindex_interval_ms: 60 * 60 * 1000,
            resync_interval_ms: 24 * 60 * 60 * 1000,
            max_concurrent_syncs: 4,
            index_command: "zoekt-index".to_string(),
            git_index_command: "zoekt-git-index".to_string(),
        }
    }
}

impl Settings {
    pub fn reindex_interval(&self) -> Duration {
        Duration::from_millis(self.reindex_interval_ms.max(1))
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.resync_interval_ms.max(1))
    }
}

/// Usage event capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub disabled: bool,
    /// Stable installation id; generated and persisted when absent.
    pub install_id: Option<String>,
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            install_id: None,
            endpoint: "https://us.i.posthog.com/capture/".to_string(),
            api_key: None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for clones, index shards and state.
    pub data_dir: PathBuf,
    /// Repository sources.
    pub repos: Vec<RepoSourceConfig>,
    pub settings: Settings,
    pub telemetry: TelemetryConfig,
    /// Directory relative local paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            repos: Vec::new(),
            settings: Settings::default(),
            telemetry: TelemetryConfig::default(),
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Platform data directory, or `.archipelago` when none can be determined.
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("dev", "archipelago", "archipelago")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".archipelago"))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

fn env_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

impl Config {
    /// Load from `path`, or from `ARCHIPELAGO_CONFIG`, or from the environment alone.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = env_var("CONFIG").map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let mut config: Self = if path
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false)
        {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };

        let parent = path.parent().unwrap_or(Path::new("."));
        config.base_dir = std::path::absolute(parent).unwrap_or_else(|_| parent.to_path_buf());
        if config.data_dir.is_relative() {
            config.data_dir = config.base_dir.join(&config.data_dir);
        }
        Ok(config)
    }

    /// Overlay `ARCHIPELAGO_*` variables.
    pub fn apply_env(&mut self) {
        if let Some(val) = env_var("DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }
        if let Some(val) = env_var("MAX_FILE_SIZE").and_then(|v| v.parse().ok()) {
            self.settings.max_file_size = val;
        }
        if let Some(val) = env_var("MAX_CONCURRENT_SYNCS").and_then(|v| v.parse().ok()) {
            self.settings.max_concurrent_syncs = val;
        }
        if let Some(val) = env_var("TELEMETRY_DISABLED") {
            self.telemetry.disabled = env_flag(&val);
        }
        if let Some(val) = env_var("INSTALL_ID") {
            self.telemetry.install_id = Some(val);
        }
        if let Some(val) = env_var("POSTHOG_KEY") {
            self.telemetry.api_key = Some(val);
        }
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.data_dir.join("repos")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }
}
