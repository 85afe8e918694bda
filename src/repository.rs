//! Canonical repository model shared by every connector.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Code host a remote repository was discovered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeHost {
    /// github.com or GitHub Enterprise
    GitHub,
    /// gitlab.com or self-hosted GitLab
    GitLab,
    /// Gitea / Forgejo
    Gitea,
    /// Gerrit code review
    Gerrit,
}

impl CodeHost {
    /// Lowercase provider name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
            Self::Gitea => "gitea",
            Self::Gerrit => "gerrit",
        }
    }

    /// Fallback web link when the provider does not report one.
    pub fn homepage(&self) -> &'static str {
        match self {
            Self::GitHub => "https://github.com/",
            Self::GitLab => "https://gitlab.com/",
            Self::Gitea => "https://gitea.com/",
            Self::Gerrit => "https://www.gerritcodereview.com/",
        }
    }

    /// Value written under `zoekt.web-url-type`.
    pub fn web_url_type(&self) -> &'static str {
        match self {
            Self::Gerrit => "gitiles",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for CodeHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vcs {
    /// Mirrored from a code host.
    Remote,
    /// Already present on the local filesystem.
    Local,
}

/// A repository mirrored from a code host into `<repos_root>/<id>.git`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepository {
    /// `<host>/<namespace path>`.
    pub id: String,
    /// Provider-native name, e.g. `group/project`.
    pub name: String,
    /// Where the repository was discovered.
    pub code_host: CodeHost,
    /// URL handed to `git clone`.
    pub clone_url: String,
    /// Bare clone location.
    pub path: PathBuf,
    #[serde(default)]
    pub is_fork: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_stale: bool,
    /// Entries written into the clone's git config (indexing hints).
    #[serde(default)]
    pub git_config_metadata: BTreeMap<String, String>,
    /// Branch names resolved from the configured patterns.
    #[serde(default)]
    pub branches: Vec<String>,
    /// Tag names resolved from the configured patterns.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RemoteRepository {
    /// Deterministic clone location for `id` under `repos_root`.
    pub fn clone_path(repos_root: &Path, id: &str) -> PathBuf {
        repos_root.join(format!("{id}.git"))
    }

    /// Revisions handed to the indexer: `HEAD`, then branches, then tags.
    ///
    /// `HEAD` stands for the default branch so it is always indexed, whether
    /// or not a pattern selected it.
    pub fn index_revisions(&self) -> Vec<String> {
        let mut revisions = vec!["HEAD".to_string()];
        for rev in self.branches.iter().chain(self.tags.iter()) {
            if !revisions.contains(rev) {
                revisions.push(rev.clone());
            }
        }
        revisions
    }
}

/// A repository that lives on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRepository {
    /// Absolute resolved path, same as `path`.
    pub id: String,
    /// Last path component.
    pub name: String,
    /// Absolute resolved path.
    pub path: PathBuf,
    /// Directory names excluded from indexing, on top of the built-in set.
    #[serde(default)]
    pub excluded_paths: Vec<String>,
    /// Subscribe to filesystem change notifications.
    #[serde(default)]
    pub watch: bool,
    #[serde(default)]
    pub is_stale: bool,
}

/// Canonical repository, independent of the originating provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "vcs", rename_all = "lowercase")]
pub enum Repository {
    /// Mirrored from a code host.
    Remote(RemoteRepository),
    /// Present on disk.
    Local(LocalRepository),
}

impl Repository {
    /// Globally unique id.
    pub fn id(&self) -> &str {
        match self {
            Self::Remote(r) => &r.id,
            Self::Local(r) => &r.id,
        }
    }

    /// Human readable name.
    pub fn name(&self) -> &str {
        match self {
            Self::Remote(r) => &r.name,
            Self::Local(r) => &r.name,
        }
    }

    /// Discriminator.
    pub fn vcs(&self) -> Vcs {
        match self {
            Self::Remote(_) => Vcs::Remote,
            Self::Local(_) => Vcs::Local,
        }
    }

    /// On-disk location (bare clone or source directory).
    pub fn path(&self) -> &Path {
        match self {
            Self::Remote(r) => &r.path,
            Self::Local(r) => &r.path,
        }
    }

    pub fn is_stale(&self) -> bool {
        match self {
            Self::Remote(r) => r.is_stale,
            Self::Local(r) => r.is_stale,
        }
    }

    pub fn set_stale(&mut self, stale: bool) {
        match self {
            Self::Remote(r) => r.is_stale = stale,
            Self::Local(r) => r.is_stale = stale,
        }
    }
}

impl From<RemoteRepository> for Repository {
    fn from(repo: RemoteRepository) -> Self {
        Self::Remote(repo)
    }
}

impl From<LocalRepository> for Repository {
    fn from(repo: LocalRepository) -> Self {
        Self::Local(repo)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_clone_path_nests_id_under_root() {
        let path = RemoteRepository::clone_path(Path::new("/data/repos"), "github.com/org/repo");
        assert_eq!(path, PathBuf::from("/data/repos/github.com/org/repo.git"));
    }

    #[test]
    fn test_index_revisions_prefixes_head() {
        let mut repo = remote("github.com/org/repo");
        repo.branches = vec!["b1".to_string(), "b2".to_string()];
        repo.tags = vec!["t1".to_string()];

        assert_eq!(repo.index_revisions(), vec!["HEAD", "b1", "b2", "t1"]);
    }

    #[test]
    fn test_index_revisions_without_patterns_is_head_only() {
        let repo = remote("github.com/org/repo");
        assert_eq!(repo.index_revisions(), vec!["HEAD"]);
    }

    #[test]
    fn test_index_revisions_drops_duplicates() {
        let mut repo = remote("github.com/org/repo");
        repo.branches = vec!["main".to_string(), "HEAD".to_string()];
        repo.tags = vec!["main".to_string()];

        assert_eq!(repo.index_revisions(), vec!["HEAD", "main"]);
    }

    #[test]
    fn test_repository_accessors() {
        let mut repo: Repository = remote("gitlab.com/group/project").into();
        assert_eq!(repo.id(), "gitlab.com/group/project");
        assert_eq!(repo.vcs(), Vcs::Remote);
        assert!(!repo.is_stale());

        repo.set_stale(true);
        assert!(repo.is_stale());

        let local: Repository = local(Path::new("/src/app")).into();
        assert_eq!(local.vcs(), Vcs::Local);
        assert_eq!(local.name(), "app");
        assert_eq!(local.path(), Path::new("/src/app"));
    }

    #[test]
    fn test_repository_serde_tagged_by_vcs() {
        let repo: Repository = local(Path::new("/src/app")).into();
        let json = serde_json::to_value(&repo).unwrap();
        assert_eq!(json["vcs"], "local");

        let parsed: Repository = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, repo);
    }

    #[test]
    fn test_code_host_web_url_type() {
        assert_eq!(CodeHost::GitHub.web_url_type(), "github");
        assert_eq!(CodeHost::Gerrit.web_url_type(), "gitiles");
        assert_eq!(CodeHost::Gerrit.homepage(), "https://www.gerritcodereview.com/");
    }
}
