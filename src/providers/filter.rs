//! Normalization of provider records and include/exclude filtering.
//!
//! Pattern semantics: a pattern matches a name when it is equal to it or when
//! it glob-matches it. `*` matches any run of characters *including* `/`, so
//! `org/*` matches `org/team/repo`. Matching is case-sensitive.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

use super::base::RawRepository;
use super::error::{ProviderError, Result};
use crate::repository::{CodeHost, RemoteRepository};

/// Git config key carrying the browser link of a repository.
pub const WEB_URL_KEY: &str = "zoekt.web-url";
/// Git config key naming the flavour of web link.
pub const WEB_URL_TYPE_KEY: &str = "zoekt.web-url-type";
/// Git config key carrying the repository id as the index name.
pub const NAME_KEY: &str = "zoekt.name";

fn compile(pattern: &str) -> Result<Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .case_insensitive(false)
        .build()
        .map_err(|source| ProviderError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Compiled list of exact names and glob patterns.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<String>,
    globs: GlobSet,
}

impl PatternSet {
    /// Compile `patterns`; an invalid glob is an error.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(compile(pattern)?);
        }
        let globs = builder.build().map_err(|source| ProviderError::Pattern {
            pattern: patterns.join(","),
            source,
        })?;
        Ok(Self {
            patterns: patterns.to_vec(),
            globs,
        })
    }

    /// A set that matches nothing.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            globs: GlobSet::empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `name` equals or glob-matches any pattern.
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p == name) || self.globs.is_match(name)
    }
}

/// Include/exclude name filter. Exclude is applied after include.
#[derive(Debug, Clone)]
pub struct NameFilter {
    include: Option<PatternSet>,
    exclude: PatternSet,
}

impl NameFilter {
    /// An empty `include` list keeps everything.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let include = if include.is_empty() {
            None
        } else {
            Some(PatternSet::new(include)?)
        };
        Ok(Self {
            include,
            exclude: PatternSet::new(exclude)?,
        })
    }

    /// A filter that keeps every name.
    pub fn allow_all() -> Self {
        Self {
            include: None,
            exclude: PatternSet::empty(),
        }
    }

    pub fn allows(&self, name: &str) -> bool {
        let included = self.include.as_ref().is_none_or(|set| set.matches(name));
        included && !self.exclude.matches(name)
    }

    pub fn apply(&self, repos: Vec<RemoteRepository>) -> Vec<RemoteRepository> {
        repos.into_iter().filter(|r| self.allows(&r.name)).collect()
    }
}

/// Fork/archive predicates; these win over any name filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepoPredicates {
    pub exclude_forks: bool,
    pub exclude_archived: bool,
}

impl RepoPredicates {
    pub fn allows(&self, repo: &RemoteRepository) -> bool {
        !(self.exclude_forks && repo.is_fork) && !(self.exclude_archived && repo.is_archived)
    }

    pub fn apply(&self, repos: Vec<RemoteRepository>) -> Vec<RemoteRepository> {
        repos.into_iter().filter(|r| self.allows(r)).collect()
    }
}

/// Match revision patterns against the refs a provider reports.
///
/// The result is the union of matches in pattern order, then ref order, with
/// duplicates removed. A pattern matching nothing contributes nothing.
pub fn resolve_revisions(patterns: &[String], refs: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut resolved = Vec::new();

    for pattern in patterns {
        let matcher = compile(pattern)?.compile_matcher();
        for name in refs {
            if (name == pattern || matcher.is_match(name)) && seen.insert(name.as_str()) {
                resolved.push(name.clone());
            }
        }
    }

    Ok(resolved)
}

/// Maps raw provider records onto the canonical remote repository shape.
#[derive(Debug, Clone)]
pub struct Normalizer {
    code_host: CodeHost,
    host: String,
    repos_root: PathBuf,
}

impl Normalizer {
    pub fn new(code_host: CodeHost, host: impl Into<String>, repos_root: &Path) -> Self {
        Self {
            code_host,
            host: host.into(),
            repos_root: repos_root.to_path_buf(),
        }
    }

    pub fn normalize(&self, raw: RawRepository) -> RemoteRepository {
        let id = format!("{}/{}", self.host, raw.name);
        let web_url = raw
            .web_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| self.code_host.homepage().to_string());

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert(
            WEB_URL_TYPE_KEY.to_string(),
            self.code_host.web_url_type().to_string(),
        );
        metadata.insert(WEB_URL_KEY.to_string(), web_url);
        metadata.insert(NAME_KEY.to_string(), id.clone());
        metadata.insert("zoekt.archived".to_string(), raw.is_archived.to_string());
        metadata.insert("zoekt.fork".to_string(), raw.is_fork.to_string());
        metadata.insert("zoekt.public".to_string(), raw.is_public.to_string());
        metadata.extend(raw.extra_metadata);

        RemoteRepository {
            path: RemoteRepository::clone_path(&self.repos_root, &id),
            id,
            name: raw.name,
            code_host: self.code_host,
            clone_url: raw.clone_url,
            is_fork: raw.is_fork,
            is_archived: raw.is_archived,
            is_stale: raw.is_stale,
            git_config_metadata: metadata,
            branches: Vec::new(),
            tags: Vec::new(),
        }
    }
}
