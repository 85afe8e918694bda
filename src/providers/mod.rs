#![allow(clippy::collapsible_if)]
//! Repository connectors for archipelago.
//!
//! Each remote connector implements [`GitProvider`] for one code host:
//!
//! - **GitHub** - github.com and GitHub Enterprise
//! - **GitLab** - gitlab.com and self-hosted instances
//! - **Gitea** - gitea.com, self-hosted Gitea and Forgejo
//! - **Gerrit** - any Gerrit server
//!
//! A [`Connector`] pairs a provider with a source's selection and produces
//! canonical repositories; [`local`] handles sources on the local filesystem.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use archipelago::providers::{Connector, GitHubProvider, Scope, SourceSpec};
//!
//! #[tokio::main]
//! async fn main() -> archipelago::providers::Result<()> {
//!     let provider = Arc::new(GitHubProvider::with_token("your-token")?);
//!     let spec = SourceSpec {
//!         scopes: vec![Scope::Org("rust-lang".to_string())],
//!         ..Default::default()
//!     };
//!
//!     let connector = Connector::new(provider, spec, Path::new("/var/lib/archipelago/repos"));
//!     for repo in connector.discover().await? {
//!         println!("{} -> {}", repo.id, repo.path.display());
//!     }
//!     Ok(())
//! }
//! ```

pub mod base;
pub mod connector;
pub mod error;
pub mod factory;
pub mod filter;
pub mod gerrit;
pub mod gitea;
pub mod github;
pub mod gitlab;
pub mod local;
pub mod pagination;

// Re-export main types
pub use base::{BaseProvider, GitProvider, ProviderConfig, RawRepository, Scope};
pub use connector::{Connector, SourceSpec};
pub use error::{ProviderError, Result};
pub use factory::{ProviderType, connector_for, create_provider};
pub use filter::{NameFilter, Normalizer, RepoPredicates, resolve_revisions};
pub use gerrit::GerritProvider;
pub use gitea::GiteaProvider;
pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;
pub use local::{LocalPathError, local_repository};
