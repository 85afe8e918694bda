#![allow(clippy::collapsible_if, clippy::uninlined_format_args)]
//! Archipelago - repository discovery, mirroring and indexing
//!
//! This crate provides:
//! - **providers**: connectors for GitHub, GitLab, Gitea, Gerrit and local paths,
//!   with pagination, normalization and include/exclude filtering
//! - **discovery**: combined discovery across every configured source
//! - **indexer**: bare mirror sync, index invocation, filesystem watches,
//!   persisted state and the long-running sync service
//! - **telemetry**: anonymous usage events
//!
//! # Example
//!
//! ```rust,no_run
//! use archipelago::{Config, discovery::discover_all};
//!
//! # async fn example() -> archipelago::Result<()> {
//! let config = Config::from_file(std::path::Path::new("archipelago.yaml"))?;
//! let discovery = discover_all(&config).await;
//! for repo in &discovery.repositories {
//!     println!("{} at {}", repo.id(), repo.path().display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod indexer;
pub mod output;
pub mod providers;
pub mod repository;
pub mod telemetry;

// Re-export provider types
pub use providers::{
    Connector, GerritProvider, GitHubProvider, GitLabProvider, GitProvider, GiteaProvider,
    ProviderError,
};

// Re-export indexer types
pub use indexer::{RepositoryManager, RepositoryState, SyncService, WatcherRegistry};

pub use config::Config;
pub use error::{Error, Result};
pub use repository::{CodeHost, LocalRepository, RemoteRepository, Repository, Vcs};

/// Prelude for commonly used types
pub mod prelude {
    pub use crate::config::{Config, RepoSourceConfig};
    pub use crate::discovery::{Discovery, discover_all};
    pub use crate::error::{Error, Result};
    pub use crate::indexer::{RepositoryManager, SyncService, WatcherRegistry};
    pub use crate::providers::{Connector, GitProvider, Scope, SourceSpec};
    pub use crate::repository::{LocalRepository, RemoteRepository, Repository};
}
