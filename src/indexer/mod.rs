//! Sync and indexing
//!
//! This module coordinates:
//! - Bare mirror clones and fetches of remote repositories
//! - Indexing of clones and local directories
//! - Filesystem watches on local repositories
//! - Persisted repository state and the periodic sync loop

pub mod error;
pub mod git;
pub mod manager;
pub mod process;
pub mod service;
pub mod state;
pub mod watcher;
pub mod zoekt;

pub use error::{Error, Result};
pub use git::{GitClient, SyncAction};
pub use manager::{RepositoryManager, SyncOutcome, SyncSummary};
pub use service::SyncService;
pub use state::{RepositoryState, StateStore};
pub use watcher::{WatchEvent, WatchState, WatcherRegistry};
pub use zoekt::IndexInvoker;
