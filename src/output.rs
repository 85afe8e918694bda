//! Output formatting utilities

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tabled::{Table, Tabled};

use crate::indexer::RepositoryState;
use crate::repository::Repository;

/// Create a spinner for indeterminate operations
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(spinner_style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("[OK]").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("[ERROR]").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("[WARN]").yellow().bold(), message);
}

/// Print a table
pub fn table<T: Tabled>(items: &[T], title: Option<&str>) {
    if let Some(t) = title {
        println!("\n{}\n", style(t).bold());
    }

    if items.is_empty() {
        println!("{}", style("  (no items)").dim());
    } else {
        println!("{}", Table::new(items));
    }
}

/// One discovered repository.
#[derive(Tabled)]
pub struct RepositoryRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Type")]
    pub vcs: String,
    #[tabled(rename = "Revisions")]
    pub revisions: String,
    #[tabled(rename = "Path")]
    pub path: String,
}

impl From<&Repository> for RepositoryRow {
    fn from(repo: &Repository) -> Self {
        let revisions = match repo {
            Repository::Remote(r) => r.index_revisions().join(","),
            Repository::Local(_) => "-".to_string(),
        };
        Self {
            id: repo.id().to_string(),
            vcs: format!("{:?}", repo.vcs()).to_lowercase(),
            revisions,
            path: repo.path().display().to_string(),
        }
    }
}

/// One entry of the state store.
#[derive(Tabled)]
pub struct StateRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Last synced")]
    pub last_synced: String,
    #[tabled(rename = "Last indexed")]
    pub last_indexed: String,
}

impl From<&RepositoryState> for StateRow {
    fn from(state: &RepositoryState) -> Self {
        let status = match (&state.error, state.repository.is_stale()) {
            (_, true) => "stale".to_string(),
            (Some(e), false) => format!("error: {e}"),
            (None, false) if state.last_indexed.is_some() => "indexed".to_string(),
            (None, false) => "pending".to_string(),
        };
        let when = |at: Option<chrono::DateTime<chrono::Utc>>| {
            at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string())
        };
        Self {
            id: state.key().to_string(),
            status,
            last_synced: when(state.last_synced),
            last_indexed: when(state.last_indexed),
        }
    }
}
