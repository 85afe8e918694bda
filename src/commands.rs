//! CLI command implementations

use std::sync::Arc;

use clap::ValueEnum;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::Config;
use crate::discovery::discover_all;
use crate::indexer::{RepositoryManager, SyncService, SyncSummary};
use crate::output::{self, RepositoryRow, StateRow};
use crate::telemetry::Telemetry;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// Machine-readable JSON output
    Json,
}

async fn sync_service(config: &Config) -> Result<SyncService> {
    let telemetry = Telemetry::from_config(&config.telemetry, &config.data_dir).await;
    let manager = RepositoryManager::from_config(config, telemetry.clone()).await?;
    Ok(SyncService::new(config.clone(), Arc::new(manager), telemetry))
}

/// Run every connector and print the canonical repository list
pub async fn discover(config: &Config, format: OutputFormat) -> Result<()> {
    let spinner = output::spinner(&format!("Discovering {} source(s)", config.repos.len()));
    let discovery = discover_all(config).await;
    spinner.finish_and_clear();

    match format {
        OutputFormat::Json => {
            let failures: Vec<_> = discovery
                .failures
                .iter()
                .map(|f| json!({ "source": f.index, "type": f.kind, "error": f.error.to_string() }))
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "repositories": discovery.repositories,
                    "failures": failures,
                }))?
            );
        }
        OutputFormat::Text => {
            for failure in &discovery.failures {
                output::error(&format!(
                    "{} source #{}: {}",
                    failure.kind, failure.index, failure.error
                ));
            }
            let rows: Vec<RepositoryRow> =
                discovery.repositories.iter().map(RepositoryRow::from).collect();
            output::table(&rows, Some("Repositories"));
        }
    }
    Ok(())
}

/// One clone/fetch + index pass over every (or one) repository
pub async fn sync(config: &Config, id: Option<&str>) -> Result<()> {
    let service = sync_service(config).await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let spinner = output::spinner("Syncing repositories");
    let summary = service.run_once(id, &cancel).await?;
    spinner.finish_and_clear();

    if let Some(id) = id {
        if summary.indexed + summary.failed + summary.skipped + summary.cancelled == 0 {
            return Err(crate::Error::InvalidArgument(format!(
                "Repository not found: {}",
                id
            )));
        }
    }

    let message = summary_line(&summary);
    if summary.failed > 0 || summary.cancelled > 0 {
        output::warning(&message);
    } else {
        output::success(&message);
    }
    Ok(())
}

fn summary_line(summary: &SyncSummary) -> String {
    format!(
        "{} indexed, {} failed, {} skipped, {} cancelled",
        summary.indexed, summary.failed, summary.skipped, summary.cancelled
    )
}

/// Run the sync service until Ctrl-C
pub async fn run(config: &Config) -> Result<()> {
    let service = sync_service(config).await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    service.run(shutdown).await?;
    Ok(())
}

/// Print the state store
pub async fn show_status(config: &Config, format: OutputFormat) -> Result<()> {
    let manager = RepositoryManager::from_config(config, Telemetry::disabled()).await?;
    let states = manager.list_states().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&states)?),
        OutputFormat::Text => {
            let rows: Vec<StateRow> = states.iter().map(StateRow::from).collect();
            output::table(&rows, Some("Archipelago Status"));
            println!("Data dir: {:?}", config.data_dir);
        }
    }
    Ok(())
}
