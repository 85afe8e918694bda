//! Archipelago CLI - Main entry point

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use archipelago::Config;
use archipelago::commands::{self, OutputFormat};

#[derive(Parser)]
#[command(name = "archipelago")]
#[command(version, about = "Archipelago - repository discovery, mirroring and indexing")]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Path to configuration file (JSON or YAML)
    #[arg(long, global = true, env = "ARCHIPELAGO_CONFIG")]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured source and list the repositories found
    Discover,

    /// Clone/fetch and index repositories once
    Sync {
        /// Only this repository id
        #[arg(long)]
        id: Option<String>,
    },

    /// Keep repositories synced and indexed until interrupted
    Run,

    /// Show tracked repositories
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.debug {
        EnvFilter::from_default_env().add_directive("archipelago=debug".parse()?)
    } else {
        EnvFilter::from_default_env().add_directive("archipelago=info".parse()?)
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Discover => {
            commands::discover(&config, cli.format).await?;
        }
        Commands::Sync { id } => {
            commands::sync(&config, id.as_deref()).await?;
        }
        Commands::Run => {
            commands::run(&config).await?;
        }
        Commands::Status => {
            commands::show_status(&config, cli.format).await?;
        }
    }

    Ok(())
}
