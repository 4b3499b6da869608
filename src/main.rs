mod commands;

use std::path::PathBuf;

use anyhow::Result;
use aprsdb::config::{Config, config_path};
use aprsdb::log_format::TargetFirstFormat;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use commands::IngestOptions;

#[derive(Parser)]
#[command(name = "aprsdb")]
#[command(about = "Record APRS packets and relay topology into PostgreSQL", long_about = None)]
struct Cli {
    /// Configuration file (default: $HOME/aprsdb.toml, then ./aprsdb.toml)
    #[arg(short, long, global = true, env = "APRSDB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record packets read line by line from a TNC feed
    Ingest {
        /// Read from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Keep everything in memory; nothing is written to the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Set the clock offset of a past session from a trusted start time
    Calibrate {
        /// Session to calibrate
        #[arg(short, long)]
        session: i64,

        /// Trusted start time of the session (RFC 3339, e.g. 2018-01-01T12:00:00Z)
        #[arg(short, long)]
        trusted_start: DateTime<Utc>,
    },

    /// Apply pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let path = config_path(cli.config.as_deref())?;
    let config = Config::load(&path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().event_format(TargetFirstFormat::new(config.logging.ansi)))
        .init();
    info!("Using configuration {:?}", path);

    match cli.command {
        Commands::Ingest { input, dry_run } => commands::handle_ingest(config, IngestOptions { input, dry_run }).await,
        Commands::Calibrate { session, trusted_start } => {
            commands::handle_calibrate(config, session, trusted_start).await
        }
        Commands::Migrate => commands::handle_migrate(config).await,
    }
}
