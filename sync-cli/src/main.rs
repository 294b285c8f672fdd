//! # sync-cli
//!
//! Operator CLI over the persisted wallet sync state.
//!
//! ## Commands
//!
//! - `status`: Per-account summary of the sync bookkeeping
//! - `show`: Full state of one account as JSON
//! - `clear`: Reset one account's sync state
//! - `export`: Write a snapshot backup
//! - `import`: Validate and restore a snapshot backup
//!
//! ## Example
//!
//! ```bash
//! # Summarize every account
//! walletsync-cli status
//!
//! # Inspect one account
//! walletsync-cli show vault-2of3
//!
//! # Back up, then restore on another device
//! walletsync-cli export backup.json
//! walletsync-cli --database other.db import backup.json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{clear, export, import, show, status};

/// Inspect and repair persisted wallet sync state.
#[derive(Parser, Debug)]
#[command(name = "walletsync-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory holding sync.toml and the state database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Settings file (default: <data-dir>/sync.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State database (overrides storage.database from the settings)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Summarize the sync state of every account
    Status,

    /// Print one account's sync state as JSON
    Show {
        /// Account identifier
        account: String,
    },

    /// Reset one account's sync state (members, dedup sets, checkpoints, trust)
    Clear {
        /// Account identifier
        account: String,
    },

    /// Write the whole sync state to a JSON backup
    Export {
        /// Destination file
        file: PathBuf,
    },

    /// Replace the sync state with a validated JSON backup
    Import {
        /// Backup file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => config::default_data_dir()?,
    };
    let settings = config::load_settings(cli.config.as_deref(), &data_dir)?;
    let database = config::database_path(&settings, cli.database.as_deref(), &data_dir);
    tracing::debug!(database = %database.display(), "Opening sync state");
    let state = config::open_state(&database, &settings.storage.state_key).await?;

    match cli.command {
        Commands::Status => status::run(&state),
        Commands::Show { account } => show::run(&state, &account),
        Commands::Clear { account } => clear::run(&state, &account).await,
        Commands::Export { file } => export::run(&state, &file).await,
        Commands::Import { file } => import::run(&state, &file).await,
    }
}
