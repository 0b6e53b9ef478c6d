//! # archgov CLI Module
//!
//! Command-line interface for the governance pipeline.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `run` - Execute one governance run
//! - `list` - List catalog records
//! - `check` - Rule check over the whole catalog
//! - `import` - Load a JSON catalog into the redb store
//! - `init` - Create a new redb store
//! - `verify` - Check a run archive and print its digests

mod commands;

use crate::config::AppConfig;
use archgov_core::GovernanceError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// archgov - Architecture Governance Pipeline
///
/// Looks up an application, checks it against compliance rules, assesses
/// risk, recommends remediation and reports the result.
#[derive(Parser, Debug)]
#[command(name = "archgov")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the config file (default: ./archgov.toml if present)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to a redb record store; overrides the configured backend
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Execute one governance run
    Run {
        /// Case-insensitive substring of the application name
        #[arg(short, long)]
        name: Option<String>,

        /// Exact record id
        #[arg(short, long)]
        id: Option<String>,

        /// Write the run archive to this file
        #[arg(short, long)]
        archive: Option<PathBuf>,
    },

    /// List catalog records
    List {
        /// Case-insensitive substring of the application name
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Check every catalog record against the rule table
    Check,

    /// Import a JSON catalog into the redb store
    Import {
        /// Path to the catalog file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Initialize a new redb store
    Init {
        /// Overwrite an existing database
        #[arg(short, long)]
        force: bool,

        /// Load the built-in sample catalog
        #[arg(short, long)]
        sample: bool,
    },

    /// Verify a run archive and print its digests
    Verify {
        /// Path to the archive file
        #[arg(short, long)]
        archive: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), GovernanceError> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let database = cli.database.as_deref();
    let json_mode = cli.json_mode;
    if cli.verbose {
        tracing::info!(?config, "effective configuration");
    }

    match cli.command {
        Some(Commands::Server { host, port }) => cmd_server(&config, database, &host, port).await,
        Some(Commands::Run { name, id, archive }) => {
            cmd_run(&config, database, json_mode, name, id, archive.as_deref()).await
        }
        Some(Commands::List { filter }) => {
            cmd_list(&config, database, json_mode, filter.as_deref())
        }
        Some(Commands::Check) => cmd_check(&config, database, json_mode),
        Some(Commands::Import { file }) => cmd_import(&config, database, &file),
        Some(Commands::Init { force, sample }) => cmd_init(&config, database, force, sample),
        Some(Commands::Verify { archive }) => cmd_verify(&archive, json_mode),
        None => {
            // No subcommand - list the catalog by default
            cmd_list(&config, database, json_mode, None)
        }
    }
}
