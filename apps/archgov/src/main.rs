//! # archgov - Architecture Governance Pipeline
//!
//! The main binary for the governance pipeline.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for runs and catalog management
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 apps/archgov (THE BINARY)                │
//! │                                                          │
//! │  ┌─────────────┐   ┌─────────────┐   ┌───────────────┐  │
//! │  │    CLI      │   │  HTTP API   │   │ HTTP reasoner │  │
//! │  │   (clap)    │   │   (axum)    │   │  (reqwest)    │  │
//! │  └──────┬──────┘   └──────┬──────┘   └───────┬───────┘  │
//! │         └─────────────────┼──────────────────┘          │
//! │                           ▼                              │
//! │                  ┌─────────────────┐                     │
//! │                  │  archgov-core   │                     │
//! │                  │  (THE PIPELINE) │                     │
//! │                  └─────────────────┘                     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! archgov server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! archgov list
//! archgov run --name payments --archive run.bin
//! archgov verify --archive run.bin
//! ```

use archgov::cli;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // ARCHGOV_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("ARCHGOV_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "archgov=info,archgov_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!(
        r#"
   archgov v{}

   Lookup • Validate • Assess • Recommend • Report • Evaluate
"#,
        env!("CARGO_PKG_VERSION")
    );
}
