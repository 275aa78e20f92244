//! # juris CLI
//!
//! Search the TJSP jurisprudence portal, download decision PDFs, and query a
//! local corpus of decisions.
//!
//! ## Usage
//!
//! ```bash
//! juris --config ./config/juris.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `juris search <term>` | Search the portal (falls back to example decisions) |
//! | `juris download <term>` | Search, then download every decision PDF found |
//! | `juris fetch <url> <filename>` | Download a single PDF |
//! | `juris query <query>` | Rank the local corpus against a query |
//! | `juris cnj <number>` | Validate and decompose a CNJ case number |
//!
//! Logging is controlled with `RUST_LOG` (default `info`) and goes to
//! stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use jurisprudencia::commands;
use jurisprudencia::config::{self, Config};

const DEFAULT_CONFIG: &str = "./config/juris.toml";

#[derive(Parser)]
#[command(
    name = "juris",
    about = "Acquire and search Brazilian court decisions",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/juris.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the portal for decisions.
    Search {
        term: String,
        /// Maximum number of decisions.
        #[arg(long, default_value_t = 10)]
        max: usize,
    },

    /// Search the portal and download the PDF of every decision found.
    Download {
        term: String,
        #[arg(long, default_value_t = 10)]
        max: usize,
    },

    /// Download one PDF into the configured download directory.
    Fetch { url: String, filename: String },

    /// Query the local corpus.
    Query {
        query: String,
        /// Number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Validate a CNJ case number.
    Cnj { number: String },
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => config::load_config(p),
        None if Path::new(DEFAULT_CONFIG).exists() => config::load_config(Path::new(DEFAULT_CONFIG)),
        None => {
            info!("no config file at {DEFAULT_CONFIG}, using defaults");
            Ok(Config::default())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Search { term, max } => {
            let cfg = resolve_config(config_path)?;
            commands::run_search(&cfg, &term, max, json).await
        }
        Commands::Download { term, max } => {
            let cfg = resolve_config(config_path)?;
            commands::run_download(&cfg, &term, max, json).await
        }
        Commands::Fetch { url, filename } => {
            let cfg = resolve_config(config_path)?;
            commands::run_fetch(&cfg, &url, &filename, json).await
        }
        Commands::Query { query, top_k } => {
            let cfg = resolve_config(config_path)?;
            commands::run_query(&cfg, &query, top_k, json).await
        }
        // Needs no configuration.
        Commands::Cnj { number } => commands::run_cnj(&number, json),
    }
}
