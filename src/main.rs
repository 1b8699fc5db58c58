//! # QA Agent CLI (`qa-agent`)
//!
//! ## Usage
//!
//! ```bash
//! qa-agent --config ./config/qa-agent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qa-agent serve` | Start the HTTP server |
//! | `qa-agent init` | Create the staging directory and ensure the vector index exists |
//! | `qa-agent inspect <file>` | Extract and chunk a local file without embedding it |
//!
//! When the config file does not exist, built-in defaults are used.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use qa_agent::chunk::RecursiveSplitter;
use qa_agent::config::{self, Config};
use qa_agent::extract::FileKind;
use qa_agent::ingest::{extract_upload, Ingestor};
use qa_agent::models::{META_PAGE, META_SOURCE};
use qa_agent::server;
use qa_agent::vector_index::create_index;

/// QA Agent: turn product documents into grounded test cases and
/// Selenium scripts.
#[derive(Parser)]
#[command(name = "qa-agent", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/qa-agent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Runs until Ctrl-C or SIGTERM. Knowledge bases live in memory and are
    /// lost when the server stops.
    Serve,

    /// Create the staging directory and make sure the vector index exists.
    ///
    /// Safe to run repeatedly.
    Init,

    /// Extract and chunk a local file, printing what an upload would index.
    ///
    /// Nothing is staged, embedded or stored.
    Inspect {
        /// File to inspect.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => server::run_server(cfg).await?,
        Commands::Init => run_init(&cfg).await?,
        Commands::Inspect { file } => run_inspect(&cfg, &file).await?,
    }

    Ok(())
}

fn load_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        info!("No config at {}; using defaults", path.display());
        Ok(Config::minimal())
    }
}

async fn run_init(cfg: &Config) -> anyhow::Result<()> {
    Ingestor::new(cfg.staging.dir.clone())
        .prepare()
        .await
        .with_context(|| format!("Failed to create {}", cfg.staging.dir.display()))?;
    println!("Staging directory ready: {}", cfg.staging.dir.display());

    let index = create_index(&cfg.vector_index).await?;
    println!("Vector index ready: {}", index.describe());
    Ok(())
}

async fn run_inspect(cfg: &Config, file: &Path) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let kind = FileKind::from_name(&name);

    let documents = extract_upload(&name, file, bytes).await;
    let chunks = RecursiveSplitter::from_config(&cfg.chunking).split_documents(&documents);

    println!("File: {} ({})", name, kind.content_type());
    println!("Documents: {}", documents.len());
    for (i, doc) in documents.iter().enumerate() {
        let page = doc
            .metadata
            .get(META_PAGE)
            .map(|p| format!(" page {}", p))
            .unwrap_or_default();
        println!(
            "  [{}]{} {} chars from {}",
            i,
            page,
            doc.content.chars().count(),
            doc.metadata.get(META_SOURCE).map(String::as_str).unwrap_or("?")
        );
    }
    println!(
        "Chunks: {} (size {}, overlap {})",
        chunks.len(),
        cfg.chunking.chunk_size,
        cfg.chunking.chunk_overlap
    );
    if documents.is_empty() {
        println!("No text extracted; an upload of this file alone would be rejected.");
    }
    Ok(())
}
