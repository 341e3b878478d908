//! # embedsync CLI
//!
//! | Command | Description |
//! |---------|-------------|
//! | `embedsync init` | Create the metadata schema and provision the vector backend |
//! | `embedsync sync` | Run exactly one scan cycle and exit |
//! | `embedsync run` | Run a cycle at startup, then one per scan interval |
//!
//! All commands accept a `--config` flag pointing to a TOML configuration
//! file. Log verbosity is controlled with `RUST_LOG`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use embedsync::backend::create_backend;
use embedsync::config::{load_config, Config};
use embedsync::embedding::HttpEmbedder;
use embedsync::metadata;
use embedsync::scheduler;
use embedsync::sync::Synchronizer;

/// embedsync — incremental filesystem-to-vector-store synchronization.
#[derive(Parser)]
#[command(
    name = "embedsync",
    about = "Incremental filesystem-to-vector-store synchronization daemon",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/embedsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the metadata store schema and provision the vector backend.
    ///
    /// Idempotent — running it multiple times is safe. For the relational
    /// backend this installs the vector extension and creates the
    /// documents table; for the index service it creates the index.
    Init,

    /// Run exactly one scan cycle and exit.
    Sync,

    /// Run continuously: one cycle at startup, then one per scan interval.
    /// Overlapping cycles are never started.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => init(&config).await,
        Commands::Sync => sync_once(&config).await,
        Commands::Run => run(&config).await,
    }
}

async fn init(config: &Config) -> Result<()> {
    let pool = metadata::connect(&config.store.path).await?;
    metadata::migrate(&pool).await?;

    let backend = create_backend(&config.backend, config.embedding.dims).await?;
    backend.ensure_ready().await?;

    info!(backend = backend.name(), "initialized");
    Ok(())
}

/// Connect everything and fail fast on configuration problems: a missing
/// API key or an unreachable backend stops the process before any cycle.
async fn build_synchronizer(config: &Config) -> Result<Synchronizer> {
    let pool = metadata::connect(&config.store.path).await?;
    metadata::migrate(&pool).await?;

    let embedder = Arc::new(HttpEmbedder::new(&config.embedding)?);
    let backend = create_backend(&config.backend, config.embedding.dims).await?;
    backend.ensure_ready().await?;

    info!(
        backend = backend.name(),
        root = %config.scanner.root.display(),
        "synchronizer ready"
    );
    Ok(Synchronizer::new(config.clone(), pool, backend, embedder))
}

async fn sync_once(config: &Config) -> Result<()> {
    let sync = build_synchronizer(config).await?;
    sync.run_cycle().await?;
    Ok(())
}

async fn run(config: &Config) -> Result<()> {
    let sync = Arc::new(build_synchronizer(config).await?);
    let period = Duration::from_secs(config.scanner.interval_secs);

    tokio::select! {
        _ = scheduler::run(sync, period) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}
