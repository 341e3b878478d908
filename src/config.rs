use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub scanner: ScannerConfig,
    pub chunking: ChunkingConfig,
    pub concurrency: ConcurrencyConfig,
    pub embedding: EmbeddingConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    pub root: PathBuf,
    pub interval_secs: u64,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// Three independent ceilings: files processed end-to-end, concurrent
/// embedding calls, and concurrent vector-store writes. The latter two are
/// global across files.
#[derive(Debug, Deserialize, Clone)]
pub struct ConcurrencyConfig {
    pub files: usize,
    pub embedding: usize,
    pub indexing: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dims: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub kind: String,
    pub index_service: Option<IndexServiceConfig>,
    pub relational: Option<RelationalConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexServiceConfig {
    pub endpoint: String,
    pub index: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelationalConfig {
    pub url: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// All tunables are required; an out-of-range value is a startup-fatal
/// configuration error.
pub fn validate(config: &Config) -> Result<()> {
    if config.scanner.interval_secs == 0 {
        anyhow::bail!("scanner.interval_secs must be > 0");
    }

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.concurrency.files == 0 {
        anyhow::bail!("concurrency.files must be > 0");
    }
    if config.concurrency.embedding == 0 {
        anyhow::bail!("concurrency.embedding must be > 0");
    }
    if config.concurrency.indexing == 0 {
        anyhow::bail!("concurrency.indexing must be > 0");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai or ollama.",
            other
        ),
    }

    match config.backend.kind.as_str() {
        "index-service" => {
            if config.backend.index_service.is_none() {
                anyhow::bail!("[backend.index_service] section required when kind = \"index-service\"");
            }
        }
        "relational" => {
            if config.backend.relational.is_none() {
                anyhow::bail!("[backend.relational] section required when kind = \"relational\"");
            }
        }
        other => anyhow::bail!(
            "Unknown backend kind: '{}'. Must be index-service or relational.",
            other
        ),
    }

    Ok(())
}
