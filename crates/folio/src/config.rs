//! Configuration handling for folio.
//!
//! Loaded from `config.toml` in the config directory. Every field has a
//! default, so an empty or missing file yields a working local setup: an
//! in-memory store snapshotted under the data directory and the hashing
//! embedder.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use folio_core::EmbeddingConfig;
use folio_query::{RetryPolicy, SearchSettings};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP listener
    #[serde(default)]
    pub server: ServerConfig,

    /// Chunk store
    #[serde(default)]
    pub store: StoreConfig,

    /// Embedding backend
    #[serde(default)]
    pub embedding: EmbeddingSection,

    /// Reranking backend
    #[serde(default)]
    pub rerank: RerankSection,

    /// Retrieval engine tuning
    #[serde(default)]
    pub search: SearchSection,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Socket address to bind.
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

/// Store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-memory with a JSON snapshot file
    #[default]
    Memory,
    /// LanceDB (requires the `lancedb` feature)
    Lance,
}

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Directory holding the store files (default: the data directory)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Vector dimension; must match the embedder
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

fn default_dimension() -> usize {
    384
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: None,
            dimension: default_dimension(),
        }
    }
}

impl StoreConfig {
    /// Directory the store lives in.
    pub fn dir(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => data_dir().context("Failed to get data directory"),
        }
    }
}

/// Embedding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic token hashing, no model
    #[default]
    Hash,
    /// Remote `/embed` endpoint
    Http,
    /// Local BERT (requires the `candle` feature)
    Candle,
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSection {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    /// Base URL of the embedding server (`http` provider)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Model identifier
    #[serde(default)]
    pub model: Option<String>,

    /// Batch size for embedding
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Max concurrent embedding batches
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_batch_size() -> usize {
    32
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            endpoint: None,
            model: None,
            batch_size: default_batch_size(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl EmbeddingSection {
    /// Per-call embedding options.
    pub fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            normalize: true,
            batch_size: self.batch_size,
        }
    }
}

/// Reranking provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankProvider {
    /// Reranking requests fail
    #[default]
    None,
    /// Remote `/rerank` endpoint
    Http,
    /// Local cross-encoder (requires the `candle` feature)
    Candle,
}

/// Reranking configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RerankSection {
    #[serde(default)]
    pub provider: RerankProvider,

    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub model: Option<String>,
}

/// Retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Candidates fetched per requested result
    #[serde(default = "default_oversample")]
    pub oversample: usize,

    /// Per-call timeout (ms)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts per call, including the first
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// First retry delay (ms), doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_top_k() -> usize {
    5
}

fn default_max_top_k() -> usize {
    100
}

fn default_oversample() -> usize {
    3
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            oversample: default_oversample(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `tracing` filter directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default config path when `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load_from(path: Option<PathBuf>) -> Result<Self> {
        let explicit = path.is_some();
        let Some(path) = path.or_else(Self::config_path) else {
            return Ok(Self::default());
        };

        if !path.exists() {
            if explicit {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }

        Self::from_file(&path)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Default config file location.
    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Engine settings derived from the `search` and `embedding` sections.
    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            default_top_k: self.search.default_top_k,
            max_top_k: self.search.max_top_k,
            oversample: self.search.oversample,
            timeout: Duration::from_millis(self.search.timeout_ms),
            retry: RetryPolicy {
                max_attempts: self.search.retry_attempts,
                initial_backoff: Duration::from_millis(self.search.retry_backoff_ms),
            },
            embedding: self.embedding.embedding_config(),
        }
    }

    /// A commented sample configuration file.
    pub fn sample_toml() -> &'static str {
        r#"# folio configuration

[server]
host = "127.0.0.1"
port = 8000

[store]
# "memory" (JSON snapshot) or "lance" (needs the lancedb feature)
backend = "memory"
# path = "/var/lib/folio"
dimension = 384

[embedding]
# "hash", "http" or "candle"
provider = "hash"
# endpoint = "http://127.0.0.1:8080"
# model = "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2"
batch_size = 32
max_concurrent = 4

[rerank]
# "none", "http" or "candle"
provider = "none"
# endpoint = "http://127.0.0.1:8081"
# model = "cross-encoder/ms-marco-MiniLM-L-6-v2"

[search]
default_top_k = 5
max_top_k = 100
oversample = 3
timeout_ms = 10000
retry_attempts = 3
retry_backoff_ms = 100

[logging]
level = "info"
"#
    }
}

/// Get the XDG data directory for folio.
pub fn data_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("FOLIO_DATA_DIR") {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from("", "", "folio").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the XDG config directory for folio.
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("FOLIO_CONFIG_DIR") {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from("", "", "folio").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the XDG cache directory for folio (model downloads).
#[cfg_attr(not(feature = "candle"), allow(dead_code))]
pub fn cache_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "folio").map(|dirs| dirs.cache_dir().to_path_buf())
}
