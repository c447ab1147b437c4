//! Configuration for the Mnemograph engine
//!
//! Read once at startup (TOML), read-only afterwards. Every section has
//! serde defaults so a partial file or an empty one yields a working
//! in-memory engine.

use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{MnemographError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage backend selection
    #[serde(default)]
    pub backend: BackendConfig,
    /// Embedding adapter selection and transport policy
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Request coalescing for embedding calls
    #[serde(default)]
    pub batcher: BatcherConfig,
    /// Similarity auto-linking after indexing
    #[serde(default)]
    pub linker: LinkerConfig,
    /// Asynchronous indexing mode
    #[serde(default)]
    pub indexer: IndexerConfig,
    /// Optional LLM reflection synthesizer
    #[serde(default)]
    pub reflection: ReflectionConfig,
}

impl Config {
    /// Parse a TOML configuration string
    pub fn from_toml(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| MnemographError::Config(e.to_string()))
    }
}

/// Which storage implementation to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// Database location for the sqlite backend
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".mnemograph").join("memories.db"))
        .unwrap_or_else(|| PathBuf::from("mnemograph.db"))
}

/// Which embedding adapter to run, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingAdapterKind {
    /// No adapter: recall returns empty, stores keep no embedding
    #[default]
    None,
    Ollama,
    Openai,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub adapter: EmbeddingAdapterKind,
    /// Model name or identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Vector length for models without a known fixed dimensionality
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    /// Local provider URL
    #[serde(default = "default_ollama_endpoint")]
    pub ollama_endpoint: String,
    /// Hosted provider credential; falls back to OPENAI_API_KEY
    #[serde(default)]
    pub openai_api_key: Option<String>,
    /// Per-request transport timeout in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Extra attempts on transient transport failures
    #[serde(default = "default_http_retry")]
    pub http_retry: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            adapter: EmbeddingAdapterKind::default(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            ollama_endpoint: default_ollama_endpoint(),
            openai_api_key: None,
            http_timeout_secs: default_http_timeout_secs(),
            http_retry: default_http_retry(),
        }
    }
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_dimensions() -> usize {
    768
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_http_retry() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatcherConfig {
    /// Flush as soon as this many requests are pending
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Flush this long after the first request enters an empty queue
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }
}

fn default_batch_size() -> usize {
    32
}

fn default_batch_timeout_ms() -> u64 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkerConfig {
    /// Create relates_to edges after indexing
    #[serde(default = "default_auto_link")]
    pub auto_link: bool,
    /// Minimum cosine similarity for a link candidate
    #[serde(default = "default_link_threshold")]
    pub link_threshold: f32,
    /// Candidate pool size fetched from the backend
    #[serde(default = "default_link_max_candidates")]
    pub link_max_candidates: usize,
    /// Edges created per newly indexed memory
    #[serde(default = "default_link_max_links")]
    pub link_max_links: usize,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            auto_link: default_auto_link(),
            link_threshold: default_link_threshold(),
            link_max_candidates: default_link_max_candidates(),
            link_max_links: default_link_max_links(),
        }
    }
}

fn default_auto_link() -> bool {
    true
}

fn default_link_threshold() -> f32 {
    0.75
}

fn default_link_max_candidates() -> usize {
    20
}

fn default_link_max_links() -> usize {
    5
}

/// How indexing jobs run after a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// Spawned task per write; at-most-once, may drop on crash
    #[default]
    Ephemeral,
    /// Key-unique queue with bounded retries
    Durable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    #[serde(default)]
    pub mode: IndexMode,
    /// Same-memory re-enqueues are deduplicated within this window
    #[serde(default = "default_uniqueness_window_secs")]
    pub uniqueness_window_secs: u64,
    /// Attempts per job in durable mode
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            mode: IndexMode::default(),
            uniqueness_window_secs: default_uniqueness_window_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_uniqueness_window_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReflectionConfig {
    /// When false, reflect() always uses the deterministic formatter
    #[serde(default)]
    pub use_adapter: bool,
}
