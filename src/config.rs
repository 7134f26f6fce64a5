//! Layered configuration for the RAG engine.
//!
//! Supports:
//! - Default values
//! - TOML configuration file (`.ragmill/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `RAGMILL_` and use double
//! underscores to separate nested levels:
//! - `RAGMILL_QUEUE__MAX_CONCURRENT_JOBS=8` sets `queue.max_concurrent_jobs`
//! - `RAGMILL_EMBEDDING__BACKEND=remote` sets `embedding.backend`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding the metadata database and vector segments
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Default chunking limits for new collections
    #[serde(default)]
    pub chunking: ChunkingSettings,

    /// Embedding backend configuration
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Job queue configuration
    #[serde(default)]
    pub queue: QueueSettings,

    /// File watcher configuration
    #[serde(default)]
    pub watcher: WatcherSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default chunking limits, in estimated tokens.
///
/// Collections may override these at creation time; the invariant
/// `chunk_overlap < chunk_size <= max_chunk_size` is validated there.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
}

/// Which embedding backend produces vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    /// fastembed model running in-process.
    #[default]
    Local,
    /// HTTP embedding endpoint.
    Remote,
    /// Deterministic feature-hashed vectors; no model download.
    Hashing,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingSettings {
    #[serde(default)]
    pub backend: EmbeddingBackendKind,

    /// Model for the local backend (fastembed model name)
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Endpoint for the remote backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,

    /// Model id sent to the remote backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_model: Option<String>,

    /// Expected dimension of remote vectors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_dimension: Option<usize>,

    /// Texts per backend call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Embedding cache capacity in entries
    #[serde(default = "default_cache_entries")]
    pub cache_entries: usize,

    /// Retries before falling back to the local backend
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff, in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Directory for downloaded model files (defaults under data_dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_cache_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueSettings {
    /// Worker tasks draining the queue; one active job per collection
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Per-job timeout in seconds
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Per-file size cap in bytes
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherSettings {
    /// Quiet period before a file change is delivered, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".ragmill")
}
fn default_false() -> bool {
    false
}
fn default_chunk_size() -> usize {
    400
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_max_chunk_size() -> usize {
    512
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_cache_entries() -> usize {
    100_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    200
}
fn default_max_concurrent_jobs() -> usize {
    (num_cpus::get() / 2).max(1)
}
fn default_job_timeout_secs() -> u64 {
    300
}
fn default_max_file_size_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_dir: default_data_dir(),
            debug: false,
            chunking: ChunkingSettings::default(),
            embedding: EmbeddingSettings::default(),
            queue: QueueSettings::default(),
            watcher: WatcherSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendKind::Local,
            model: default_embedding_model(),
            remote_url: None,
            remote_model: None,
            remote_dimension: None,
            batch_size: default_batch_size(),
            cache_entries: default_cache_entries(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            model_cache_dir: None,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_timeout_secs: default_job_timeout_secs(),
            max_file_size_bytes: default_max_file_size_bytes(),
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(".ragmill/settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, layered under env overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            // Double underscore separates nested levels; single underscore
            // stays inside field names.
            .merge(
                Env::prefixed("RAGMILL_")
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
            .extract()
            .map_err(Box::new)
    }

    /// Find the workspace config by walking up from the current directory.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".ragmill");
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }
        None
    }

    /// Save current configuration to file.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Create a default settings file under `.ragmill/`.
    pub fn init_config_file(force: bool) -> anyhow::Result<PathBuf> {
        let config_path = PathBuf::from(".ragmill/settings.toml");
        if !force && config_path.exists() {
            anyhow::bail!("configuration file already exists, use --force to overwrite");
        }
        let settings = Settings::default();
        settings.save(&config_path)?;
        Ok(config_path)
    }

    /// Path of the metadata database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("ragmill.db")
    }

    /// Directory holding one vector segment per collection.
    pub fn vectors_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    /// Directory for downloaded embedding models.
    pub fn models_dir(&self) -> PathBuf {
        self.embedding
            .model_cache_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("models"))
    }
}
