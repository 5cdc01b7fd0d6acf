//! Configuration management for streetlens
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Qdrant collection name
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Checkpoint file (relative paths resolve against the base dir)
    #[serde(default = "default_checkpoint_file")]
    pub checkpoint_file: String,

    /// Bounded uploader configuration
    #[serde(default)]
    pub upload: UploadConfig,

    /// Caption generation configuration
    #[serde(default)]
    pub caption: CaptionConfig,

    /// Embedding backend configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// ANN index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Search configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Optional geographic restriction applied when selecting work
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Bounded uploader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum uploads in flight
    #[serde(default = "default_upload_concurrency")]
    pub concurrency: usize,

    /// Completions between checkpoint flushes
    #[serde(default = "default_upload_flush_interval")]
    pub flush_interval: usize,

    /// Attempts for the backend upload call
    #[serde(default = "default_upload_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts (milliseconds)
    #[serde(default = "default_upload_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Download timeout in seconds
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,

    /// User agent for image downloads
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Caption generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionConfig {
    /// Captioning backend base URL
    #[serde(default = "default_caption_backend_url")]
    pub backend_url: String,

    /// Environment variable name for the API key
    #[serde(default = "default_caption_api_key_env")]
    pub api_key_env: String,

    /// Generation model
    #[serde(default = "default_caption_model")]
    pub model: String,

    /// Prompt sent with every image
    #[serde(default = "default_caption_prompt")]
    pub prompt: String,

    #[serde(default = "default_caption_temperature")]
    pub temperature: f32,

    #[serde(default = "default_caption_top_p")]
    pub top_p: f32,

    #[serde(default = "default_caption_top_k")]
    pub top_k: u32,

    #[serde(default = "default_caption_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Items per sub-batch
    #[serde(default = "default_caption_batch_size")]
    pub batch_size: usize,

    /// Attempts per generation call
    #[serde(default = "default_caption_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts (milliseconds)
    #[serde(default = "default_caption_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Optional cap on generation requests per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<u32>,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding backend base URL
    #[serde(default = "default_embedding_backend_url")]
    pub backend_url: String,

    /// Environment variable name for the API key
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model and collection)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Texts per embedding request
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

/// ANN index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_m")]
    pub m: u64,

    #[serde(default = "default_index_ef_construct")]
    pub ef_construct: u64,

    #[serde(default = "default_index_indexing_threshold_kb")]
    pub indexing_threshold_kb: u64,

    /// Seconds to wait for the collection to report green after a build
    #[serde(default = "default_index_build_timeout")]
    pub build_timeout_secs: u64,
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Neighbors retrieved per query
    #[serde(default = "default_search_limit")]
    pub limit: usize,

    /// Maximum query length in characters
    #[serde(default = "default_search_max_query_chars")]
    pub max_query_chars: usize,

    /// Bind address for `streetlens serve`
    #[serde(default = "default_search_bind")]
    pub bind: String,
}

/// Latitude/longitude rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for streetlens data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Scratch directory for re-encoded images awaiting upload
    pub scratch_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            collection_name: default_collection_name(),
            checkpoint_file: default_checkpoint_file(),
            upload: UploadConfig::default(),
            caption: CaptionConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            search: SearchConfig::default(),
            bbox: None,
            paths: PathsConfig::default(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_upload_concurrency(),
            flush_interval: default_upload_flush_interval(),
            max_attempts: default_upload_max_attempts(),
            retry_delay_ms: default_upload_retry_delay_ms(),
            timeout_secs: default_upload_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            backend_url: default_caption_backend_url(),
            api_key_env: default_caption_api_key_env(),
            model: default_caption_model(),
            prompt: default_caption_prompt(),
            temperature: default_caption_temperature(),
            top_p: default_caption_top_p(),
            top_k: default_caption_top_k(),
            max_output_tokens: default_caption_max_output_tokens(),
            batch_size: default_caption_batch_size(),
            max_attempts: default_caption_max_attempts(),
            retry_delay_ms: default_caption_retry_delay_ms(),
            requests_per_second: None,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend_url: default_embedding_backend_url(),
            api_key_env: default_embedding_api_key_env(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            m: default_index_m(),
            ef_construct: default_index_ef_construct(),
            indexing_threshold_kb: default_index_indexing_threshold_kb(),
            build_timeout_secs: default_index_build_timeout(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_search_limit(),
            max_query_chars: default_search_max_query_chars(),
            bind: default_search_bind(),
        }
    }
}

impl UploadConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

impl CaptionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

impl EmbeddingConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

impl BoundingBox {
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&latitude)
            && (self.min_lon..=self.max_lon).contains(&longitude)
    }
}

impl Config {
    /// Get the default base directory for streetlens (~/.streetlens)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".streetlens")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    fn paths_for(base: PathBuf, config_file: PathBuf) -> PathsConfig {
        PathsConfig {
            config_file,
            db_file: base.join("metadata.db"),
            scratch_dir: base.join("scratch"),
            base_dir: base,
        }
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = Self::paths_for(base.clone(), base.join("config.toml"));
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path
            .parent()
            .unwrap_or(Path::new("."))
            .to_path_buf();
        config.paths = Self::paths_for(base, config_path.to_path_buf());

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Resolved checkpoint path
    pub fn checkpoint_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.checkpoint_file);
        if path.is_absolute() {
            path
        } else {
            self.paths.base_dir.join(path)
        }
    }

    /// Check if streetlens is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.upload.concurrency == 0 {
            return Err(Error::Config("upload.concurrency must be > 0".to_string()));
        }

        if self.upload.flush_interval == 0 {
            return Err(Error::Config(
                "upload.flush_interval must be > 0".to_string(),
            ));
        }

        if self.upload.max_attempts == 0 || self.caption.max_attempts == 0 {
            return Err(Error::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if self.caption.batch_size == 0 || self.embedding.batch_size == 0 {
            return Err(Error::Config("batch sizes must be > 0".to_string()));
        }

        if !(0.0..=2.0).contains(&self.caption.temperature) {
            return Err(Error::Config(
                "caption.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.caption.top_p) {
            return Err(Error::Config(
                "caption.top_p must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.caption.requests_per_second == Some(0) {
            return Err(Error::Config(
                "caption.requests_per_second must be positive when set".to_string(),
            ));
        }

        if self.embedding.dimension == 0 {
            return Err(Error::Config(
                "embedding.dimension must be > 0".to_string(),
            ));
        }

        if self.search.limit == 0 || self.search.max_query_chars == 0 {
            return Err(Error::Config(
                "search.limit and search.max_query_chars must be > 0".to_string(),
            ));
        }

        if let Some(bbox) = self.bbox {
            if bbox.min_lat > bbox.max_lat || bbox.min_lon > bbox.max_lon {
                return Err(Error::Config(
                    "bbox minimums must not exceed maximums".to_string(),
                ));
            }
        }

        Ok(())
    }
}
