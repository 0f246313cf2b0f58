//! contentd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main contentd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Task store location
    pub store: StoreConfig,

    /// Job queue tuning
    pub queue: QueueConfig,

    /// Worker pool tuning
    pub worker: WorkerConfig,

    /// Workflow retry budget
    pub workflow: WorkflowConfig,

    /// Quality gate thresholds
    pub quality: QualityConfig,

    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Web search provider configuration
    pub search: SearchConfig,

    /// Image generation provider configuration
    pub image: ImageConfig,

    /// HTTP API configuration
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: ./contentd.yml
        let local_config = PathBuf::from("contentd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/contentd/contentd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("contentd").join("contentd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Check that the environment carries the credentials the adapters need
    ///
    /// The search and image adapters degrade when unconfigured, so only the
    /// LLM key is mandatory.
    pub fn validate(&self) -> Result<()> {
        if std::env::var(&self.llm.api_key_env).is_err() {
            eyre::bail!("Environment variable {} not set (required for the LLM adapter)", self.llm.api_key_env);
        }
        Ok(())
    }
}

/// Task store location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path
    #[serde(rename = "db-path")]
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("contentd.db"),
        }
    }
}

/// Job queue tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Delivery attempts before a job is dropped as failed
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Base for exponential redelivery backoff
    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,

    /// Backoff ceiling
    #[serde(rename = "backoff-max-ms")]
    pub backoff_max_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
        }
    }
}

/// Worker pool tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrent jobs per worker process
    pub concurrency: usize,

    /// Job-start rate cap (jobs per second)
    #[serde(rename = "rate-limit-per-sec")]
    pub rate_limit_per_sec: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            rate_limit_per_sec: 10,
        }
    }
}

/// Workflow retry budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Rewrite attempts after failed text checks
    #[serde(rename = "max-text-retries")]
    pub max_text_retries: u32,

    /// Regeneration attempts after failed image checks
    #[serde(rename = "max-image-retries")]
    pub max_image_retries: u32,

    /// Continue past an exhausted retry budget instead of failing the task.
    /// Meant for test profiles; leave off in production.
    #[serde(rename = "force-pass-on-exhaustion")]
    pub force_pass_on_exhaustion: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_text_retries: 3,
            max_image_retries: 3,
            force_pass_on_exhaustion: false,
        }
    }
}

/// Quality gate thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minimum soft score to pass, in [0, 10]
    #[serde(rename = "pass-threshold")]
    pub pass_threshold: f64,

    /// Stamped into every persisted quality check
    #[serde(rename = "rubric-version")]
    pub rubric_version: String,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            pass_threshold: 7.0,
            rubric_version: "v1".to_string(),
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "anthropic" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
            timeout_ms: 300_000,
        }
    }
}

/// Web search provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Provider name (currently only "tavily" supported)
    pub provider: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Results to request per query
    #[serde(rename = "max-results")]
    pub max_results: usize,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "tavily".to_string(),
            api_key_env: "TAVILY_API_KEY".to_string(),
            base_url: "https://api.tavily.com".to_string(),
            max_results: 5,
            timeout_ms: 30_000,
        }
    }
}

/// Image generation provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Disable to skip image generation entirely (articles ship without
    /// images; the workflow still completes)
    pub enabled: bool,

    /// Provider name (currently only "ark" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Directory for downloaded images
    #[serde(rename = "download-dir")]
    pub download_dir: PathBuf,

    /// Ask the provider to watermark generated images
    pub watermark: bool,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "ark".to_string(),
            model: "doubao-seedream-4-0".to_string(),
            api_key_env: "ARK_API_KEY".to_string(),
            base_url: "https://ark.cn-beijing.volces.com/api/v3".to_string(),
            download_dir: PathBuf::from("images"),
            watermark: false,
            timeout_ms: 120_000,
        }
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bind address for `contentd serve`
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}
