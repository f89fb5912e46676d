use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::DEFAULT_JPEG_QUALITY;
use crate::credentials::CredentialRotator;
use crate::orchestrator::{DEFAULT_MAX_EDGE, PipelineSettings};
use crate::pipeline::{DEFAULT_FILE_PREFIX, RetryPolicy};

/// Top-level configuration for stock-tagger.
///
/// Every section falls back to its defaults when missing, so a config file
/// only needs the keys it changes.
///
/// # Loading
///
/// ```rust,no_run
/// use stock_tagger::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.gemini.api_keys = "key-1, key-2".into();
/// config.batch.workers = 5;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gemini model and credentials.
    pub gemini: GeminiConfig,
    /// Worker count and output location.
    pub batch: BatchConfig,
    /// Retry behavior of the Infer stage.
    pub inference: InferenceConfig,
    pub sanitize: SanitizeConfig,
}

/// Google Gemini service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// Comma-separated API keys, rotated on rate limits.
    pub api_keys: String,
    pub model: String,
    /// Send `BLOCK_NONE` for every harm category.
    pub disable_safety_filters: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Jobs allowed in the pipeline at once.
    pub workers: usize,
    pub output_dir: PathBuf,
    /// Prepended to every relocated file name.
    pub file_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Attempts per image, shared by every kind of failure.
    pub max_attempts: u32,
    /// Pause after a rate-limited attempt.
    pub rate_limit_backoff_ms: u64,
    /// Retry when the safety filter returns nothing. When `false` a safety
    /// block fails the image immediately.
    pub retry_safety_blocks: bool,
    /// Longest edge of the copy sent to the model.
    pub max_edge: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizeConfig {
    /// Quality of the re-encoded working JPEG (1-100).
    pub jpeg_quality: u8,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_keys: String::new(),
            model: "gemini-2.5-flash".to_string(),
            disable_safety_filters: false,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            output_dir: PathBuf::from("READY_TO_UPLOAD"),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            rate_limit_backoff_ms: policy.rate_limit_backoff.as_millis() as u64,
            retry_safety_blocks: policy.retry_safety_blocks,
            max_edge: DEFAULT_MAX_EDGE,
        }
    }
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Config {
    /// Resolve the config file path: `config.json` next to the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Credential pool built from `gemini.api_keys`.
    pub fn credentials(&self) -> CredentialRotator {
        CredentialRotator::from_csv(&self.gemini.api_keys)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.inference.max_attempts.max(1),
            rate_limit_backoff: Duration::from_millis(self.inference.rate_limit_backoff_ms),
            retry_safety_blocks: self.inference.retry_safety_blocks,
        }
    }

    /// Pipeline settings with the stock prompt.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            retry: self.retry_policy(),
            max_edge: self.inference.max_edge,
            ..PipelineSettings::default()
        }
    }
}
