use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::job::OutputFormat;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// BFL API key. Falls back to `BFL_API_KEY` when `FLUX_API_KEY` is unset.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the generation API (e.g., "https://api.bfl.ai/v1")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Endpoint path that accepts generation jobs
    #[serde(default = "default_submit_path")]
    pub submit_path: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_polling_interval_secs")]
    pub polling_interval_secs: u64,

    /// 180 attempts * 5s = 15 minutes
    #[serde(default = "default_polling_timeout_attempts")]
    pub polling_timeout_attempts: u32,

    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    #[serde(default = "default_moderation_timeout_secs")]
    pub moderation_timeout_secs: u64,

    #[serde(default = "default_moderation_max_attempts")]
    pub moderation_max_attempts: u32,

    #[serde(default = "default_moderation_interval_secs")]
    pub moderation_interval_secs: u64,

    /// Per-request timeout for status queries
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Directory holding the reference image
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Reference image file name inside `input_dir`
    #[serde(default = "default_input_image")]
    pub input_image: String,

    /// Root directory for generated images and run reports
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Optional JSON catalog replacing the built-in styles/aspects/qualities
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Prometheus listener address (e.g., "0.0.0.0:9000"). Metrics are off when unset.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

/// Batch request parameters for the `flux-batch` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Comma-separated style keys; every catalog style when unset.
    #[serde(default)]
    pub styles: Option<Vec<String>>,

    #[serde(default)]
    pub aspects: Option<Vec<String>>,

    #[serde(default)]
    pub qualities: Option<Vec<String>>,

    #[serde(default = "default_count_per_variation")]
    pub count_per_variation: u32,

    #[serde(default = "default_start_seed")]
    pub start_seed: u64,

    /// Custom prompt used for every style instead of the catalog prompt
    #[serde(default)]
    pub prompt: Option<String>,

    #[serde(default)]
    pub output_format: OutputFormat,

    #[serde(default = "default_attempt_delay_ms")]
    pub attempt_delay_ms: u64,

    #[serde(default = "default_cell_delay_ms")]
    pub cell_delay_ms: u64,

    #[serde(default = "default_group_delay_ms")]
    pub group_delay_ms: u64,

    /// When set (4 to 12), run a character turn-around of this many angles
    /// instead of the style matrix. `prompt` then describes the character.
    #[serde(default)]
    pub rotation_steps: Option<usize>,
}

/// Timing and retry budgets for the submit → poll → fetch pipeline.
///
/// Built once and handed to each client component by value, so tests can
/// inject their own budgets.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub polling_interval: Duration,
    pub polling_timeout_attempts: u32,
    pub max_consecutive_errors: u32,
    pub moderation_timeout: Duration,
    pub moderation_max_attempts: u32,
    pub moderation_interval: Duration,
    /// Upper bound on a single status query; `timeout` covers submission.
    pub poll_timeout: Duration,
    pub download_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(default_timeout_secs()),
            max_retries: default_max_retries(),
            retry_delay: Duration::from_secs(default_retry_delay_secs()),
            polling_interval: Duration::from_secs(default_polling_interval_secs()),
            polling_timeout_attempts: default_polling_timeout_attempts(),
            max_consecutive_errors: default_max_consecutive_errors(),
            moderation_timeout: Duration::from_secs(default_moderation_timeout_secs()),
            moderation_max_attempts: default_moderation_max_attempts(),
            moderation_interval: Duration::from_secs(default_moderation_interval_secs()),
            poll_timeout: Duration::from_secs(default_poll_timeout_secs()),
            download_timeout: Duration::from_secs(default_download_timeout_secs()),
        }
    }
}

fn default_base_url() -> String {
    "https://api.bfl.ai/v1".to_string()
}

fn default_submit_path() -> String {
    "/flux-kontext-pro".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    10
}

fn default_polling_interval_secs() -> u64 {
    5
}

fn default_polling_timeout_attempts() -> u32 {
    180
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_moderation_timeout_secs() -> u64 {
    300
}

fn default_moderation_max_attempts() -> u32 {
    100
}

fn default_moderation_interval_secs() -> u64 {
    3
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_download_timeout_secs() -> u64 {
    30
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("data/input")
}

fn default_input_image() -> String {
    "character.jpg".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/output")
}

fn default_count_per_variation() -> u32 {
    1
}

fn default_start_seed() -> u64 {
    1000
}

fn default_attempt_delay_ms() -> u64 {
    2000
}

fn default_cell_delay_ms() -> u64 {
    2000
}

fn default_group_delay_ms() -> u64 {
    5000
}

impl AppConfig {
    /// Load `FLUX_*` variables (after reading `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config: AppConfig = envy::prefixed("FLUX_").from_env()?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("BFL_API_KEY").ok();
        }
        config.api_key = config
            .api_key
            .map(|key| key.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|key| !key.is_empty());

        if config.api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(config)
    }

    /// The API key, validated as present by `from_env`.
    pub fn api_key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            polling_interval: Duration::from_secs(self.polling_interval_secs),
            polling_timeout_attempts: self.polling_timeout_attempts,
            max_consecutive_errors: self.max_consecutive_errors,
            moderation_timeout: Duration::from_secs(self.moderation_timeout_secs),
            moderation_max_attempts: self.moderation_max_attempts,
            moderation_interval: Duration::from_secs(self.moderation_interval_secs),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            download_timeout: Duration::from_secs(self.download_timeout_secs),
        }
    }
}

impl BatchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::prefixed("FLUX_").from_env()?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("API key is required. Set FLUX_API_KEY or BFL_API_KEY")]
    MissingApiKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_service_budgets() {
        let settings = ClientSettings::default();
        assert_eq!(settings.polling_interval, Duration::from_secs(5));
        assert_eq!(settings.polling_timeout_attempts, 180);
        assert_eq!(settings.moderation_timeout, Duration::from_secs(300));
        assert_eq!(settings.moderation_interval, Duration::from_secs(3));
        assert_eq!(settings.poll_timeout, Duration::from_secs(60));
        assert!(settings.poll_timeout < settings.timeout);
        assert!(settings.max_consecutive_errors < settings.polling_timeout_attempts);
    }

    #[test]
    fn test_batch_config_from_iter() {
        let vars = vec![
            ("STYLES".to_string(), "cinematic,noir".to_string()),
            ("START_SEED".to_string(), "42".to_string()),
            ("OUTPUT_FORMAT".to_string(), "png".to_string()),
            ("ROTATION_STEPS".to_string(), "8".to_string()),
        ];
        let batch: BatchConfig = envy::from_iter(vars).unwrap();
        assert_eq!(
            batch.styles,
            Some(vec!["cinematic".to_string(), "noir".to_string()])
        );
        assert_eq!(batch.start_seed, 42);
        assert_eq!(batch.count_per_variation, 1);
        assert_eq!(batch.output_format, OutputFormat::Png);
        assert!(batch.prompt.is_none());
        assert_eq!(batch.rotation_steps, Some(8));
    }

    #[test]
    fn test_app_config_from_iter() {
        let vars = vec![
            ("API_KEY".to_string(), "abc".to_string()),
            ("MAX_RETRIES".to_string(), "2".to_string()),
            ("POLLING_INTERVAL_SECS".to_string(), "1".to_string()),
        ];
        let config: AppConfig = envy::from_iter(vars).unwrap();
        assert_eq!(config.api_key(), "abc");
        let settings = config.client_settings();
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.polling_interval, Duration::from_secs(1));
        assert_eq!(settings.poll_timeout, Duration::from_secs(60));
        assert_eq!(config.submit_path, "/flux-kontext-pro");
    }
}
