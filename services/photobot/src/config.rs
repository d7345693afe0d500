use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the photo bot
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Telegram Bot API configuration
    pub telegram: TelegramConfig,
    /// Object storage configuration
    pub storage: StorageConfig,
    /// Label detection configuration
    pub vision: VisionConfig,
    /// Query translation configuration
    #[serde(default)]
    pub translation: TranslationConfig,
    /// Synonym lookup configuration
    #[serde(default)]
    pub synonyms: SynonymConfig,
    /// Search configuration
    #[serde(default)]
    pub search: SearchConfig,
    /// Per-user session configuration
    #[serde(default)]
    pub session: SessionConfig,
    /// Health API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format (json or pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Telegram Bot API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by BotFather
    pub bot_token: String,
    /// API base URL (override for local Bot API servers)
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    /// Long-polling timeout in seconds
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Delay before polling again after an error
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Updates handled concurrently
    #[serde(default = "default_max_concurrent_updates")]
    pub max_concurrent_updates: usize,
}

/// Which object store implementation to use
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// S3-compatible bucket
    S3,
    /// Process-local store, contents are lost on restart
    Memory,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Storage backend
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    /// Bucket holding user images
    #[serde(default)]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Cloud Vision configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    /// API key for the Vision API
    pub api_key: String,
    /// Annotate endpoint
    #[serde(default = "default_vision_endpoint")]
    pub endpoint: String,
    /// Maximum labels/objects requested per feature
    #[serde(default = "default_vision_max_results")]
    pub max_results: u32,
    /// Labels and objects below this score are dropped
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

/// Translation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TranslationConfig {
    /// Translate queries and captions to the target language
    #[serde(default)]
    pub enabled: bool,
    /// API key for the Translation API
    #[serde(default)]
    pub api_key: String,
    /// Translate endpoint
    #[serde(default = "default_translate_endpoint")]
    pub endpoint: String,
    /// Canonical language labels are stored in
    #[serde(default = "default_target_language")]
    pub target_language: String,
}

/// Synonym lookup configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SynonymConfig {
    /// Broaden failed searches with synonyms
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Datamuse words endpoint
    #[serde(default = "default_synonym_endpoint")]
    pub endpoint: String,
    /// Maximum synonyms tried per search
    #[serde(default = "default_synonym_max_results")]
    pub max_results: u32,
}

/// Search configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Prefix that disables translation for a query
    #[serde(default = "default_literal_marker")]
    pub literal_marker: String,
    /// Minimum fuzzy similarity for a label to match
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Maximum photos sent back for an "all" search
    #[serde(default = "default_max_results_sent")]
    pub max_results_sent: usize,
    /// Concurrent metadata reloads while searching
    #[serde(default = "default_load_concurrency")]
    pub load_concurrency: usize,
}

/// Per-user session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Quiet period after the last upload before the batch summary is sent
    #[serde(default = "default_batch_window_secs")]
    pub batch_window_secs: u64,
    /// Sessions idle for longer than this are evicted
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    /// How often idle sessions are swept
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Language used when the user's language is unknown
    #[serde(default = "default_language")]
    pub default_language: String,
    /// Maximum labels stored per image
    #[serde(default = "default_max_labels")]
    pub max_labels: usize,
}

/// Health API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Serve the health API
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

/// Configuration validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

// Default value functions
fn default_service_name() -> String {
    "photobot".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_max_concurrent_updates() -> usize {
    32
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::S3
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_vision_endpoint() -> String {
    "https://vision.googleapis.com/v1/images:annotate".to_string()
}

fn default_vision_max_results() -> u32 {
    10
}

fn default_min_score() -> f32 {
    0.6
}

fn default_translate_endpoint() -> String {
    "https://translation.googleapis.com/language/translate/v2".to_string()
}

fn default_target_language() -> String {
    "en".to_string()
}

fn default_synonym_endpoint() -> String {
    "https://api.datamuse.com/words".to_string()
}

fn default_synonym_max_results() -> u32 {
    5
}

fn default_literal_marker() -> String {
    "!".to_string()
}

fn default_similarity_threshold() -> f64 {
    0.8
}

fn default_max_results_sent() -> usize {
    10
}

fn default_load_concurrency() -> usize {
    8
}

fn default_batch_window_secs() -> u64 {
    5
}

fn default_idle_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_language() -> String {
    "it".to_string()
}

fn default_max_labels() -> usize {
    30
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "photobot")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/photobot").required(false))
            .add_source(config::File::with_name("/etc/photobot/photobot").required(false))
            // PHOTOBOT__TELEGRAM__BOT_TOKEN -> telegram.bot_token
            .add_source(
                config::Environment::with_prefix("PHOTOBOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.telegram.bot_token.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "telegram.bot_token".to_string(),
            ));
        }

        if self.telegram.poll_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "telegram.poll_timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.telegram.max_concurrent_updates == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "telegram.max_concurrent_updates".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.storage.backend == StorageBackend::S3 && self.storage.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "storage.bucket".to_string(),
            ));
        }

        if self.vision.api_key.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "vision.api_key".to_string(),
            ));
        }

        if self.translation.enabled && self.translation.api_key.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "translation.api_key".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.search.similarity_threshold) {
            return Err(ConfigValidationError::InvalidValue {
                field: "search.similarity_threshold".to_string(),
                message: "Must be between 0.0 and 1.0".to_string(),
            });
        }

        if self.search.literal_marker.trim().is_empty() {
            return Err(ConfigValidationError::InvalidValue {
                field: "search.literal_marker".to_string(),
                message: "Must not be blank".to_string(),
            });
        }

        if self.search.load_concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "search.load_concurrency".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.session.batch_window_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "session.batch_window_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.session.sweep_interval_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "session.sweep_interval_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.session.max_labels == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "session.max_labels".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the long-polling timeout as Duration
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.telegram.poll_timeout_secs)
    }

    /// Get the retry delay after a failed poll as Duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.telegram.retry_delay_secs)
    }

    /// Get the batch summary window as Duration
    pub fn batch_window(&self) -> Duration {
        Duration::from_secs(self.session.batch_window_secs)
    }

    /// Get the session idle TTL as Duration
    pub fn session_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.session.idle_ttl_secs)
    }

    /// Get the session sweep interval as Duration
    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session.sweep_interval_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            endpoint: default_translate_endpoint(),
            target_language: default_target_language(),
        }
    }
}

impl Default for SynonymConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_synonym_endpoint(),
            max_results: default_synonym_max_results(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            literal_marker: default_literal_marker(),
            similarity_threshold: default_similarity_threshold(),
            max_results_sent: default_max_results_sent(),
            load_concurrency: default_load_concurrency(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            batch_window_secs: default_batch_window_secs(),
            idle_ttl_secs: default_idle_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            default_language: default_language(),
            max_labels: default_max_labels(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            service: ServiceConfig::default(),
            telegram: TelegramConfig {
                bot_token: "123:abc".to_string(),
                api_url: default_telegram_api_url(),
                poll_timeout_secs: 30,
                retry_delay_secs: 5,
                max_concurrent_updates: 32,
            },
            storage: StorageConfig {
                backend: StorageBackend::S3,
                bucket: "photo-chatbot".to_string(),
                region: default_region(),
                endpoint_url: None,
                force_path_style: false,
            },
            vision: VisionConfig {
                api_key: "vision-key".to_string(),
                endpoint: default_vision_endpoint(),
                max_results: 10,
                min_score: 0.6,
            },
            translation: TranslationConfig::default(),
            synonyms: SynonymConfig::default(),
            search: SearchConfig::default(),
            session: SessionConfig::default(),
            api: ApiConfig::default(),
        }
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_similarity_threshold(), 0.8);
        assert_eq!(default_literal_marker(), "!");
        assert_eq!(default_batch_window_secs(), 5);
        assert_eq!(default_target_language(), "en");
    }

    #[test]
    fn test_valid_config() {
        assert_eq!(test_config().validate(), Ok(()));
    }

    #[test]
    fn test_missing_bot_token() {
        let mut config = test_config();
        config.telegram.bot_token.clear();

        assert_eq!(
            config.validate(),
            Err(ConfigValidationError::MissingField(
                "telegram.bot_token".to_string()
            ))
        );
    }

    #[test]
    fn test_memory_backend_needs_no_bucket() {
        let mut config = test_config();
        config.storage.backend = StorageBackend::Memory;
        config.storage.bucket.clear();

        assert!(config.validate().is_ok());

        config.storage.backend = StorageBackend::S3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_translation_requires_key() {
        let mut config = test_config();
        config.translation.enabled = true;

        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = test_config();
        config.search.similarity_threshold = 1.5;

        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = test_config();
        config.telegram.max_concurrent_updates = 0;

        assert_eq!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue {
                field: "telegram.max_concurrent_updates".to_string(),
                message: "Must be greater than 0".to_string(),
            })
        );
    }

    #[test]
    fn test_zero_max_labels_rejected() {
        let mut config = test_config();
        config.session.max_labels = 0;

        assert_eq!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue {
                field: "session.max_labels".to_string(),
                message: "Must be greater than 0".to_string(),
            })
        );
    }

    #[test]
    fn test_storage_backend_deserialize() {
        let backend: StorageBackend = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(backend, StorageBackend::Memory);
    }
}
