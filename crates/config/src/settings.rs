//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Translator configuration
    #[serde(default)]
    pub translator: TranslatorSettings,

    /// Segmentation configuration (policy selection and tuning)
    #[serde(default)]
    pub segmentation: SegmentationSettings,

    /// TTS dispatch configuration
    #[serde(default)]
    pub tts: TtsSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_translator()?;
        self.validate_tts()?;
        self.validate_segmentation()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if self.server.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_connections".to_string(),
                message: "Max connections must be at least 1".to_string(),
            });
        }

        if self.server.stale_session_reap_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.stale_session_reap_secs".to_string(),
                message: "Stale-session age must be at least 1 second".to_string(),
            });
        }

        if self.environment.is_production() && self.server.cors_enabled && self.server.cors_origins.is_empty()
        {
            tracing::warn!(
                "CORS is enabled in production but no origins are configured. \
                 This may block legitimate requests."
            );
        }

        Ok(())
    }

    fn validate_translator(&self) -> Result<(), ConfigError> {
        if self.translator.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "translator.request_timeout_ms".to_string(),
                message: "Timeout must be at least 1 ms".to_string(),
            });
        }
        if self.translator.detect_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "translator.detect_timeout_ms".to_string(),
                message: "Timeout must be at least 1 ms".to_string(),
            });
        }
        if self.translator.cache_enabled && self.translator.cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "translator.cache_capacity".to_string(),
                message: "Cache capacity must be at least 1 when caching is enabled".to_string(),
            });
        }
        Ok(())
    }

    fn validate_tts(&self) -> Result<(), ConfigError> {
        let tts = &self.tts;

        if tts.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tts.request_timeout_ms".to_string(),
                message: "Timeout must be at least 1 ms".to_string(),
            });
        }

        if tts.max_rate < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "tts.max_rate".to_string(),
                message: format!("Must be at least 1.0, got {}", tts.max_rate),
            });
        }

        if tts.rate_step <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "tts.rate_step".to_string(),
                message: format!("Must be positive, got {}", tts.rate_step),
            });
        }

        if tts.queue_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tts.queue_threshold".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if tts.critical_queue_size <= tts.queue_threshold {
            return Err(ConfigError::InvalidValue {
                field: "tts.critical_queue_size".to_string(),
                message: format!(
                    "Must be larger than queue_threshold ({})",
                    tts.queue_threshold
                ),
            });
        }

        Ok(())
    }

    fn validate_segmentation(&self) -> Result<(), ConfigError> {
        let seg = &self.segmentation;

        if seg.hybrid.threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "segmentation.hybrid.threshold".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if seg.natural.min_words == 0
            || seg.natural.ideal_words < seg.natural.min_words
            || seg.natural.max_words < seg.natural.ideal_words
        {
            return Err(ConfigError::InvalidValue {
                field: "segmentation.natural".to_string(),
                message: format!(
                    "Word bounds must satisfy 0 < min <= ideal <= max, got {}/{}/{}",
                    seg.natural.min_words, seg.natural.ideal_words, seg.natural.max_words
                ),
            });
        }

        if seg.ultra.min_words == 0 || seg.ultra.max_words < seg.ultra.min_words {
            return Err(ConfigError::InvalidValue {
                field: "segmentation.ultra".to_string(),
                message: format!(
                    "Word bounds must satisfy 0 < min <= max, got {}/{}",
                    seg.ultra.min_words, seg.ultra.max_words
                ),
            });
        }

        if seg.continuous.min_delta_chars == 0 {
            return Err(ConfigError::InvalidValue {
                field: "segmentation.continuous.min_delta_chars".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Age after which a session with no listeners is reaped, seconds
    #[serde(default = "default_stale_reap_secs")]
    pub stale_session_reap_secs: u64,

    /// How often the reaper runs, seconds
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,

    /// Opaque short-lived credential handed to the browser recognizer
    #[serde(default)]
    pub speech_token: Option<String>,

    /// Speech-token region hint forwarded with the credential
    #[serde(default)]
    pub speech_region: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_connections() -> usize {
    1000
}
fn default_stale_reap_secs() -> u64 {
    1800
}
fn default_reap_interval_secs() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            cors_enabled: default_true(),
            // Empty by default - must be explicitly configured for production
            cors_origins: Vec::new(),
            stale_session_reap_secs: default_stale_reap_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            speech_token: None,
            speech_region: None,
        }
    }
}

/// Translator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorSettings {
    /// Translation endpoint URL; empty disables the HTTP client (echo mode)
    #[serde(default)]
    pub endpoint: String,

    /// Per-call timeout for translate/batch, milliseconds
    #[serde(default = "default_translate_timeout")]
    pub request_timeout_ms: u64,

    /// Per-call timeout for language detection, milliseconds
    #[serde(default = "default_detect_timeout")]
    pub detect_timeout_ms: u64,

    /// Cache translations by (normalized text, source, target)
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Cache entry TTL, milliseconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_ms: u64,

    /// Maximum cached entries
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_translate_timeout() -> u64 {
    2000
}
fn default_detect_timeout() -> u64 {
    1000
}
fn default_cache_ttl() -> u64 {
    30_000
}
fn default_cache_capacity() -> usize {
    2048
}

impl Default for TranslatorSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            request_timeout_ms: default_translate_timeout(),
            detect_timeout_ms: default_detect_timeout(),
            cache_enabled: default_true(),
            cache_ttl_ms: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Segmentation policy selector
///
/// Exactly one policy is active per deployment. This replaces any notion of
/// combinable feature flags: the variants are mutually exclusive by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Only finals trigger synthesis; maximum quality, maximum latency
    FinalOnly,
    /// Partials and finals feed a candidate-stability table
    #[default]
    Hybrid,
    /// Finals only, with aggressive prefix/similarity dedup
    Conference,
    /// Phrase-sized chunks at linguistic boundaries
    NaturalPhrase,
    /// 3-10 word chunks, earliest possible emission
    UltraLowLatency,
    /// Raw text deltas to a persistent synthesis channel
    Continuous,
}

/// Segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SegmentationSettings {
    /// Active policy
    #[serde(default)]
    pub policy: PolicyKind,

    #[serde(default)]
    pub hybrid: HybridSettings,

    #[serde(default)]
    pub natural: NaturalPhraseSettings,

    #[serde(default)]
    pub ultra: UltraSettings,

    #[serde(default)]
    pub continuous: ContinuousSettings,
}

/// Hybrid-stability tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridSettings {
    /// Appearance count at which a candidate becomes stable
    #[serde(default = "default_hybrid_threshold")]
    pub threshold: u32,

    /// Age at which a twice-seen candidate becomes stable, milliseconds
    #[serde(default = "default_hybrid_window")]
    pub time_window_ms: u64,

    /// Latency-first tuning lowers the stability threshold to 1
    #[serde(default)]
    pub latency_first: bool,
}

fn default_hybrid_threshold() -> u32 {
    2
}
fn default_hybrid_window() -> u64 {
    1200
}

impl Default for HybridSettings {
    fn default() -> Self {
        Self {
            threshold: default_hybrid_threshold(),
            time_window_ms: default_hybrid_window(),
            latency_first: false,
        }
    }
}

impl HybridSettings {
    /// Threshold after applying the latency-first override.
    pub fn effective_threshold(&self) -> u32 {
        if self.latency_first {
            1
        } else {
            self.threshold
        }
    }
}

/// Natural-phrase tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaturalPhraseSettings {
    #[serde(default = "default_natural_min")]
    pub min_words: usize,

    #[serde(default = "default_natural_ideal")]
    pub ideal_words: usize,

    #[serde(default = "default_natural_max")]
    pub max_words: usize,

    /// Delay before the very first chunk, milliseconds
    #[serde(default = "default_natural_initial_delay")]
    pub initial_delay_ms: u64,

    /// Quiescent delay before subsequent chunks, milliseconds
    #[serde(default = "default_natural_quiescence")]
    pub quiescence_ms: u64,
}

fn default_natural_min() -> usize {
    5
}
fn default_natural_ideal() -> usize {
    8
}
fn default_natural_max() -> usize {
    15
}
fn default_natural_initial_delay() -> u64 {
    150
}
fn default_natural_quiescence() -> u64 {
    50
}

impl Default for NaturalPhraseSettings {
    fn default() -> Self {
        Self {
            min_words: default_natural_min(),
            ideal_words: default_natural_ideal(),
            max_words: default_natural_max(),
            initial_delay_ms: default_natural_initial_delay(),
            quiescence_ms: default_natural_quiescence(),
        }
    }
}

/// Ultra-low-latency tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UltraSettings {
    #[serde(default = "default_ultra_min")]
    pub min_words: usize,

    #[serde(default = "default_ultra_max")]
    pub max_words: usize,

    /// Wait before emitting an unpunctuated window, milliseconds
    #[serde(default = "default_ultra_wait")]
    pub wait_ms: u64,
}

fn default_ultra_min() -> usize {
    3
}
fn default_ultra_max() -> usize {
    10
}
fn default_ultra_wait() -> u64 {
    100
}

impl Default for UltraSettings {
    fn default() -> Self {
        Self {
            min_words: default_ultra_min(),
            max_words: default_ultra_max(),
            wait_ms: default_ultra_wait(),
        }
    }
}

/// Continuous-streaming tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuousSettings {
    /// Minimum new characters before a delta is forwarded
    #[serde(default = "default_continuous_delta")]
    pub min_delta_chars: usize,
}

fn default_continuous_delta() -> usize {
    3
}

impl Default for ContinuousSettings {
    fn default() -> Self {
        Self {
            min_delta_chars: default_continuous_delta(),
        }
    }
}

/// TTS dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    /// Primary (lowest-latency) provider endpoint
    #[serde(default)]
    pub primary_endpoint: String,

    /// Secondary (more stable) provider endpoint
    #[serde(default)]
    pub secondary_endpoint: String,

    /// Per-request synthesis timeout, milliseconds
    #[serde(default = "default_tts_timeout")]
    pub request_timeout_ms: u64,

    /// Queue length above which the adaptive rate engages
    #[serde(default = "default_queue_threshold")]
    pub queue_threshold: usize,

    /// Rate increase per excess queued item
    #[serde(default = "default_rate_step")]
    pub rate_step: f32,

    /// Adaptive-rate ceiling
    #[serde(default = "default_max_rate")]
    pub max_rate: f32,

    /// Queue length considered critical; overflow drops begin at 2x this
    #[serde(default = "default_critical_queue")]
    pub critical_queue_size: usize,

    /// Consecutive errors before a provider is temporarily disabled
    #[serde(default = "default_error_limit")]
    pub consecutive_error_limit: u32,

    /// How long a tripped provider stays disabled, seconds
    #[serde(default = "default_disable_secs")]
    pub provider_disable_secs: u64,

    /// Persistent mode: idle time after which a phrase is flushed, milliseconds
    #[serde(default = "default_idle_flush")]
    pub idle_flush_ms: u64,

    /// Persistent mode: reconnect backoff ceiling, milliseconds
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_max_backoff_ms: u64,
}

fn default_tts_timeout() -> u64 {
    5000
}
fn default_queue_threshold() -> usize {
    3
}
fn default_rate_step() -> f32 {
    0.05
}
fn default_max_rate() -> f32 {
    1.4
}
fn default_critical_queue() -> usize {
    10
}
fn default_error_limit() -> u32 {
    5
}
fn default_disable_secs() -> u64 {
    60
}
fn default_idle_flush() -> u64 {
    500
}
fn default_reconnect_backoff() -> u64 {
    8000
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            primary_endpoint: String::new(),
            secondary_endpoint: String::new(),
            request_timeout_ms: default_tts_timeout(),
            queue_threshold: default_queue_threshold(),
            rate_step: default_rate_step(),
            max_rate: default_max_rate(),
            critical_queue_size: default_critical_queue(),
            consecutive_error_limit: default_error_limit(),
            provider_disable_secs: default_disable_secs(),
            idle_flush_ms: default_idle_flush(),
            reconnect_max_backoff_ms: default_reconnect_backoff(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Enable metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (SPEECH_RELAY prefix)
/// 2. config/{env}.toml (if env specified)
/// 3. config/default.toml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("SPEECH_RELAY")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.segmentation.policy, PolicyKind::Hybrid);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_server_validation() {
        let mut settings = Settings::default();

        settings.server.port = 0;
        assert!(settings.validate().is_err());
        settings.server.port = 8080;

        settings.server.max_connections = 0;
        assert!(settings.validate().is_err());
        settings.server.max_connections = 1000;

        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_tts_validation() {
        let mut settings = Settings::default();

        settings.tts.max_rate = 0.9;
        assert!(settings.validate().is_err());
        settings.tts.max_rate = 1.4;

        settings.tts.rate_step = 0.0;
        assert!(settings.validate().is_err());
        settings.tts.rate_step = 0.05;

        // critical size must exceed the adaptive threshold
        settings.tts.critical_queue_size = 3;
        settings.tts.queue_threshold = 3;
        assert!(settings.validate().is_err());
        settings.tts.critical_queue_size = 10;

        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_segmentation_validation() {
        let mut settings = Settings::default();

        settings.segmentation.natural.ideal_words = 2;
        settings.segmentation.natural.min_words = 5;
        assert!(settings.validate().is_err());
        settings.segmentation.natural = NaturalPhraseSettings::default();

        settings.segmentation.ultra.max_words = 1;
        assert!(settings.validate().is_err());
        settings.segmentation.ultra = UltraSettings::default();

        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_hybrid_latency_first() {
        let mut hybrid = HybridSettings::default();
        assert_eq!(hybrid.effective_threshold(), 2);
        hybrid.latency_first = true;
        assert_eq!(hybrid.effective_threshold(), 1);
    }

    #[test]
    fn test_policy_kind_snake_case() {
        let kind: PolicyKind = serde_json::from_str("\"ultra_low_latency\"").unwrap();
        assert_eq!(kind, PolicyKind::UltraLowLatency);
    }
}
