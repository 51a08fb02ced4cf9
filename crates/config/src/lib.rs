//! Configuration for the speech translation relay.
//!
//! Settings are loaded in layers: `config/default.toml`, then an optional
//! environment-specific file, then `SPEECH_RELAY__` environment variables.

mod settings;

pub use settings::{
    load_settings, ContinuousSettings, HybridSettings, NaturalPhraseSettings, ObservabilitySettings,
    PolicyKind, RuntimeEnvironment, SegmentationSettings, ServerSettings, Settings,
    TranslatorSettings, TtsSettings, UltraSettings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
