//! Core traits and types for the speech translation relay.
//!
//! Everything here is transport- and provider-agnostic: language tags,
//! session codes, transcript events, text normalization/fingerprinting,
//! and the interfaces the relay uses to talk to external translation and
//! synthesis providers.

pub mod code;
pub mod language;
pub mod text;
pub mod traits;
pub mod transcript;

pub use code::SessionCode;
pub use language::LanguageTag;
pub use traits::{
    echo_targets, AudioPayload, StreamingTtsProvider, SynthesisRequest, Translator, TtsChannel,
    TtsProvider,
};
pub use transcript::TranscriptEvent;

use thiserror::Error;

/// Core errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid session code: {0}")]
    InvalidSessionCode(String),

    #[error("Invalid language tag: {0}")]
    InvalidLanguageTag(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Timeout after {0} ms")]
    Timeout(u64),
}

/// Core result type
pub type Result<T> = std::result::Result<T, CoreError>;
