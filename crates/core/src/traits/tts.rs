//! Synthesis interfaces
//!
//! Two provider shapes:
//! - `TtsProvider` (request mode): one text in, one finite audio payload out.
//! - `StreamingTtsProvider` (persistent mode): a long-lived bidirectional
//!   channel that accepts text fragments and emits audio fragments.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{LanguageTag, Result};

/// One request-mode synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub language: LanguageTag,
    /// Voice hint; providers fall back to a language default when absent.
    pub voice: Option<String>,
    /// Playback-rate multiplier, 1.0 = normal.
    pub rate: f32,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, language: LanguageTag) -> Self {
        Self {
            text: text.into(),
            language,
            voice: None,
            rate: 1.0,
        }
    }
}

/// Opaque synthesized audio. The container/codec is whatever the provider
/// and listeners agreed on; the relay only forwards it.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
    /// Format hint forwarded to listeners, e.g. `mp3`.
    pub format: String,
}

/// Request-mode synthesis provider.
#[async_trait]
pub trait TtsProvider: Send + Sync + 'static {
    /// Synthesize one utterance. Bounded by the caller's timeout.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioPayload>;

    /// Provider name for logging and per-provider metrics.
    fn name(&self) -> &str;
}

/// A live persistent-mode channel for one (session, language).
///
/// Text fragments go in through `text_tx`; an empty-string send marks a
/// phrase flush. Audio fragments come back on `audio_rx` as they are
/// produced. Dropping `text_tx` closes the channel.
pub struct TtsChannel {
    pub text_tx: mpsc::Sender<String>,
    pub audio_rx: mpsc::Receiver<AudioPayload>,
}

/// Persistent-mode synthesis provider.
#[async_trait]
pub trait StreamingTtsProvider: Send + Sync + 'static {
    /// Open one bidirectional channel.
    async fn open(&self, language: &LanguageTag, voice: Option<&str>) -> Result<TtsChannel>;

    fn name(&self) -> &str;
}
