//! TTS dispatch for the speech translation relay.
//!
//! Per-(session, language) FIFO queues with a single consumer each, adaptive
//! playback rate under queue pressure, an overflow drop policy that always
//! preserves the newest entries, primary/secondary provider failover, and a
//! persistent-channel variant for the continuous streaming policy.

mod dispatcher;
mod http;
mod persistent;
mod voices;

pub use dispatcher::{
    adaptive_rate, Dispatcher, DispatcherConfig, DispatcherStats, SynthesizedAudio,
};
pub use http::{HttpTtsProvider, HttpTtsProviderConfig};
pub use persistent::{PersistentChannel, PersistentConfig};
pub use voices::{default_voice, select_voice};

use thiserror::Error;

/// TTS dispatch errors
#[derive(Error, Debug, Clone)]
pub enum TtsError {
    #[error("Synthesis failed on all providers: {0}")]
    AllProvidersFailed(String),

    #[error("Queue overflow: entry dropped")]
    QueueOverflow,

    #[error("Dispatch cancelled")]
    Cancelled,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Persistent channel failed: {0}")]
    Channel(String),
}
