//! External provider interfaces

mod translate;
mod tts;

pub use translate::{echo_targets, Translator};
pub use tts::{AudioPayload, StreamingTtsProvider, SynthesisRequest, TtsChannel, TtsProvider};
