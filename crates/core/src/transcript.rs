//! Transcript events
//!
//! The unit of input from the speaker's recognizer: an evolving partial or a
//! committed final, with optional recognizer timing and optional
//! pre-computed translations that bypass the translator.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::LanguageTag;

/// One transcript update from the speaker stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEvent {
    /// Cumulative recognized text.
    pub text: String,
    /// `false` while the recognizer may still revise the text.
    pub is_final: bool,
    /// Client timestamp, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Offset into the audio stream, milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// Duration of the recognized span, milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Pre-computed translations; when present the translator is skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translations: Option<HashMap<LanguageTag, String>>,
}

impl TranscriptEvent {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            timestamp: None,
            offset: None,
            duration: None,
            translations: None,
        }
    }

    pub fn final_(text: impl Into<String>) -> Self {
        Self {
            is_final: true,
            ..Self::partial(text)
        }
    }

    pub fn with_translations(mut self, translations: HashMap<LanguageTag, String>) -> Self {
        self.translations = Some(translations);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserializes_minimal_payload() {
        let ev: TranscriptEvent =
            serde_json::from_str(r#"{"text":"hola","is_final":false}"#).unwrap();
        assert_eq!(ev.text, "hola");
        assert!(!ev.is_final);
        assert!(ev.translations.is_none());
    }

    #[test]
    fn test_deserializes_supplied_translations() {
        let ev: TranscriptEvent = serde_json::from_str(
            r#"{"text":"hello","is_final":true,"translations":{"es":"hola"}}"#,
        )
        .unwrap();
        let translations = ev.translations.unwrap();
        assert_eq!(
            translations.get(&LanguageTag::new("es").unwrap()).unwrap(),
            "hola"
        );
    }
}
