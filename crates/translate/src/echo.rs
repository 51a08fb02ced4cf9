//! Pass-through translator
//!
//! Echoes the source text for every target. Used when no endpoint is
//! configured, and as the base of test doubles.

use async_trait::async_trait;
use std::collections::HashMap;

use speech_relay_core::{echo_targets, CoreError, LanguageTag, Result, Translator};

#[derive(Debug, Default)]
pub struct EchoTranslator;

impl EchoTranslator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Translator for EchoTranslator {
    async fn translate(
        &self,
        text: &str,
        targets: &[LanguageTag],
        _source: Option<&LanguageTag>,
    ) -> Result<HashMap<LanguageTag, String>> {
        Ok(echo_targets(text, targets))
    }

    async fn detect(&self, _text: &str) -> Result<LanguageTag> {
        LanguageTag::new("en").map_err(|e| CoreError::Translation(e.to_string()))
    }

    fn name(&self) -> &str {
        "echo"
    }
}
