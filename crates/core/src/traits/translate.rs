//! Translation interface
//!
//! Implementations:
//! - `HttpTranslator` - JSON client for the external translation provider
//! - `EchoTranslator` - pass-through (and the base of every test double)
//! - `CachedTranslator` - TTL cache wrapper
//!
//! Errors are non-fatal to the relay: callers echo the source text per
//! target when a call fails.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::{LanguageTag, Result};

/// Text translation into one or more target languages.
#[async_trait]
pub trait Translator: Send + Sync + 'static {
    /// Translate one text into every target language.
    ///
    /// The returned map holds one entry per requested target. Implementations
    /// may omit targets they cannot serve; callers treat a missing target as
    /// an echo of the source.
    async fn translate(
        &self,
        text: &str,
        targets: &[LanguageTag],
        source: Option<&LanguageTag>,
    ) -> Result<HashMap<LanguageTag, String>>;

    /// Batch form: one result map per input text, in order.
    async fn translate_batch(
        &self,
        texts: &[String],
        targets: &[LanguageTag],
        source: Option<&LanguageTag>,
    ) -> Result<Vec<HashMap<LanguageTag, String>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.translate(text, targets, source).await?);
        }
        Ok(out)
    }

    /// Detect the language of a text.
    async fn detect(&self, text: &str) -> Result<LanguageTag>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// The echo fallback: every target maps to the source text unchanged.
pub fn echo_targets(text: &str, targets: &[LanguageTag]) -> HashMap<LanguageTag, String> {
    targets
        .iter()
        .map(|lang| (lang.clone(), text.to_string()))
        .collect()
}
