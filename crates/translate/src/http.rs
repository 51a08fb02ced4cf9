//! HTTP translation client
//!
//! JSON client for the external translation provider. Calls are bounded by
//! short timeouts; a missing target in the response is filled with the
//! source text so the relay always has something to display.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use speech_relay_core::{CoreError, LanguageTag, Result, Translator};

/// HTTP translator configuration
#[derive(Debug, Clone)]
pub struct HttpTranslatorConfig {
    /// Provider base URL; `/translate`, `/translate/batch` and `/detect`
    /// are appended.
    pub endpoint: String,
    pub request_timeout: Duration,
    pub detect_timeout: Duration,
}

impl Default for HttpTranslatorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5100".to_string(),
            request_timeout: Duration::from_secs(2),
            detect_timeout: Duration::from_secs(1),
        }
    }
}

pub struct HttpTranslator {
    config: HttpTranslatorConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    targets: &'a [LanguageTag],
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a LanguageTag>,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translations: HashMap<LanguageTag, String>,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    texts: &'a [String],
    targets: &'a [LanguageTag],
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a LanguageTag>,
}

#[derive(Deserialize)]
struct BatchResponse {
    results: Vec<TranslateResponse>,
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct DetectResponse {
    language: LanguageTag,
}

impl HttpTranslator {
    pub fn new(config: HttpTranslatorConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    /// Ensure every requested target is present, echoing the source for
    /// targets the provider did not return.
    fn fill_missing(
        text: &str,
        targets: &[LanguageTag],
        mut translations: HashMap<LanguageTag, String>,
    ) -> HashMap<LanguageTag, String> {
        for target in targets {
            translations
                .entry(target.clone())
                .or_insert_with(|| text.to_string());
        }
        translations
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(
        &self,
        text: &str,
        targets: &[LanguageTag],
        source: Option<&LanguageTag>,
    ) -> Result<HashMap<LanguageTag, String>> {
        let body = TranslateRequest {
            text,
            targets,
            source,
        };

        let send = self.client.post(self.url("translate")).json(&body).send();
        let response = tokio::time::timeout(self.config.request_timeout, send)
            .await
            .map_err(|_| CoreError::Timeout(self.config.request_timeout.as_millis() as u64))?
            .map_err(|e| CoreError::Translation(e.to_string()))?
            .error_for_status()
            .map_err(|e| CoreError::Translation(e.to_string()))?;

        let parsed: TranslateResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Translation(e.to_string()))?;

        Ok(Self::fill_missing(text, targets, parsed.translations))
    }

    async fn translate_batch(
        &self,
        texts: &[String],
        targets: &[LanguageTag],
        source: Option<&LanguageTag>,
    ) -> Result<Vec<HashMap<LanguageTag, String>>> {
        let body = BatchRequest {
            texts,
            targets,
            source,
        };

        let send = self
            .client
            .post(self.url("translate/batch"))
            .json(&body)
            .send();
        let response = tokio::time::timeout(self.config.request_timeout, send)
            .await
            .map_err(|_| CoreError::Timeout(self.config.request_timeout.as_millis() as u64))?
            .map_err(|e| CoreError::Translation(e.to_string()))?
            .error_for_status()
            .map_err(|e| CoreError::Translation(e.to_string()))?;

        let parsed: BatchResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Translation(e.to_string()))?;

        if parsed.results.len() != texts.len() {
            return Err(CoreError::Translation(format!(
                "Batch size mismatch: sent {}, got {}",
                texts.len(),
                parsed.results.len()
            )));
        }

        Ok(parsed
            .results
            .into_iter()
            .zip(texts)
            .map(|(r, text)| Self::fill_missing(text, targets, r.translations))
            .collect())
    }

    async fn detect(&self, text: &str) -> Result<LanguageTag> {
        let body = DetectRequest { text };

        let send = self.client.post(self.url("detect")).json(&body).send();
        let response = tokio::time::timeout(self.config.detect_timeout, send)
            .await
            .map_err(|_| CoreError::Timeout(self.config.detect_timeout.as_millis() as u64))?
            .map_err(|e| CoreError::Translation(e.to_string()))?
            .error_for_status()
            .map_err(|e| CoreError::Translation(e.to_string()))?;

        let parsed: DetectResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Translation(e.to_string()))?;

        Ok(parsed.language)
    }

    fn name(&self) -> &str {
        "http"
    }
}
