//! HTTP synthesis provider
//!
//! Request-mode client: one JSON POST per utterance, audio returned inline
//! base64 with a format hint. The playback rate rides along as a provider
//! field; providers that only speak SSML wrap it themselves.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use speech_relay_core::{AudioPayload, CoreError, Result, SynthesisRequest, TtsProvider};

#[derive(Debug, Clone)]
pub struct HttpTtsProviderConfig {
    pub endpoint: String,
    /// Name used in logs and per-provider metrics.
    pub name: String,
}

pub struct HttpTtsProvider {
    config: HttpTtsProviderConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SynthesizeBody<'a> {
    text: &'a str,
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
    rate: f32,
}

#[derive(Deserialize)]
struct SynthesizeResponse {
    /// Base64 audio bytes.
    audio: String,
    #[serde(default = "default_format")]
    format: String,
}

fn default_format() -> String {
    "mp3".to_string()
}

impl HttpTtsProvider {
    pub fn new(config: HttpTtsProviderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TtsProvider for HttpTtsProvider {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioPayload> {
        let body = SynthesizeBody {
            text: &request.text,
            language: request.language.as_str(),
            voice: request.voice.as_deref(),
            rate: request.rate,
        };

        let response = self
            .client
            .post(format!(
                "{}/synthesize",
                self.config.endpoint.trim_end_matches('/')
            ))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Synthesis(e.to_string()))?
            .error_for_status()
            .map_err(|e| CoreError::Synthesis(e.to_string()))?;

        let parsed: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Synthesis(e.to_string()))?;

        let bytes = BASE64
            .decode(&parsed.audio)
            .map_err(|e| CoreError::Synthesis(format!("Bad audio encoding: {e}")))?;

        Ok(AudioPayload {
            bytes,
            format: parsed.format,
        })
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_serialization_skips_absent_voice() {
        let body = SynthesizeBody {
            text: "hola",
            language: "es",
            voice: None,
            rate: 1.1,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("voice").is_none());
        assert_eq!(json["rate"], 1.1);
    }

    #[test]
    fn test_response_defaults_format() {
        let parsed: SynthesizeResponse = serde_json::from_str(r#"{"audio":"AAAA"}"#).unwrap();
        assert_eq!(parsed.format, "mp3");
        assert_eq!(BASE64.decode(&parsed.audio).unwrap().len(), 3);
    }
}
