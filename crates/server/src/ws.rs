//! WebSocket transport
//!
//! Envelope framing: `{"event": "<name>", "data": {...}}` both directions.
//! Audio rides inline in the payload, base64-encoded with a format hint.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

use speech_relay_core::TranscriptEvent;

use crate::state::AppState;

/// Events accepted from speakers and listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    SpeakerJoin {
        code: String,
        source_lang: String,
        #[serde(default)]
        target_langs: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_hint: Option<String>,
    },
    Transcript {
        code: String,
        #[serde(flatten)]
        transcript: TranscriptEvent,
    },
    ListenerJoin {
        code: String,
        lang: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice: Option<String>,
    },
    ChangeLanguage {
        code: String,
        lang: String,
    },
    UpdateVoice {
        code: String,
        voice: String,
    },
    ListenerLeave {
        code: String,
    },
}

/// Events emitted to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Joined {
        ok: bool,
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        available_languages: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_lang: Option<String>,
    },
    SessionStarted {
        code: String,
    },
    SessionNotFound {
        code: String,
    },
    SpeakerDisconnected {
        code: String,
    },
    LanguageChanged {
        code: String,
        lang: String,
    },
    VoiceUpdated {
        code: String,
        voice: String,
    },
    TranslationUpdate {
        text: String,
        language: String,
        is_final: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        partial_number: Option<u64>,
    },
    AudioStream {
        /// Base64 audio bytes.
        audio: String,
        format: String,
        language: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(rename = "isStable", skip_serializing_if = "Option::is_none")]
        is_stable: Option<bool>,
        #[serde(rename = "isFinal", skip_serializing_if = "Option::is_none")]
        is_final: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        streaming: Option<bool>,
    },
    /// Diagnostic mirror of each transcript back to the speaker.
    TranslationBroadcast {
        original: String,
        translations: HashMap<String, String>,
        is_final: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
        latency_ms: u64,
    },
}

/// Handle a WebSocket upgrade at `/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();

    // Outbox: pipelines and the hub fan out through this channel so no task
    // ever awaits the socket while holding session state.
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.hub.register_connection(&conn_id, outbox_tx);

    let writer = tokio::spawn(async move {
        while let Some(event) = outbox_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize server event");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => state.hub.handle_client_event(&conn_id, event).await,
                Err(e) => {
                    tracing::debug!(conn = %conn_id, error = %e, "Ignoring malformed client event");
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    state.hub.disconnect(&conn_id).await;
    writer.abort();
    tracing::debug!(conn = %conn_id, "WebSocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_envelope_parsing() {
        let json = r#"{"event":"speaker-join","data":{"code":"demo","source_lang":"en","target_langs":["es","fr"]}}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::SpeakerJoin {
                code,
                source_lang,
                target_langs,
                source_hint,
            } => {
                assert_eq!(code, "demo");
                assert_eq!(source_lang, "en");
                assert_eq!(target_langs, vec!["es", "fr"]);
                assert!(source_hint.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_transcript_event_flattened() {
        let json = r#"{"event":"transcript","data":{"code":"DEMO","text":"hola","is_final":true,"translations":{"es":"hola"}}}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::Transcript { code, transcript } => {
                assert_eq!(code, "DEMO");
                assert!(transcript.is_final);
                assert!(transcript.translations.is_some());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_audio_stream_field_names() {
        let event = ServerEvent::AudioStream {
            audio: "QUJD".to_string(),
            format: "mp3".to_string(),
            language: "es".to_string(),
            text: Some("hola".to_string()),
            sequence: Some(1),
            confidence: None,
            is_stable: Some(true),
            is_final: Some(false),
            streaming: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "audio-stream");
        assert_eq!(json["data"]["isStable"], true);
        assert_eq!(json["data"]["isFinal"], false);
        assert!(json["data"].get("confidence").is_none());
    }

    #[test]
    fn test_translation_update_roundtrip() {
        let event = ServerEvent::TranslationUpdate {
            text: "bonjour".to_string(),
            language: "fr".to_string(),
            is_final: false,
            partial_number: Some(3),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ServerEvent::TranslationUpdate { .. }));
    }
}
