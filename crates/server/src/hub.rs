//! Session hub
//!
//! Process-wide registry of live sessions and connections. Routes speaker
//! transcripts into per-language pipelines and fans text/audio events back
//! out to the listeners whose language matches. A session is pinned to this
//! process; there is no cross-node state.

use dashmap::DashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

use speech_relay_config::Settings;
use speech_relay_core::{
    echo_targets, LanguageTag, SessionCode, StreamingTtsProvider, TranscriptEvent, Translator,
    TtsProvider,
};

use crate::metrics::{RelayMetrics, SessionSnapshot, TtsSnapshot};
use crate::pipeline::{spawn_pipeline, PipelineHandle, TranslatedEvent};
use crate::session::{Listener, SessionHandle};
use crate::ws::{ClientEvent, ServerEvent};

struct HubInner {
    settings: Arc<Settings>,
    sessions: DashMap<SessionCode, Arc<SessionHandle>>,
    connections: DashMap<String, mpsc::UnboundedSender<ServerEvent>>,
    translator: Arc<dyn Translator>,
    tts_primary: Arc<dyn TtsProvider>,
    tts_secondary: Option<Arc<dyn TtsProvider>>,
    streaming_tts: Option<Arc<dyn StreamingTtsProvider>>,
    metrics: Arc<RelayMetrics>,
}

/// Shared handle to the hub; cheap to clone into tasks.
#[derive(Clone)]
pub struct SessionHub {
    inner: Arc<HubInner>,
}

impl SessionHub {
    pub fn new(
        settings: Arc<Settings>,
        translator: Arc<dyn Translator>,
        tts_primary: Arc<dyn TtsProvider>,
        tts_secondary: Option<Arc<dyn TtsProvider>>,
        streaming_tts: Option<Arc<dyn StreamingTtsProvider>>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                settings,
                sessions: DashMap::new(),
                connections: DashMap::new(),
                translator,
                tts_primary,
                tts_secondary,
                streaming_tts,
                metrics,
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.inner.metrics
    }

    pub(crate) fn tts_primary(&self) -> Arc<dyn TtsProvider> {
        self.inner.tts_primary.clone()
    }

    pub(crate) fn tts_secondary(&self) -> Option<Arc<dyn TtsProvider>> {
        self.inner.tts_secondary.clone()
    }

    pub(crate) fn streaming_tts(&self) -> Option<Arc<dyn StreamingTtsProvider>> {
        self.inner.streaming_tts.clone()
    }

    pub fn session(&self, code: &SessionCode) -> Option<Arc<SessionHandle>> {
        self.inner.sessions.get(code).map(|e| e.value().clone())
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    pub fn register_connection(&self, conn_id: &str, tx: mpsc::UnboundedSender<ServerEvent>) {
        self.inner.connections.insert(conn_id.to_string(), tx);
        self.inner.metrics.connection_opened();
    }

    /// Transport-level disconnect: a speaker takes its session down, a
    /// listener is simply removed.
    pub async fn disconnect(&self, conn_id: &str) {
        self.inner.connections.remove(conn_id);
        self.inner.metrics.connection_closed();

        let speaker_of: Option<SessionCode> = self
            .inner
            .sessions
            .iter()
            .find(|e| e.value().speaker_conn == conn_id)
            .map(|e| e.key().clone());

        if let Some(code) = speaker_of {
            self.teardown_session(&code).await;
            return;
        }

        for entry in self.inner.sessions.iter() {
            entry.value().listeners.write().remove(conn_id);
        }
    }

    pub fn send_to_conn(&self, conn_id: &str, event: ServerEvent) {
        if let Some(tx) = self.inner.connections.get(conn_id) {
            let _ = tx.send(event);
        }
    }

    /// Deliver to every listener of the session currently on `lang`.
    pub(crate) fn send_to_language(
        &self,
        session: &SessionHandle,
        lang: &LanguageTag,
        event: ServerEvent,
    ) {
        let targets: Vec<String> = session
            .listeners
            .read()
            .iter()
            .filter(|(_, l)| &l.lang == lang)
            .map(|(conn, _)| conn.clone())
            .collect();
        for conn in targets {
            self.send_to_conn(&conn, event.clone());
        }
    }

    fn broadcast_session(&self, session: &SessionHandle, event: ServerEvent) {
        self.send_to_conn(&session.speaker_conn, event.clone());
        let listeners: Vec<String> = session.listeners.read().keys().cloned().collect();
        for conn in listeners {
            self.send_to_conn(&conn, event.clone());
        }
    }

    // ------------------------------------------------------------------
    // Client events
    // ------------------------------------------------------------------

    pub async fn handle_client_event(&self, conn_id: &str, event: ClientEvent) {
        match event {
            ClientEvent::SpeakerJoin {
                code,
                source_lang,
                target_langs,
                source_hint: _,
            } => self.speaker_join(conn_id, &code, &source_lang, &target_langs).await,
            ClientEvent::Transcript { code, transcript } => {
                self.handle_transcript(conn_id, &code, transcript).await
            }
            ClientEvent::ListenerJoin { code, lang, voice } => {
                self.listener_join(conn_id, &code, &lang, voice)
            }
            ClientEvent::ChangeLanguage { code, lang } => {
                self.change_language(conn_id, &code, &lang)
            }
            ClientEvent::UpdateVoice { code, voice } => self.update_voice(conn_id, &code, voice),
            ClientEvent::ListenerLeave { code } => self.listener_leave(conn_id, &code),
        }
    }

    async fn speaker_join(
        &self,
        conn_id: &str,
        code_str: &str,
        source_lang: &str,
        target_langs: &[String],
    ) {
        // Malformed codes are silently ignored
        let Ok(code) = SessionCode::parse(code_str) else {
            tracing::debug!(code = code_str, "Ignoring speaker join with bad code");
            return;
        };
        let Ok(source_lang) = LanguageTag::new(source_lang) else {
            tracing::debug!(lang = source_lang, "Ignoring speaker join with bad language");
            return;
        };

        // A late speaker replaces the prior session for this code
        if self.inner.sessions.contains_key(&code) {
            tracing::info!(code = %code, "Replacing existing session for re-joining speaker");
            self.teardown_session(&code).await;
        }

        let declared: Vec<LanguageTag> = target_langs
            .iter()
            .filter_map(|t| LanguageTag::new(t).ok())
            .collect();

        let session = Arc::new(SessionHandle::new(
            code.clone(),
            conn_id,
            source_lang.clone(),
            declared,
        ));
        self.inner.sessions.insert(code.clone(), session.clone());
        self.inner.metrics.session_started();

        tracing::info!(
            code = %code,
            source_lang = %source_lang,
            targets = ?session.declared_targets,
            "Speaker joined"
        );

        self.send_to_conn(
            conn_id,
            ServerEvent::Joined {
                ok: true,
                code: code.to_string(),
                mode: Some(format!("{:?}", self.inner.settings.segmentation.policy)),
                available_languages: None,
                source_lang: Some(source_lang.to_string()),
            },
        );
        self.broadcast_session(
            &session,
            ServerEvent::SessionStarted {
                code: code.to_string(),
            },
        );
    }

    fn listener_join(&self, conn_id: &str, code_str: &str, lang: &str, voice: Option<String>) {
        let session = SessionCode::parse(code_str)
            .ok()
            .and_then(|code| self.session(&code));
        let Some(session) = session else {
            self.send_to_conn(
                conn_id,
                ServerEvent::SessionNotFound {
                    code: code_str.to_string(),
                },
            );
            return;
        };
        let Ok(lang) = LanguageTag::new(lang) else {
            tracing::debug!(lang, "Ignoring listener join with bad language");
            return;
        };

        session.listeners.write().insert(
            conn_id.to_string(),
            Listener {
                lang: lang.clone(),
                voice,
            },
        );
        session.touch();

        tracing::info!(code = %session.code, lang = %lang, "Listener joined");

        self.send_to_conn(
            conn_id,
            ServerEvent::Joined {
                ok: true,
                code: session.code.to_string(),
                mode: None,
                available_languages: Some(session.available_languages()),
                source_lang: Some(session.source_lang.to_string()),
            },
        );
    }

    fn change_language(&self, conn_id: &str, code_str: &str, lang: &str) {
        let Some(session) = self.parse_session(code_str) else {
            return;
        };
        let Ok(lang) = LanguageTag::new(lang) else {
            return;
        };
        if let Some(listener) = session.listeners.write().get_mut(conn_id) {
            listener.lang = lang.clone();
        }
        self.send_to_conn(
            conn_id,
            ServerEvent::LanguageChanged {
                code: session.code.to_string(),
                lang: lang.to_string(),
            },
        );
    }

    fn update_voice(&self, conn_id: &str, code_str: &str, voice: String) {
        let Some(session) = self.parse_session(code_str) else {
            return;
        };
        if let Some(listener) = session.listeners.write().get_mut(conn_id) {
            listener.voice = Some(voice.clone());
        }
        self.send_to_conn(
            conn_id,
            ServerEvent::VoiceUpdated {
                code: session.code.to_string(),
                voice,
            },
        );
    }

    fn listener_leave(&self, conn_id: &str, code_str: &str) {
        if let Some(session) = self.parse_session(code_str) {
            session.listeners.write().remove(conn_id);
            tracing::debug!(code = %session.code, conn = conn_id, "Listener left");
        }
    }

    fn parse_session(&self, code_str: &str) -> Option<Arc<SessionHandle>> {
        SessionCode::parse(code_str)
            .ok()
            .and_then(|code| self.session(&code))
    }

    // ------------------------------------------------------------------
    // Transcript pipeline entry
    // ------------------------------------------------------------------

    pub async fn handle_transcript(&self, conn_id: &str, code_str: &str, event: TranscriptEvent) {
        let Some(session) = self.parse_session(code_str) else {
            return;
        };
        // Only the session's speaker feeds the pipeline
        if session.speaker_conn != conn_id {
            tracing::debug!(code = %session.code, conn = conn_id, "Dropping transcript from non-speaker");
            return;
        }
        session.touch();

        let targets = session.effective_targets();
        let started = Instant::now();

        let translations = match &event.translations {
            // Pre-translated by the client; the translator is bypassed
            Some(supplied) => {
                let mut map = echo_targets(&event.text, &targets);
                for (lang, text) in supplied {
                    map.insert(lang.clone(), text.clone());
                }
                map
            }
            None if targets.is_empty() => Default::default(),
            None => {
                let timeout =
                    Duration::from_millis(self.inner.settings.translator.request_timeout_ms + 500);
                let call = self.inner.translator.translate(
                    &event.text,
                    &targets,
                    Some(&session.source_lang),
                );
                match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(map)) => map,
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Translator failed, echoing source text");
                        self.inner.metrics.record_error("translator");
                        session.record_error();
                        echo_targets(&event.text, &targets)
                    }
                    Err(_) => {
                        tracing::warn!("Translator timed out, echoing source text");
                        self.inner.metrics.record_error("translator_timeout");
                        session.record_error();
                        echo_targets(&event.text, &targets)
                    }
                }
            }
        };

        let latency = started.elapsed();
        self.inner.metrics.record_translation(latency, event.is_final);
        session
            .metrics
            .cumulative_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);

        for lang in &targets {
            let text = translations
                .get(lang)
                .cloned()
                .unwrap_or_else(|| event.text.clone());
            let handle = self.ensure_pipeline(&session, lang);
            let _ = handle.tx.send(TranslatedEvent {
                text,
                is_final: event.is_final,
            });
        }

        // Diagnostic mirror to the speaker
        self.send_to_conn(
            &session.speaker_conn,
            ServerEvent::TranslationBroadcast {
                original: event.text.clone(),
                translations: translations
                    .iter()
                    .map(|(lang, text)| (lang.to_string(), text.clone()))
                    .collect(),
                is_final: event.is_final,
                timestamp: event.timestamp,
                latency_ms: latency.as_millis() as u64,
            },
        );
    }

    /// Per-(session, language) pipelines are born lazily on first use.
    fn ensure_pipeline(&self, session: &Arc<SessionHandle>, lang: &LanguageTag) -> PipelineHandle {
        if let Some(handle) = session.pipelines.read().get(lang) {
            return handle.clone();
        }

        let mut pipelines = session.pipelines.write();
        // Double-checked: another transcript may have raced us here
        if let Some(handle) = pipelines.get(lang) {
            return handle.clone();
        }
        tracing::info!(code = %session.code, lang = %lang, "Starting language pipeline");
        let handle = spawn_pipeline(self.clone(), session.clone(), lang.clone());
        pipelines.insert(lang.clone(), handle.clone());
        handle
    }

    // ------------------------------------------------------------------
    // Teardown and reaping
    // ------------------------------------------------------------------

    /// Remove the session, cancel every child task, and tell the group.
    pub async fn teardown_session(&self, code: &SessionCode) {
        let Some((_, session)) = self.inner.sessions.remove(code) else {
            return;
        };

        self.broadcast_session(
            &session,
            ServerEvent::SpeakerDisconnected {
                code: code.to_string(),
            },
        );
        session.cancel();

        tracing::info!(
            code = %code,
            utterances = session.metrics.utterances.load(Ordering::Relaxed),
            errors = session.metrics.errors.load(Ordering::Relaxed),
            "Session torn down"
        );
    }

    /// Background task reaping sessions nobody listens to.
    pub fn start_reaper(&self) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let hub = self.clone();
        let interval = Duration::from_secs(hub.inner.settings.server.reap_interval_secs);
        let max_age = Duration::from_secs(hub.inner.settings.server.stale_session_reap_secs);

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let stale: Vec<SessionCode> = hub
                            .inner
                            .sessions
                            .iter()
                            .filter(|e| e.value().is_stale(max_age))
                            .map(|e| e.key().clone())
                            .collect();
                        for code in stale {
                            tracing::info!(code = %code, "Reaping stale session");
                            hub.teardown_session(&code).await;
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    pub fn metrics_snapshot(&self) -> crate::metrics::MetricsSnapshot {
        let mut tts = TtsSnapshot::default();
        let mut sessions = Vec::new();

        for entry in self.inner.sessions.iter() {
            let session = entry.value();
            let pipelines = session.pipelines.read();
            let mut languages: Vec<String> = Vec::with_capacity(pipelines.len());
            for (lang, handle) in pipelines.iter() {
                languages.push(lang.to_string());
                tts.primary_used += handle.stats.primary_used.load(Ordering::Relaxed);
                tts.secondary_used += handle.stats.secondary_used.load(Ordering::Relaxed);
                tts.synth_errors += handle.stats.synth_errors.load(Ordering::Relaxed);
                tts.dropped_entries += handle.stats.dropped.load(Ordering::Relaxed);
                tts.rate_adjustments += handle.stats.rate_adjustments.load(Ordering::Relaxed);
                tts.current_queue_depth += handle.stats.depth.load(Ordering::Relaxed) as u64;
                tts.max_queue_depth = tts
                    .max_queue_depth
                    .max(handle.stats.max_depth.load(Ordering::Relaxed) as u64);
            }
            languages.sort();

            sessions.push(SessionSnapshot {
                code: session.code.to_string(),
                source_lang: session.source_lang.to_string(),
                listeners: session.listeners.read().len(),
                languages,
                utterances: session.metrics.utterances.load(Ordering::Relaxed),
                errors: session.metrics.errors.load(Ordering::Relaxed),
                uptime_secs: session.created_at.elapsed().as_secs(),
            });
        }

        self.inner.metrics.snapshot(sessions, tts)
    }
}
