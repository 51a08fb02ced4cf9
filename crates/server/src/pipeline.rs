//! Per-(session, language) pipeline
//!
//! One task owns one language's segmentation policy, dispatch queue, and
//! audio fan-out. Events arrive over an mpsc channel so segmentation is
//! serialized; a 50 ms tick drives time-based policies; audio comes back on
//! a separate channel and is fanned out in emission order. Nothing here
//! awaits the transport while holding policy state.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use speech_relay_config::PolicyKind;
use speech_relay_core::LanguageTag;
use speech_relay_segment::{build_policy, punctuate, SegmentationPolicy, SynthesisUnit};
use speech_relay_tts::{
    select_voice, Dispatcher, DispatcherConfig, DispatcherStats, PersistentChannel,
    PersistentConfig, SynthesizedAudio, TtsError,
};

use crate::hub::SessionHub;
use crate::session::SessionHandle;
use crate::ws::ServerEvent;

/// How often time-driven policies get a chance to emit.
const POLL_TICK: Duration = Duration::from_millis(50);

/// One translated transcript event for a single language.
#[derive(Debug, Clone)]
pub struct TranslatedEvent {
    pub text: String,
    pub is_final: bool,
}

/// Cheap handle stored in the session's pipeline map.
#[derive(Clone)]
pub struct PipelineHandle {
    pub tx: mpsc::UnboundedSender<TranslatedEvent>,
    pub stats: Arc<DispatcherStats>,
}

/// Spawn the pipeline task for one (session, language).
pub fn spawn_pipeline(
    hub: SessionHub,
    session: Arc<SessionHandle>,
    lang: LanguageTag,
) -> PipelineHandle {
    let settings = hub.settings();
    let (tx, rx) = mpsc::unbounded_channel();
    let (audio_tx, audio_rx) = mpsc::unbounded_channel();

    let dispatcher = Dispatcher::spawn(
        lang.clone(),
        hub.tts_primary(),
        hub.tts_secondary(),
        DispatcherConfig::from(&settings.tts),
        audio_tx.clone(),
        session.cancel_rx(),
    );
    let stats = dispatcher.stats();

    // Continuous mode prefers one open channel per language; everything
    // else (and the fallback path) goes through the request-mode queue.
    let persistent = if settings.segmentation.policy == PolicyKind::Continuous {
        hub.streaming_tts().map(|provider| {
            PersistentChannel::spawn(
                provider,
                lang.clone(),
                None,
                PersistentConfig {
                    idle_flush: Duration::from_millis(settings.tts.idle_flush_ms),
                    max_backoff: Duration::from_millis(settings.tts.reconnect_max_backoff_ms),
                },
                audio_tx,
                session.cancel_rx(),
            )
        })
    } else {
        None
    };

    let policy = build_policy(&settings.segmentation);

    tokio::spawn(run(
        hub, session, lang, policy, rx, audio_rx, dispatcher, persistent,
    ));

    PipelineHandle { tx, stats }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    hub: SessionHub,
    session: Arc<SessionHandle>,
    lang: LanguageTag,
    mut policy: Box<dyn SegmentationPolicy>,
    mut rx: mpsc::UnboundedReceiver<TranslatedEvent>,
    mut audio_rx: mpsc::UnboundedReceiver<SynthesizedAudio>,
    dispatcher: Dispatcher,
    persistent: Option<PersistentChannel>,
) {
    let mut cancel = session.cancel_rx();
    let mut tick = tokio::time::interval(POLL_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let streaming = policy.kind() == PolicyKind::Continuous;
    let mut partial_number: u64 = 0;

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                let Some(event) = maybe_event else { break };
                if !event.is_final {
                    partial_number += 1;
                }

                let output = policy.push(&event.text, event.is_final, Instant::now());

                hub.send_to_language(&session, &lang, ServerEvent::TranslationUpdate {
                    text: output.display_text,
                    language: lang.to_string(),
                    is_final: event.is_final,
                    partial_number: (!event.is_final).then_some(partial_number),
                });

                dispatch_units(&hub, &session, &lang, output.units, &dispatcher, persistent.as_ref()).await;
            }
            _ = tick.tick() => {
                let units = policy.poll(Instant::now());
                if !units.is_empty() {
                    dispatch_units(&hub, &session, &lang, units, &dispatcher, persistent.as_ref()).await;
                }
            }
            maybe_audio = audio_rx.recv() => {
                let Some(audio) = maybe_audio else { break };
                session.record_utterance();

                hub.send_to_language(&session, &lang, ServerEvent::AudioStream {
                    audio: BASE64.encode(&audio.payload.bytes),
                    format: audio.payload.format,
                    language: lang.to_string(),
                    text: (!audio.text.is_empty()).then_some(audio.text),
                    sequence: Some(audio.sequence),
                    confidence: None,
                    is_stable: Some(true),
                    is_final: Some(audio.is_final),
                    streaming: streaming.then_some(true),
                });
            }
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!(code = %session.code, lang = %lang, "Pipeline ended");
}

/// Route synthesis units: utterances to the request-mode queue, deltas to
/// the persistent channel (with request-mode fallback once it has failed).
async fn dispatch_units(
    hub: &SessionHub,
    session: &Arc<SessionHandle>,
    lang: &LanguageTag,
    units: Vec<SynthesisUnit>,
    dispatcher: &Dispatcher,
    persistent: Option<&PersistentChannel>,
) {
    for unit in units {
        match unit {
            SynthesisUnit::Utterance { text } => {
                let spoken = punctuate::punctuate(&text, true);
                enqueue_request(hub, session, lang, dispatcher, spoken);
            }
            SynthesisUnit::Delta { text } => {
                if let Some(channel) = persistent {
                    if !channel.is_failed() {
                        // Back-pressure surfaces here: a stalled provider
                        // pauses this pipeline rather than dropping bytes
                        if channel.send_delta(text.clone()).await.is_ok() {
                            continue;
                        }
                    }
                }
                enqueue_request(hub, session, lang, dispatcher, text);
            }
        }
    }
}

fn enqueue_request(
    hub: &SessionHub,
    session: &Arc<SessionHandle>,
    lang: &LanguageTag,
    dispatcher: &Dispatcher,
    text: String,
) {
    let voices = session.listener_voices(lang);
    let voice = select_voice(voices.iter().map(|v| v.as_deref()), lang);

    let done = dispatcher.enqueue(text, Some(voice));
    let session = session.clone();
    let hub = hub.clone();
    tokio::spawn(async move {
        match done.await {
            Ok(Ok(())) | Err(_) => {}
            Ok(Err(e)) => {
                session.record_error();
                let kind = match e {
                    TtsError::QueueOverflow => "tts_overflow",
                    TtsError::Cancelled => "tts_cancelled",
                    _ => "tts_failed",
                };
                hub.metrics().record_error(kind);
            }
        }
    });
}
