//! Persistent-mode synthesis
//!
//! One long-lived bidirectional channel per (session, language) for the
//! continuous streaming policy. Text deltas go out as they arrive; audio
//! fragments come back whenever the provider produces them. An idle timer
//! flushes a phrase the speaker trailed off on; a dropped connection is
//! reopened with exponential backoff, and an unrecoverable channel flips the
//! failure flag so the pipeline can fall back to request mode.
//!
//! Back-pressure: the delta channel into this worker is bounded. When the
//! provider stalls, sends from the pipeline wait - bytes are never dropped
//! mid-utterance.

use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use speech_relay_core::{LanguageTag, StreamingTtsProvider};

use crate::dispatcher::SynthesizedAudio;

/// How many deltas may wait on a stalled provider before senders block.
const DELTA_BUFFER: usize = 32;
/// Reconnect attempts before the channel is declared dead.
const MAX_RECONNECTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct PersistentConfig {
    pub idle_flush: Duration,
    pub max_backoff: Duration,
}

/// Handle to one open persistent channel.
pub struct PersistentChannel {
    delta_tx: mpsc::Sender<String>,
    failed: Arc<AtomicBool>,
}

impl PersistentChannel {
    /// Spawn the channel worker. Audio fragments are delivered on
    /// `audio_tx` in arrival order.
    pub fn spawn(
        provider: Arc<dyn StreamingTtsProvider>,
        language: LanguageTag,
        voice: Option<String>,
        config: PersistentConfig,
        audio_tx: mpsc::UnboundedSender<SynthesizedAudio>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (delta_tx, delta_rx) = mpsc::channel(DELTA_BUFFER);
        let failed = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_channel(
            provider,
            language,
            voice,
            config,
            delta_rx,
            audio_tx,
            shutdown,
            failed.clone(),
        ));

        Self { delta_tx, failed }
    }

    /// Forward one text delta. Waits when the provider is back-pressured;
    /// errors only when the channel is gone for good.
    pub async fn send_delta(&self, delta: String) -> Result<(), crate::TtsError> {
        self.delta_tx
            .send(delta)
            .await
            .map_err(|_| crate::TtsError::Channel("persistent channel closed".to_string()))
    }

    /// True once reconnection has been given up on; the caller should fall
    /// back to request-mode dispatch.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_channel(
    provider: Arc<dyn StreamingTtsProvider>,
    language: LanguageTag,
    voice: Option<String>,
    config: PersistentConfig,
    mut delta_rx: mpsc::Receiver<String>,
    audio_tx: mpsc::UnboundedSender<SynthesizedAudio>,
    mut shutdown: watch::Receiver<bool>,
    failed: Arc<AtomicBool>,
) {
    let mut sequence: u64 = 0;
    let mut reconnects: u32 = 0;
    let mut backoff = INITIAL_BACKOFF;

    'outer: loop {
        if *shutdown.borrow() {
            return;
        }

        let mut channel = match provider.open(&language, voice.as_deref()).await {
            Ok(channel) => {
                reconnects = 0;
                backoff = INITIAL_BACKOFF;
                channel
            }
            Err(e) => {
                reconnects += 1;
                if reconnects > MAX_RECONNECTS {
                    tracing::error!(
                        language = %language,
                        error = %e,
                        "Persistent TTS channel unrecoverable, falling back to request mode"
                    );
                    failed.store(true, Ordering::Relaxed);
                    return;
                }
                let jitter_ms = rand::thread_rng().gen_range(0..=(backoff.as_millis() as u64 / 2).max(1));
                let jitter = Duration::from_millis(jitter_ms);
                tracing::warn!(
                    language = %language,
                    error = %e,
                    attempt = reconnects,
                    backoff_ms = backoff.as_millis() as u64,
                    "Persistent TTS open failed, retrying"
                );
                tokio::time::sleep(backoff + jitter).await;
                backoff = (backoff * 2).min(config.max_backoff);
                continue;
            }
        };

        tracing::info!(language = %language, provider = provider.name(), "Persistent TTS channel open");
        let mut pending_flush = false;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                maybe_delta = delta_rx.recv() => {
                    match maybe_delta {
                        Some(delta) => {
                            if channel.text_tx.send(delta).await.is_err() {
                                tracing::warn!(language = %language, "Persistent TTS send failed, reconnecting");
                                continue 'outer;
                            }
                            pending_flush = true;
                        }
                        // Pipeline side dropped the handle
                        None => return,
                    }
                }
                maybe_audio = channel.audio_rx.recv() => {
                    match maybe_audio {
                        Some(payload) => {
                            sequence += 1;
                            let _ = audio_tx.send(SynthesizedAudio {
                                payload,
                                text: String::new(),
                                rate: 1.0,
                                sequence,
                                is_final: false,
                            });
                        }
                        None => {
                            tracing::warn!(language = %language, "Persistent TTS channel dropped, reconnecting");
                            continue 'outer;
                        }
                    }
                }
                _ = tokio::time::sleep(config.idle_flush), if pending_flush => {
                    // Close out the phrase the speaker trailed off on
                    if channel.text_tx.send(String::new()).await.is_err() {
                        continue 'outer;
                    }
                    pending_flush = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use speech_relay_core::{AudioPayload, CoreError, TtsChannel};
    use std::sync::atomic::AtomicU32;

    /// Echoes each text fragment back as audio bytes; empty fragments
    /// (flush markers) become a `|` marker.
    struct EchoStreamProvider;

    #[async_trait]
    impl StreamingTtsProvider for EchoStreamProvider {
        async fn open(
            &self,
            _language: &LanguageTag,
            _voice: Option<&str>,
        ) -> speech_relay_core::Result<TtsChannel> {
            let (text_tx, mut text_rx) = mpsc::channel::<String>(8);
            let (audio_out_tx, audio_out_rx) = mpsc::channel(8);

            tokio::spawn(async move {
                while let Some(text) = text_rx.recv().await {
                    let bytes = if text.is_empty() {
                        b"|".to_vec()
                    } else {
                        text.into_bytes()
                    };
                    if audio_out_tx
                        .send(AudioPayload {
                            bytes,
                            format: "mp3".to_string(),
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });

            Ok(TtsChannel {
                text_tx,
                audio_rx: audio_out_rx,
            })
        }

        fn name(&self) -> &str {
            "echo-stream"
        }
    }

    struct AlwaysDownProvider {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl StreamingTtsProvider for AlwaysDownProvider {
        async fn open(
            &self,
            _language: &LanguageTag,
            _voice: Option<&str>,
        ) -> speech_relay_core::Result<TtsChannel> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::Synthesis("down".to_string()))
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    fn config() -> PersistentConfig {
        PersistentConfig {
            idle_flush: Duration::from_millis(50),
            max_backoff: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_deltas_flow_to_audio() {
        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let channel = PersistentChannel::spawn(
            Arc::new(EchoStreamProvider),
            LanguageTag::new("es").unwrap(),
            None,
            config(),
            audio_tx,
            shutdown_rx,
        );

        channel.send_delta("Hola ".to_string()).await.unwrap();
        channel.send_delta("a todos".to_string()).await.unwrap();

        let first = audio_rx.recv().await.unwrap();
        assert_eq!(first.payload.bytes, b"Hola ");
        assert_eq!(first.sequence, 1);
        let second = audio_rx.recv().await.unwrap();
        assert_eq!(second.payload.bytes, b"a todos");
        assert_eq!(second.sequence, 2);
    }

    #[tokio::test]
    async fn test_idle_flush_marks_phrase_end() {
        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let channel = PersistentChannel::spawn(
            Arc::new(EchoStreamProvider),
            LanguageTag::new("es").unwrap(),
            None,
            config(),
            audio_tx,
            shutdown_rx,
        );

        channel.send_delta("trailing off".to_string()).await.unwrap();

        let first = audio_rx.recv().await.unwrap();
        assert_eq!(first.payload.bytes, b"trailing off");
        // After the idle window the flush marker goes through
        let flush = tokio::time::timeout(Duration::from_millis(500), audio_rx.recv())
            .await
            .expect("idle flush never fired")
            .unwrap();
        assert_eq!(flush.payload.bytes, b"|");
    }

    #[tokio::test]
    async fn test_unrecoverable_channel_sets_failed() {
        let provider = Arc::new(AlwaysDownProvider {
            attempts: AtomicU32::new(0),
        });
        let (audio_tx, _audio_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let channel = PersistentChannel::spawn(
            provider.clone(),
            LanguageTag::new("es").unwrap(),
            None,
            config(),
            audio_tx,
            shutdown_rx,
        );

        tokio::time::timeout(Duration::from_secs(2), async {
            while !channel.is_failed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("channel never gave up");

        assert!(provider.attempts.load(Ordering::SeqCst) > MAX_RECONNECTS);
        assert!(channel.send_delta("x".to_string()).await.is_err());
    }
}
