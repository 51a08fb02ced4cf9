//! Per-(session, language) synthesis dispatch
//!
//! One FIFO queue, one worker. The single consumer preserves audio order per
//! listener language; the queue length drives the adaptive playback rate;
//! overflow drops the oldest entries, never the newest; provider failover
//! goes primary then secondary, with a disable window after repeated errors.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch, Notify};

use speech_relay_config::TtsSettings;
use speech_relay_core::{AudioPayload, LanguageTag, SynthesisRequest, TtsProvider};

use crate::TtsError;

/// Dispatch tuning, derived from `TtsSettings`.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub queue_threshold: usize,
    pub rate_step: f32,
    pub max_rate: f32,
    pub critical_queue_size: usize,
    pub request_timeout: Duration,
    pub consecutive_error_limit: u32,
    pub provider_disable: Duration,
}

impl From<&TtsSettings> for DispatcherConfig {
    fn from(settings: &TtsSettings) -> Self {
        Self {
            queue_threshold: settings.queue_threshold,
            rate_step: settings.rate_step,
            max_rate: settings.max_rate,
            critical_queue_size: settings.critical_queue_size,
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
            consecutive_error_limit: settings.consecutive_error_limit,
            provider_disable: Duration::from_secs(settings.provider_disable_secs),
        }
    }
}

/// Playback rate for a given queue depth: exactly 1.0 at or below the
/// threshold, then one step per excess item, capped.
pub fn adaptive_rate(queue_len: usize, config: &DispatcherConfig) -> f32 {
    if queue_len <= config.queue_threshold {
        return 1.0;
    }
    let excess = (queue_len - config.queue_threshold) as f32;
    (1.0 + excess * config.rate_step).min(config.max_rate)
}

struct QueueEntry {
    text: String,
    voice: Option<String>,
    enqueued_at: Instant,
    done: oneshot::Sender<Result<(), TtsError>>,
}

/// Counters one dispatcher maintains; mirrored into process metrics by the
/// owner.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub dropped: AtomicU64,
    pub rate_adjustments: AtomicU64,
    pub primary_used: AtomicU64,
    pub secondary_used: AtomicU64,
    pub synth_errors: AtomicU64,
    pub depth: AtomicUsize,
    pub max_depth: AtomicUsize,
}

#[derive(Debug, Default)]
struct ProviderHealth {
    consecutive_errors: u32,
    successes: u64,
    errors: u64,
    disabled_until: Option<Instant>,
}

impl ProviderHealth {
    fn available(&self, now: Instant) -> bool {
        self.disabled_until.map(|t| now >= t).unwrap_or(true)
    }

    fn record_success(&mut self) {
        self.consecutive_errors = 0;
        self.successes += 1;
        self.disabled_until = None;
    }

    fn record_error(&mut self, limit: u32, disable: Duration, now: Instant) -> bool {
        self.consecutive_errors += 1;
        self.errors += 1;
        if self.consecutive_errors > limit {
            self.disabled_until = Some(now + disable);
            self.consecutive_errors = 0;
            return true;
        }
        false
    }
}

/// Audio ready for fan-out, in emission order.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub payload: AudioPayload,
    pub text: String,
    pub rate: f32,
    pub sequence: u64,
    pub is_final: bool,
}

struct Shared {
    language: LanguageTag,
    config: DispatcherConfig,
    queue: Mutex<VecDeque<QueueEntry>>,
    notify: Notify,
    primary: Arc<dyn TtsProvider>,
    secondary: Option<Arc<dyn TtsProvider>>,
    primary_health: Mutex<ProviderHealth>,
    secondary_health: Mutex<ProviderHealth>,
    stats: Arc<DispatcherStats>,
}

/// Handle to one (session, language) dispatch queue and its worker.
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Spawn the worker. Synthesized audio is delivered in order on
    /// `audio_tx`; the worker exits when `shutdown` flips to true or every
    /// handle is dropped.
    pub fn spawn(
        language: LanguageTag,
        primary: Arc<dyn TtsProvider>,
        secondary: Option<Arc<dyn TtsProvider>>,
        config: DispatcherConfig,
        audio_tx: tokio::sync::mpsc::UnboundedSender<SynthesizedAudio>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let shared = Arc::new(Shared {
            language,
            config,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            primary,
            secondary,
            primary_health: Mutex::new(ProviderHealth::default()),
            secondary_health: Mutex::new(ProviderHealth::default()),
            stats: Arc::new(DispatcherStats::default()),
        });

        tokio::spawn(worker(shared.clone(), audio_tx, shutdown));

        Self { shared }
    }

    /// Queue one utterance. The returned receiver resolves when the audio
    /// was emitted (or with the reason it never will be).
    pub fn enqueue(
        &self,
        text: impl Into<String>,
        voice: Option<String>,
    ) -> oneshot::Receiver<Result<(), TtsError>> {
        let (done_tx, done_rx) = oneshot::channel();
        let entry = QueueEntry {
            text: text.into(),
            voice,
            enqueued_at: Instant::now(),
            done: done_tx,
        };

        let depth = {
            let mut queue = self.shared.queue.lock();
            queue.push_back(entry);
            self.enforce_overflow(&mut queue);
            queue.len()
        };

        self.shared.stats.depth.store(depth, Ordering::Relaxed);
        self.shared.stats.max_depth.fetch_max(depth, Ordering::Relaxed);
        metrics::gauge!("relay_tts_queue_depth").set(depth as f64);
        self.shared.notify.notify_one();
        done_rx
    }

    /// Drop the oldest overflow when the queue doubles past critical. The
    /// newest entries always survive.
    fn enforce_overflow(&self, queue: &mut VecDeque<QueueEntry>) {
        let critical = self.shared.config.critical_queue_size;
        if queue.len() <= critical * 2 {
            return;
        }

        let drop_count = queue.len() - critical;
        tracing::warn!(
            language = %self.shared.language,
            queue_len = queue.len(),
            drop_count,
            "TTS queue saturated, dropping oldest entries"
        );
        for entry in queue.drain(..drop_count) {
            let waited = entry.enqueued_at.elapsed();
            tracing::debug!(text = %entry.text, waited_ms = waited.as_millis() as u64, "Dropped queued utterance");
            let _ = entry.done.send(Err(TtsError::QueueOverflow));
        }
        self.shared
            .stats
            .dropped
            .fetch_add(drop_count as u64, Ordering::Relaxed);
        metrics::counter!("relay_tts_dropped_total").increment(drop_count as u64);
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn stats(&self) -> Arc<DispatcherStats> {
        self.shared.stats.clone()
    }
}

async fn worker(
    shared: Arc<Shared>,
    audio_tx: tokio::sync::mpsc::UnboundedSender<SynthesizedAudio>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sequence: u64 = 0;
    let mut last_rate: f32 = 1.0;

    loop {
        // Drain the queue one entry at a time, strictly in order
        loop {
            if *shutdown.borrow() {
                reject_pending(&shared);
                return;
            }

            let (entry, depth) = {
                let mut queue = shared.queue.lock();
                match queue.pop_front() {
                    Some(entry) => (entry, queue.len()),
                    None => break,
                }
            };
            shared.stats.depth.store(depth, Ordering::Relaxed);

            let rate = adaptive_rate(depth, &shared.config);
            if (rate - last_rate).abs() >= 0.1 {
                tracing::info!(
                    language = %shared.language,
                    depth,
                    rate,
                    "Adaptive playback rate changed"
                );
            }
            if rate != last_rate {
                shared.stats.rate_adjustments.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("relay_tts_rate_adjustments_total").increment(1);
                last_rate = rate;
            }

            let request = SynthesisRequest {
                text: entry.text.clone(),
                language: shared.language.clone(),
                voice: entry.voice.clone(),
                rate,
            };

            match synthesize_with_failover(&shared, &request).await {
                Ok(payload) => {
                    sequence += 1;
                    let _ = audio_tx.send(SynthesizedAudio {
                        payload,
                        text: entry.text,
                        rate,
                        sequence,
                        is_final: true,
                    });
                    let _ = entry.done.send(Ok(()));
                }
                Err(e) => {
                    // The utterance is lost; the queue and session live on
                    tracing::error!(
                        language = %shared.language,
                        error = %e,
                        text = %entry.text,
                        "Synthesis failed on all providers, dropping utterance"
                    );
                    shared.stats.synth_errors.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("relay_tts_errors_total").increment(1);
                    let _ = entry.done.send(Err(e));
                }
            }
        }

        tokio::select! {
            _ = shared.notify.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    reject_pending(&shared);
                    return;
                }
            }
        }
    }
}

fn reject_pending(shared: &Shared) {
    let mut queue = shared.queue.lock();
    for entry in queue.drain(..) {
        let _ = entry.done.send(Err(TtsError::Cancelled));
    }
}

/// Primary once, then secondary once. A provider past its consecutive-error
/// limit sits out its disable window.
async fn synthesize_with_failover(
    shared: &Shared,
    request: &SynthesisRequest,
) -> Result<AudioPayload, TtsError> {
    let now = Instant::now();
    let mut last_error = String::new();

    if shared.primary_health.lock().available(now) {
        match attempt(shared, &shared.primary, request).await {
            Ok(payload) => {
                shared.primary_health.lock().record_success();
                shared.stats.primary_used.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("relay_tts_primary_total").increment(1);
                return Ok(payload);
            }
            Err(e) => {
                last_error = e.clone();
                let tripped = shared.primary_health.lock().record_error(
                    shared.config.consecutive_error_limit,
                    shared.config.provider_disable,
                    now,
                );
                if tripped {
                    tracing::warn!(
                        provider = shared.primary.name(),
                        disable_secs = shared.config.provider_disable.as_secs(),
                        "Provider disabled after repeated errors"
                    );
                }
                tracing::warn!(
                    provider = shared.primary.name(),
                    error = %e,
                    "Primary synthesis failed, trying secondary"
                );
            }
        }
    }

    if let Some(secondary) = &shared.secondary {
        if shared.secondary_health.lock().available(now) {
            match attempt(shared, secondary, request).await {
                Ok(payload) => {
                    shared.secondary_health.lock().record_success();
                    shared.stats.secondary_used.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("relay_tts_secondary_total").increment(1);
                    return Ok(payload);
                }
                Err(e) => {
                    last_error = e;
                    shared.secondary_health.lock().record_error(
                        shared.config.consecutive_error_limit,
                        shared.config.provider_disable,
                        now,
                    );
                }
            }
        }
    }

    Err(TtsError::AllProvidersFailed(last_error))
}

async fn attempt(
    shared: &Shared,
    provider: &Arc<dyn TtsProvider>,
    request: &SynthesisRequest,
) -> Result<AudioPayload, String> {
    match tokio::time::timeout(shared.config.request_timeout, provider.synthesize(request)).await {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!(
            "timeout after {} ms",
            shared.config.request_timeout.as_millis()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use speech_relay_core::CoreError;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::mpsc;

    fn test_config() -> DispatcherConfig {
        DispatcherConfig {
            queue_threshold: 3,
            rate_step: 0.05,
            max_rate: 1.4,
            critical_queue_size: 10,
            request_timeout: Duration::from_secs(5),
            consecutive_error_limit: 5,
            provider_disable: Duration::from_secs(60),
        }
    }

    struct SlowProvider {
        delay: Duration,
    }

    #[async_trait]
    impl TtsProvider for SlowProvider {
        async fn synthesize(
            &self,
            request: &SynthesisRequest,
        ) -> speech_relay_core::Result<AudioPayload> {
            tokio::time::sleep(self.delay).await;
            Ok(AudioPayload {
                bytes: request.text.as_bytes().to_vec(),
                format: "mp3".to_string(),
            })
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl TtsProvider for FailingProvider {
        async fn synthesize(
            &self,
            _request: &SynthesisRequest,
        ) -> speech_relay_core::Result<AudioPayload> {
            Err(CoreError::Synthesis("boom".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct FlakyOnce {
        failed: AtomicBool,
    }

    #[async_trait]
    impl TtsProvider for FlakyOnce {
        async fn synthesize(
            &self,
            request: &SynthesisRequest,
        ) -> speech_relay_core::Result<AudioPayload> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(CoreError::Synthesis("first call fails".to_string()));
            }
            Ok(AudioPayload {
                bytes: request.text.as_bytes().to_vec(),
                format: "mp3".to_string(),
            })
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[test]
    fn test_adaptive_rate_bounds() {
        let config = test_config();
        assert_eq!(adaptive_rate(0, &config), 1.0);
        assert_eq!(adaptive_rate(3, &config), 1.0);
        assert!((adaptive_rate(4, &config) - 1.05).abs() < 1e-6);
        assert!((adaptive_rate(7, &config) - 1.2).abs() < 1e-6);
        // Capped
        assert_eq!(adaptive_rate(100, &config), 1.4);
    }

    #[tokio::test]
    async fn test_audio_emitted_in_order() {
        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher::spawn(
            LanguageTag::new("es").unwrap(),
            Arc::new(SlowProvider {
                delay: Duration::from_millis(5),
            }),
            None,
            test_config(),
            audio_tx,
            shutdown_rx,
        );

        let handles: Vec<_> = (0..5)
            .map(|i| dispatcher.enqueue(format!("utterance {i}"), None))
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..5 {
            let audio = audio_rx.recv().await.unwrap();
            assert_eq!(audio.text, format!("utterance {i}"));
            assert_eq!(audio.sequence, i + 1);
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_keeps_newest() {
        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher::spawn(
            LanguageTag::new("es").unwrap(),
            Arc::new(SlowProvider {
                delay: Duration::from_millis(40),
            }),
            None,
            test_config(),
            audio_tx,
            shutdown_rx,
        );

        let handles: Vec<_> = (0..25)
            .map(|i| dispatcher.enqueue(format!("u{i}"), None))
            .collect();

        let mut dropped = 0;
        let mut completed = Vec::new();
        for (i, handle) in handles.into_iter().enumerate() {
            match handle.await.unwrap() {
                Ok(()) => completed.push(i),
                Err(TtsError::QueueOverflow) => dropped += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert!(dropped >= 5, "expected drops under saturation, got {dropped}");
        // The newest entry always survives
        assert!(completed.contains(&24));
        assert!(dispatcher.stats().dropped.load(Ordering::Relaxed) >= 5);

        // Surviving audio arrives in enqueue order
        let mut last_index = -1i64;
        while let Ok(audio) = audio_rx.try_recv() {
            let idx: i64 = audio.text[1..].parse().unwrap();
            assert!(idx > last_index, "audio out of order");
            last_index = idx;
        }
    }

    #[tokio::test]
    async fn test_secondary_takes_over_on_primary_failure() {
        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher::spawn(
            LanguageTag::new("fr").unwrap(),
            Arc::new(FailingProvider),
            Some(Arc::new(SlowProvider {
                delay: Duration::from_millis(1),
            })),
            test_config(),
            audio_tx,
            shutdown_rx,
        );

        dispatcher.enqueue("bonjour tout le monde", None).await.unwrap().unwrap();
        let audio = audio_rx.recv().await.unwrap();
        assert_eq!(audio.text, "bonjour tout le monde");
        assert_eq!(dispatcher.stats().secondary_used.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_both_providers_failing_drops_utterance_only() {
        let (audio_tx, _audio_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher::spawn(
            LanguageTag::new("de").unwrap(),
            Arc::new(FailingProvider),
            Some(Arc::new(FailingProvider)),
            test_config(),
            audio_tx,
            shutdown_rx,
        );

        let result = dispatcher.enqueue("erste", None).await.unwrap();
        assert!(matches!(result, Err(TtsError::AllProvidersFailed(_))));

        // The worker survives; a later entry still gets processed
        let result = dispatcher.enqueue("zweite", None).await.unwrap();
        assert!(matches!(result, Err(TtsError::AllProvidersFailed(_))));
    }

    #[tokio::test]
    async fn test_flaky_primary_recovers_via_secondary_then_self() {
        let (audio_tx, _audio_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher::spawn(
            LanguageTag::new("it").unwrap(),
            Arc::new(FlakyOnce {
                failed: AtomicBool::new(false),
            }),
            Some(Arc::new(SlowProvider {
                delay: Duration::from_millis(1),
            })),
            test_config(),
            audio_tx,
            shutdown_rx,
        );

        dispatcher.enqueue("prima", None).await.unwrap().unwrap();
        dispatcher.enqueue("seconda", None).await.unwrap().unwrap();

        let stats = dispatcher.stats();
        assert_eq!(stats.secondary_used.load(Ordering::Relaxed), 1);
        assert_eq!(stats.primary_used.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_pending() {
        let (audio_tx, _audio_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher::spawn(
            LanguageTag::new("es").unwrap(),
            Arc::new(SlowProvider {
                delay: Duration::from_millis(200),
            }),
            None,
            test_config(),
            audio_tx,
            shutdown_rx,
        );

        let first = dispatcher.enqueue("in flight", None);
        let second = dispatcher.enqueue("never spoken", None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();

        // The queued (not in-flight) entry is rejected
        assert!(matches!(second.await.unwrap(), Err(TtsError::Cancelled)));
        drop(first);
    }
}
