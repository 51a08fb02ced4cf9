//! Relay observability
//!
//! Two surfaces: Prometheus text at `/metrics` (via the metrics-exporter
//! recorder) and a JSON snapshot at `/api/metrics` backed by the in-process
//! counters below. An hourly rollup resets the counters while carrying the
//! running latency average forward.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Finals slower than this are logged as high-latency events.
const HIGH_LATENCY: Duration = Duration::from_millis(200);

/// Install the Prometheus recorder. Call once at startup.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

#[derive(Debug, Default)]
struct LatencyStats {
    count: u64,
    total_ms: u64,
    /// Survives rollups.
    running_avg_ms: f64,
}

/// Process-wide relay counters.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    active_connections: AtomicU64,
    peak_connections: AtomicU64,
    sessions_started: AtomicU64,
    translations: AtomicU64,
    high_latency_events: AtomicU64,
    rollups: AtomicU64,
    latency: Mutex<LatencyStats>,
    errors: Mutex<HashMap<String, u64>>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        let active = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_connections.fetch_max(active, Ordering::Relaxed);
        metrics::gauge!("relay_active_connections").set(active as f64);
    }

    pub fn connection_closed(&self) {
        let previous = self.active_connections.fetch_sub(1, Ordering::Relaxed);
        metrics::gauge!("relay_active_connections").set(previous.saturating_sub(1) as f64);
    }

    pub fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("relay_sessions_total").increment(1);
    }

    pub fn record_translation(&self, latency: Duration, is_final: bool) {
        self.translations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("relay_translations_total").increment(1);
        metrics::histogram!("relay_translation_latency_ms").record(latency.as_millis() as f64);

        let mut stats = self.latency.lock();
        stats.count += 1;
        stats.total_ms += latency.as_millis() as u64;

        if is_final && latency > HIGH_LATENCY {
            self.high_latency_events.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                latency_ms = latency.as_millis() as u64,
                "High-latency translation on final transcript"
            );
        }
    }

    pub fn record_error(&self, kind: &str) {
        *self.errors.lock().entry(kind.to_string()).or_insert(0) += 1;
        metrics::counter!("relay_errors_total", "kind" => kind.to_string()).increment(1);
    }

    /// Reset counters; preserve the running latency average.
    pub fn hourly_rollup(&self) {
        {
            let mut stats = self.latency.lock();
            if stats.count > 0 {
                let window_avg = stats.total_ms as f64 / stats.count as f64;
                stats.running_avg_ms = if stats.running_avg_ms == 0.0 {
                    window_avg
                } else {
                    (stats.running_avg_ms + window_avg) / 2.0
                };
            }
            stats.count = 0;
            stats.total_ms = 0;
        }
        self.translations.store(0, Ordering::Relaxed);
        self.high_latency_events.store(0, Ordering::Relaxed);
        self.errors.lock().clear();
        let rollup = self.rollups.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(rollup, "Hourly metrics rollup");
    }

    pub fn snapshot(&self, sessions: Vec<SessionSnapshot>, tts: TtsSnapshot) -> MetricsSnapshot {
        let (avg_window_ms, running_avg_ms) = {
            let stats = self.latency.lock();
            let avg = if stats.count > 0 {
                stats.total_ms as f64 / stats.count as f64
            } else {
                0.0
            };
            (avg, stats.running_avg_ms)
        };

        MetricsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            peak_connections: self.peak_connections.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            active_sessions: sessions.len() as u64,
            translations: self.translations.load(Ordering::Relaxed),
            avg_translation_latency_ms: avg_window_ms,
            running_avg_latency_ms: running_avg_ms,
            high_latency_events: self.high_latency_events.load(Ordering::Relaxed),
            rollups: self.rollups.load(Ordering::Relaxed),
            errors: self.errors.lock().clone(),
            tts,
            sessions,
        }
    }
}

/// Aggregated dispatcher counters across all live pipelines.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TtsSnapshot {
    pub primary_used: u64,
    pub secondary_used: u64,
    pub synth_errors: u64,
    pub dropped_entries: u64,
    pub rate_adjustments: u64,
    pub current_queue_depth: u64,
    pub max_queue_depth: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub code: String,
    pub source_lang: String,
    pub listeners: usize,
    pub languages: Vec<String>,
    pub utterances: u64,
    pub errors: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub active_connections: u64,
    pub peak_connections: u64,
    pub sessions_started: u64,
    pub active_sessions: u64,
    pub translations: u64,
    pub avg_translation_latency_ms: f64,
    pub running_avg_latency_ms: f64,
    pub high_latency_events: u64,
    pub rollups: u64,
    pub errors: HashMap<String, u64>,
    pub tts: TtsSnapshot,
    pub sessions: Vec<SessionSnapshot>,
}

/// Hourly rollup task with watch-channel shutdown.
pub fn start_rollup_task(metrics: Arc<RelayMetrics>) -> watch::Sender<bool> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => metrics.hourly_rollup(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_high_water_mark() {
        let m = RelayMetrics::new();
        m.connection_opened();
        m.connection_opened();
        m.connection_closed();
        m.connection_opened();

        let snap = m.snapshot(Vec::new(), TtsSnapshot::default());
        assert_eq!(snap.active_connections, 2);
        assert_eq!(snap.peak_connections, 2);
    }

    #[test]
    fn test_rollup_preserves_running_average() {
        let m = RelayMetrics::new();
        m.record_translation(Duration::from_millis(100), false);
        m.record_translation(Duration::from_millis(200), false);

        m.hourly_rollup();
        let snap = m.snapshot(Vec::new(), TtsSnapshot::default());
        assert_eq!(snap.translations, 0);
        assert!((snap.running_avg_latency_ms - 150.0).abs() < 1.0);
    }

    #[test]
    fn test_error_tally_by_kind() {
        let m = RelayMetrics::new();
        m.record_error("translator");
        m.record_error("translator");
        m.record_error("tts");

        let snap = m.snapshot(Vec::new(), TtsSnapshot::default());
        assert_eq!(snap.errors["translator"], 2);
        assert_eq!(snap.errors["tts"], 1);
    }
}
