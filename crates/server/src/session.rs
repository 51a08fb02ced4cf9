//! Session state
//!
//! One session binds one speaker to a set of listeners under a 4-character
//! code. The session owns its per-language pipelines and the cancellation
//! channel that tears all of them down when the speaker goes away.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use speech_relay_core::{LanguageTag, SessionCode};

use crate::pipeline::PipelineHandle;

/// One listener's preferences, keyed by connection id in the session.
#[derive(Debug, Clone)]
pub struct Listener {
    pub lang: LanguageTag,
    pub voice: Option<String>,
}

/// Per-session counters.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub utterances: AtomicU64,
    pub errors: AtomicU64,
    pub cumulative_latency_ms: AtomicU64,
}

/// Live state for one session.
pub struct SessionHandle {
    pub code: SessionCode,
    pub speaker_conn: String,
    pub source_lang: LanguageTag,
    /// Declared by the speaker at join; when empty the effective target set
    /// is the union of listener languages.
    pub declared_targets: Vec<LanguageTag>,
    pub listeners: RwLock<HashMap<String, Listener>>,
    pub pipelines: RwLock<HashMap<LanguageTag, PipelineHandle>>,
    pub metrics: SessionMetrics,
    pub created_at: Instant,
    last_activity: RwLock<Instant>,
    cancel_tx: watch::Sender<bool>,
}

impl SessionHandle {
    pub fn new(
        code: SessionCode,
        speaker_conn: impl Into<String>,
        source_lang: LanguageTag,
        declared_targets: Vec<LanguageTag>,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            code,
            speaker_conn: speaker_conn.into(),
            source_lang,
            declared_targets,
            listeners: RwLock::new(HashMap::new()),
            pipelines: RwLock::new(HashMap::new()),
            metrics: SessionMetrics::default(),
            created_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
            cancel_tx,
        }
    }

    /// A receiver every child task selects on for teardown.
    pub fn cancel_rx(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    /// Cancel all child tasks and drop the pipeline senders.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
        self.pipelines.write().clear();
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Stale: nobody listening and old enough for the reaper.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.listeners.read().is_empty() && self.created_at.elapsed() >= max_age
    }

    /// The languages transcripts get translated into right now.
    pub fn effective_targets(&self) -> Vec<LanguageTag> {
        if !self.declared_targets.is_empty() {
            return self.declared_targets.clone();
        }
        let mut langs: Vec<LanguageTag> = self
            .listeners
            .read()
            .values()
            .map(|l| l.lang.clone())
            .collect();
        langs.sort();
        langs.dedup();
        langs
    }

    /// Languages advertised to a joining listener.
    pub fn available_languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self
            .declared_targets
            .iter()
            .map(|l| l.to_string())
            .chain(self.listeners.read().values().map(|l| l.lang.to_string()))
            .collect();
        langs.push(self.source_lang.to_string());
        langs.sort();
        langs.dedup();
        langs
    }

    /// Voice preferences of the listeners on one language.
    pub fn listener_voices(&self, lang: &LanguageTag) -> Vec<Option<String>> {
        self.listeners
            .read()
            .values()
            .filter(|l| &l.lang == lang)
            .map(|l| l.voice.clone())
            .collect()
    }

    pub fn record_error(&self) {
        self.metrics.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_utterance(&self) {
        self.metrics.utterances.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionHandle {
        SessionHandle::new(
            SessionCode::parse("DEMO").unwrap(),
            "conn-1",
            LanguageTag::new("en").unwrap(),
            Vec::new(),
        )
    }

    #[test]
    fn test_effective_targets_from_listeners() {
        let s = session();
        assert!(s.effective_targets().is_empty());

        s.listeners.write().insert(
            "conn-2".to_string(),
            Listener {
                lang: LanguageTag::new("es").unwrap(),
                voice: None,
            },
        );
        s.listeners.write().insert(
            "conn-3".to_string(),
            Listener {
                lang: LanguageTag::new("es").unwrap(),
                voice: None,
            },
        );
        s.listeners.write().insert(
            "conn-4".to_string(),
            Listener {
                lang: LanguageTag::new("fr").unwrap(),
                voice: None,
            },
        );

        let targets = s.effective_targets();
        assert_eq!(targets.len(), 2);
        assert!(targets.contains(&LanguageTag::new("es").unwrap()));
        assert!(targets.contains(&LanguageTag::new("fr").unwrap()));
    }

    #[test]
    fn test_declared_targets_take_precedence() {
        let s = SessionHandle::new(
            SessionCode::parse("DEMO").unwrap(),
            "conn-1",
            LanguageTag::new("en").unwrap(),
            vec![LanguageTag::new("de").unwrap()],
        );
        s.listeners.write().insert(
            "conn-2".to_string(),
            Listener {
                lang: LanguageTag::new("es").unwrap(),
                voice: None,
            },
        );
        assert_eq!(s.effective_targets(), vec![LanguageTag::new("de").unwrap()]);
    }

    #[test]
    fn test_stale_requires_no_listeners() {
        let s = session();
        assert!(s.is_stale(Duration::ZERO));

        s.listeners.write().insert(
            "conn-2".to_string(),
            Listener {
                lang: LanguageTag::new("es").unwrap(),
                voice: None,
            },
        );
        assert!(!s.is_stale(Duration::ZERO));
    }

    #[test]
    fn test_cancel_notifies_children() {
        let s = session();
        let mut rx = s.cancel_rx();
        assert!(!*rx.borrow());
        s.cancel();
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
    }
}
