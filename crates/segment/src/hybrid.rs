//! Hybrid-stability policy
//!
//! Partials and finals both feed a table of candidate sentences. A candidate
//! is voiced once it is stable: seen often enough, committed by a final, or
//! old enough while still present. Candidates that vanish from the stream
//! (the recognizer revised them) are pruned before they can be voiced.
//!
//! An adaptive phrase sub-mode engages under rapid partial fire: extraction
//! switches to comma/pause boundaries and the stability bar drops, trading
//! a little repetition risk for latency.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use speech_relay_config::{HybridSettings, PolicyKind};
use speech_relay_core::text::{fingerprint, word_count};

use crate::policy::{PolicyOutput, SegmentationPolicy, SynthesisUnit};
use crate::sentence::{ends_with_terminal, extract_sentences};
use crate::FingerprintSet;

/// Partial rate above which phrase mode arms, events per second.
const PHRASE_RATE: usize = 3;
/// How long the rapid rate must hold before phrase mode activates.
const PHRASE_SUSTAIN: Duration = Duration::from_secs(2);
/// A pause this long deactivates phrase mode.
const PHRASE_PAUSE: Duration = Duration::from_millis(900);
/// Stability window while in phrase mode.
const PHRASE_WINDOW: Duration = Duration::from_millis(200);
/// Phrase-mode chunk size when no pause markers appear.
const PHRASE_SPLIT_WORDS: usize = 8;
/// Candidates absent from the stream this long (and below threshold) were
/// revisions; drop them.
const PRUNE_AFTER: Duration = Duration::from_millis(1000);

struct Candidate {
    text: String,
    fp: u64,
    first_seen: Instant,
    last_seen: Instant,
    count: u32,
    ends_punct: bool,
    /// Set when a transcript event no longer contains this candidate.
    missing_since: Option<Instant>,
}

pub struct HybridPolicy {
    settings: HybridSettings,
    spoken: FingerprintSet,
    candidates: Vec<Candidate>,
    /// Partial arrival times within the last second, for rate detection.
    arrivals: Vec<Instant>,
    rapid_since: Option<Instant>,
    phrase_mode: bool,
    last_event_at: Option<Instant>,
}

impl HybridPolicy {
    pub fn new(settings: HybridSettings) -> Self {
        Self {
            settings,
            spoken: FingerprintSet::new(),
            candidates: Vec::new(),
            arrivals: Vec::new(),
            rapid_since: None,
            phrase_mode: false,
            last_event_at: None,
        }
    }

    fn effective_threshold(&self) -> u32 {
        if self.phrase_mode {
            1
        } else {
            self.settings.effective_threshold()
        }
    }

    fn effective_window(&self) -> Duration {
        if self.phrase_mode {
            PHRASE_WINDOW
        } else {
            Duration::from_millis(self.settings.time_window_ms)
        }
    }

    fn update_phrase_mode(&mut self, is_final: bool, now: Instant) {
        if let Some(last) = self.last_event_at {
            if now.duration_since(last) > PHRASE_PAUSE {
                if self.phrase_mode {
                    tracing::debug!("Phrase mode deactivated after pause");
                }
                self.phrase_mode = false;
                self.rapid_since = None;
                self.arrivals.clear();
            }
        }

        if is_final {
            return;
        }

        self.arrivals.push(now);
        self.arrivals
            .retain(|t| now.duration_since(*t) <= Duration::from_secs(1));

        if self.arrivals.len() > PHRASE_RATE {
            let since = *self.rapid_since.get_or_insert(now);
            if !self.phrase_mode && now.duration_since(since) >= PHRASE_SUSTAIN {
                tracing::debug!("Phrase mode activated under rapid partials");
                self.phrase_mode = true;
            }
        } else {
            self.rapid_since = None;
        }
    }

    /// Extraction in phrase mode: closed comma/terminal segments, with
    /// over-long open tails carved every `PHRASE_SPLIT_WORDS` words.
    fn extract_phrases(text: &str, is_final: bool) -> Vec<String> {
        let mut closed = Vec::new();
        let mut current = String::new();

        for c in text.chars() {
            current.push(c);
            if matches!(c, ',' | ';' | '、') || crate::sentence::TERMINALS.contains(&c) {
                let chunk = current.trim().trim_end_matches([',', ';', '、']).to_string();
                if !chunk.is_empty() {
                    closed.push(chunk);
                }
                current.clear();
            }
        }

        let mut tail: Vec<&str> = current.split_whitespace().collect();
        while tail.len() >= PHRASE_SPLIT_WORDS {
            let chunk: Vec<&str> = tail.drain(..PHRASE_SPLIT_WORDS).collect();
            closed.push(chunk.join(" "));
        }
        if is_final && !tail.is_empty() {
            closed.push(tail.join(" "));
        }

        closed
    }

    fn extract_candidates(&self, text: &str, is_final: bool) -> Vec<String> {
        if self.phrase_mode {
            return Self::extract_phrases(text, is_final);
        }
        let (mut sentences, remainder) = extract_sentences(text);
        if is_final && !remainder.is_empty() {
            sentences.push(remainder);
        }
        sentences
    }

    /// Emit every candidate that satisfies a stability rule, in stream order.
    fn take_stable(&mut self, is_final: bool, current: &HashSet<u64>, now: Instant) -> Vec<SynthesisUnit> {
        let threshold = self.effective_threshold();
        let window = self.effective_window();

        let mut units = Vec::new();
        let mut remaining = Vec::with_capacity(self.candidates.len());
        for candidate in self.candidates.drain(..) {
            let stable = candidate.count >= threshold
                || (is_final && current.contains(&candidate.fp))
                || (now.duration_since(candidate.first_seen) > window && candidate.count >= 2);

            if stable {
                let confidence = {
                    let threshold = threshold as f64;
                    let alive = now.duration_since(candidate.first_seen).as_secs_f64();
                    0.5 * (candidate.count as f64 / threshold).min(1.0)
                        + 0.3 * (alive / window.as_secs_f64().max(f64::EPSILON)).min(1.0)
                        + if candidate.ends_punct { 0.2 } else { 0.1 }
                };
                tracing::debug!(
                    text = %candidate.text,
                    count = candidate.count,
                    confidence,
                    since_last_ms = now.duration_since(candidate.last_seen).as_millis() as u64,
                    "Candidate stable"
                );
                self.spoken.insert_fp(candidate.fp);
                units.push(SynthesisUnit::Utterance {
                    text: candidate.text,
                });
            } else {
                remaining.push(candidate);
            }
        }
        self.candidates = remaining;
        units
    }

    /// Candidates missing from the stream for longer than the grace
    /// interval (and still below threshold) were provisional translations
    /// the speaker revised away.
    fn prune_revisions(&mut self, now: Instant) {
        let threshold = self.effective_threshold();
        self.candidates.retain(|c| {
            c.count >= threshold
                || !matches!(c.missing_since, Some(t) if now.duration_since(t) > PRUNE_AFTER)
        });
    }
}

impl SegmentationPolicy for HybridPolicy {
    fn push(&mut self, text: &str, is_final: bool, now: Instant) -> PolicyOutput {
        self.update_phrase_mode(is_final, now);
        self.last_event_at = Some(now);

        let mut current = HashSet::new();
        for extracted in self.extract_candidates(text, is_final) {
            if word_count(&extracted) == 0 {
                continue;
            }
            let fp = fingerprint(&extracted);
            if self.spoken.contains_fp(fp) {
                continue;
            }
            current.insert(fp);
            match self.candidates.iter_mut().find(|c| c.fp == fp) {
                Some(candidate) => {
                    candidate.count += 1;
                    candidate.last_seen = now;
                }
                None => self.candidates.push(Candidate {
                    ends_punct: ends_with_terminal(&extracted),
                    text: extracted,
                    fp,
                    first_seen: now,
                    last_seen: now,
                    count: 1,
                    missing_since: None,
                }),
            }
        }

        for candidate in &mut self.candidates {
            if current.contains(&candidate.fp) {
                candidate.missing_since = None;
            } else if candidate.missing_since.is_none() {
                candidate.missing_since = Some(now);
            }
        }

        self.prune_revisions(now);
        let units = self.take_stable(is_final, &current, now);

        PolicyOutput {
            units,
            display_text: text.to_string(),
        }
    }

    fn poll(&mut self, now: Instant) -> Vec<SynthesisUnit> {
        if let Some(last) = self.last_event_at {
            if self.phrase_mode && now.duration_since(last) > PHRASE_PAUSE {
                tracing::debug!("Phrase mode deactivated after pause");
                self.phrase_mode = false;
                self.rapid_since = None;
                self.arrivals.clear();
            }
        }

        // Time-window stability only; presence and finals are push-driven.
        self.prune_revisions(now);
        let current = HashSet::new();
        self.take_stable(false, &current, now)
    }

    fn reset(&mut self) {
        self.spoken.clear();
        self.candidates.clear();
        self.arrivals.clear();
        self.rapid_since = None;
        self.phrase_mode = false;
        self.last_event_at = None;
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Hybrid
    }
}
