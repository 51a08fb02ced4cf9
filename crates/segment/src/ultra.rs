//! Ultra-low-latency policy
//!
//! Chunks of 3-10 words, emitted as soon as three new words are available.
//! Pause punctuation inside the window is the preferred break; otherwise the
//! chunk goes out after a short wait or at the hard word bound. Fingerprints
//! still enforce at-most-once voicing.

use std::time::{Duration, Instant};

use speech_relay_config::{PolicyKind, UltraSettings};

use crate::policy::{PolicyOutput, SegmentationPolicy, SynthesisUnit};
use crate::sentence::TERMINALS;
use crate::FingerprintSet;

pub struct UltraLowLatencyPolicy {
    settings: UltraSettings,
    spoken: FingerprintSet,
    words: Vec<String>,
    emitted: usize,
    last_change_at: Option<Instant>,
}

impl UltraLowLatencyPolicy {
    pub fn new(settings: UltraSettings) -> Self {
        Self {
            settings,
            spoken: FingerprintSet::new(),
            words: Vec::new(),
            emitted: 0,
            last_change_at: None,
        }
    }

    fn pending(&self) -> &[String] {
        &self.words[self.emitted..]
    }

    fn is_pause_word(word: &str) -> bool {
        word.chars()
            .last()
            .map(|c| matches!(c, ',' | ';' | ':') || TERMINALS.contains(&c))
            .unwrap_or(false)
    }

    fn emit_chunk(&mut self, len: usize, units: &mut Vec<SynthesisUnit>) {
        let text = self.words[self.emitted..self.emitted + len].join(" ");
        self.emitted += len;
        if self.spoken.mark(&text) {
            units.push(SynthesisUnit::Utterance { text });
        }
    }

    /// Emit while a punctuation break or the hard bound allows it.
    fn drain_eager(&mut self, units: &mut Vec<SynthesisUnit>) {
        loop {
            let pending = self.pending();
            if pending.len() < self.settings.min_words {
                return;
            }
            let window = self.settings.max_words.min(pending.len());

            // Latest pause mark in the window that still yields a full chunk
            let pause_break = (self.settings.min_words..=window)
                .rev()
                .find(|&len| Self::is_pause_word(&pending[len - 1]));

            match pause_break {
                Some(len) => self.emit_chunk(len, units),
                None if pending.len() >= self.settings.max_words => {
                    self.emit_chunk(self.settings.max_words, units)
                }
                None => return,
            }
        }
    }

    fn flush_all(&mut self, units: &mut Vec<SynthesisUnit>) {
        while !self.pending().is_empty() {
            let len = self.settings.max_words.min(self.pending().len());
            self.emit_chunk(len, units);
        }
    }
}

impl SegmentationPolicy for UltraLowLatencyPolicy {
    fn push(&mut self, text: &str, is_final: bool, now: Instant) -> PolicyOutput {
        let words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        if words.len() != self.words.len() {
            self.last_change_at = Some(now);
        }
        self.words = words;
        self.emitted = self.emitted.min(self.words.len());

        let mut units = Vec::new();
        if is_final {
            self.flush_all(&mut units);
            self.words.clear();
            self.emitted = 0;
            self.last_change_at = None;
        } else {
            self.drain_eager(&mut units);
        }

        PolicyOutput {
            units,
            display_text: text.to_string(),
        }
    }

    fn poll(&mut self, now: Instant) -> Vec<SynthesisUnit> {
        let mut units = Vec::new();
        let waited = self
            .last_change_at
            .map(|t| now.duration_since(t) >= Duration::from_millis(self.settings.wait_ms))
            .unwrap_or(false);
        if !waited {
            return units;
        }

        while self.pending().len() >= self.settings.min_words {
            let len = self.settings.max_words.min(self.pending().len());
            self.emit_chunk(len, &mut units);
        }
        units
    }

    fn reset(&mut self) {
        self.spoken.clear();
        self.words.clear();
        self.emitted = 0;
        self.last_change_at = None;
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::UltraLowLatency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> UltraLowLatencyPolicy {
        UltraLowLatencyPolicy::new(UltraSettings::default())
    }

    fn texts(units: &[SynthesisUnit]) -> Vec<&str> {
        units.iter().map(|u| u.text()).collect()
    }

    #[test]
    fn test_punctuation_break_emits_immediately() {
        let mut p = policy();
        let out = p.push("well then okay, let us", false, Instant::now());
        assert_eq!(texts(&out.units), vec!["well then okay,"]);
    }

    #[test]
    fn test_unpunctuated_waits() {
        let mut p = policy();
        let t0 = Instant::now();
        let out = p.push("one two three four", false, t0);
        assert!(out.units.is_empty());

        // After the wait the pending words go out
        let units = p.poll(t0 + Duration::from_millis(150));
        assert_eq!(texts(&units), vec!["one two three four"]);
    }

    #[test]
    fn test_hard_bound_at_max_words() {
        let mut p = policy();
        let long: Vec<String> = (0..12).map(|i| format!("w{i}")).collect();
        let out = p.push(&long.join(" "), false, Instant::now());
        assert_eq!(out.units.len(), 1);
        assert_eq!(out.units[0].text().split_whitespace().count(), 10);
    }

    #[test]
    fn test_final_flushes_remainder() {
        let mut p = policy();
        let t0 = Instant::now();
        let first = p.push("one two three, four", false, t0);
        assert_eq!(texts(&first.units), vec!["one two three,"]);

        let out = p.push("one two three, four five", true, t0 + Duration::from_millis(50));
        assert_eq!(texts(&out.units), vec!["four five"]);
    }

    #[test]
    fn test_two_word_pause_break_deferred() {
        // A pause mark before min_words cannot produce an undersized chunk
        let mut p = policy();
        let out = p.push("ok, sure", false, Instant::now());
        assert!(out.units.is_empty());
    }
}
