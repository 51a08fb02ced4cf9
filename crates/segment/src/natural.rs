//! Natural-phrase policy
//!
//! Emits phrase-sized chunks at linguistically preferred boundaries:
//! phrase-final punctuation first, then clause punctuation, then a break
//! before a conjunction or preposition; never right before an article. An
//! initial delay gathers context before the first chunk; later chunks fire
//! on quiescence or when the pending buffer reaches the ideal size.

use std::time::{Duration, Instant};

use speech_relay_config::{NaturalPhraseSettings, PolicyKind};

use crate::policy::{PolicyOutput, SegmentationPolicy, SynthesisUnit};
use crate::sentence::TERMINALS;
use crate::FingerprintSet;

const CONJUNCTIONS: &[&str] = &[
    "and", "but", "or", "nor", "so", "yet", "because", "although", "while", "when", "after",
    "before", "since",
];

const PREPOSITIONS: &[&str] = &[
    "in", "on", "at", "with", "from", "to", "of", "for", "by", "about", "over", "under", "into",
    "through",
];

const ARTICLES: &[&str] = &["a", "an", "the"];

pub struct NaturalPhrasePolicy {
    settings: NaturalPhraseSettings,
    spoken: FingerprintSet,
    /// Cumulative word list of the translated stream.
    words: Vec<String>,
    /// Words already carved into chunks.
    emitted: usize,
    first_event_at: Option<Instant>,
    first_chunk_sent: bool,
    last_change_at: Option<Instant>,
}

impl NaturalPhrasePolicy {
    pub fn new(settings: NaturalPhraseSettings) -> Self {
        Self {
            settings,
            spoken: FingerprintSet::new(),
            words: Vec::new(),
            emitted: 0,
            first_event_at: None,
            first_chunk_sent: false,
            last_change_at: None,
        }
    }

    fn pending(&self) -> &[String] {
        &self.words[self.emitted..]
    }

    fn initial_delay_passed(&self, now: Instant) -> bool {
        self.first_chunk_sent
            || self
                .first_event_at
                .map(|t| now.duration_since(t) >= Duration::from_millis(self.settings.initial_delay_ms))
                .unwrap_or(false)
    }

    fn ends_with_any(word: &str, set: &[char]) -> bool {
        word.chars().last().map(|c| set.contains(&c)).unwrap_or(false)
    }

    fn is_in(word: &str, list: &[&str]) -> bool {
        list.contains(
            &word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
                .as_str(),
        )
    }

    /// Score a break after `len` words of the pending buffer.
    fn break_score(&self, pending: &[String], len: usize) -> i32 {
        let word = &pending[len - 1];
        let next = pending.get(len);

        let mut score = 0i32;
        if Self::ends_with_any(word, TERMINALS) {
            score += 100;
        } else if Self::ends_with_any(word, &[',', ';', ':']) {
            score += 60;
        }
        if let Some(next) = next {
            if Self::is_in(next, CONJUNCTIONS) {
                score += 40;
            } else if Self::is_in(next, PREPOSITIONS) {
                score += 25;
            } else if Self::is_in(next, ARTICLES) {
                score -= 30;
            }
        }
        score -= (len as i32 - self.settings.ideal_words as i32).abs();
        score
    }

    /// Best chunk length within [min, max] for the current pending buffer.
    fn best_break(&self, pending: &[String]) -> usize {
        let hi = self.settings.max_words.min(pending.len());
        let lo = self.settings.min_words.min(hi);
        (lo..=hi)
            .max_by_key(|&len| self.break_score(pending, len))
            .unwrap_or(hi)
    }

    fn emit_chunk(&mut self, len: usize, units: &mut Vec<SynthesisUnit>) {
        let text = self.words[self.emitted..self.emitted + len].join(" ");
        self.emitted += len;
        self.first_chunk_sent = true;
        if self.spoken.mark(&text) {
            units.push(SynthesisUnit::Utterance { text });
        }
    }

    fn drain_ready(&mut self, now: Instant, units: &mut Vec<SynthesisUnit>) {
        if !self.initial_delay_passed(now) {
            return;
        }
        while self.pending().len() >= self.settings.ideal_words {
            let len = self.best_break(self.pending());
            self.emit_chunk(len, units);
        }
    }

    fn flush_all(&mut self, units: &mut Vec<SynthesisUnit>) {
        while !self.pending().is_empty() {
            let len = if self.pending().len() > self.settings.max_words {
                self.best_break(self.pending())
            } else {
                self.pending().len()
            };
            self.emit_chunk(len, units);
        }
    }
}

impl SegmentationPolicy for NaturalPhrasePolicy {
    fn push(&mut self, text: &str, is_final: bool, now: Instant) -> PolicyOutput {
        let words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        self.first_event_at.get_or_insert(now);
        if words.len() != self.words.len() {
            self.last_change_at = Some(now);
        }
        self.words = words;
        self.emitted = self.emitted.min(self.words.len());

        let mut units = Vec::new();
        if is_final {
            self.flush_all(&mut units);
            // The next utterance starts a fresh buffer
            self.words.clear();
            self.emitted = 0;
            self.first_event_at = None;
            self.last_change_at = None;
        } else {
            self.drain_ready(now, &mut units);
        }

        PolicyOutput {
            units,
            display_text: text.to_string(),
        }
    }

    fn poll(&mut self, now: Instant) -> Vec<SynthesisUnit> {
        let mut units = Vec::new();
        if !self.initial_delay_passed(now) {
            return units;
        }
        let quiescent = self
            .last_change_at
            .map(|t| now.duration_since(t) >= Duration::from_millis(self.settings.quiescence_ms))
            .unwrap_or(false);
        if !quiescent {
            return units;
        }

        while self.pending().len() >= self.settings.min_words {
            let len = self.best_break(self.pending());
            self.emit_chunk(len, &mut units);
        }
        units
    }

    fn reset(&mut self) {
        self.spoken.clear();
        self.words.clear();
        self.emitted = 0;
        self.first_event_at = None;
        self.first_chunk_sent = false;
        self.last_change_at = None;
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::NaturalPhrase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> NaturalPhrasePolicy {
        NaturalPhrasePolicy::new(NaturalPhraseSettings::default())
    }

    fn texts(units: &[SynthesisUnit]) -> Vec<&str> {
        units.iter().map(|u| u.text()).collect()
    }

    #[test]
    fn test_initial_delay_holds_first_chunk() {
        let mut p = policy();
        let t0 = Instant::now();
        let out = p.push(
            "one two three four five six seven eight nine",
            false,
            t0,
        );
        assert!(out.units.is_empty());

        // After the initial delay the buffer drains at the ideal size
        let units = p.poll(t0 + Duration::from_millis(300));
        assert!(!units.is_empty());
    }

    #[test]
    fn test_prefers_punctuation_boundary() {
        let mut p = policy();
        let t0 = Instant::now();
        p.push(
            "we finished the first milestone, then the team moved on quickly",
            false,
            t0,
        );
        let units = p.poll(t0 + Duration::from_millis(300));
        assert_eq!(texts(&units)[0], "we finished the first milestone,");
    }

    #[test]
    fn test_no_break_before_article() {
        let mut p = policy();
        let t0 = Instant::now();
        p.push(
            "the students walked into the grand old library hall today quietly",
            false,
            t0,
        );
        let units = p.poll(t0 + Duration::from_millis(300));
        for unit in &units {
            assert!(!unit.text().ends_with("into"));
        }
    }

    #[test]
    fn test_final_flushes_every_word_once() {
        let mut p = policy();
        let t0 = Instant::now();
        p.push("alpha beta gamma", false, t0);
        let out = p.push("alpha beta gamma delta epsilon", true, t0 + Duration::from_millis(40));

        let all: Vec<String> = out
            .units
            .iter()
            .flat_map(|u| u.text().split_whitespace().map(str::to_string))
            .collect();
        assert_eq!(all, vec!["alpha", "beta", "gamma", "delta", "epsilon"]);
    }

    #[test]
    fn test_chunks_within_bounds() {
        let mut p = policy();
        let t0 = Instant::now();
        let long: Vec<String> = (0..40).map(|i| format!("w{i}")).collect();
        let out = p.push(&long.join(" "), true, t0);
        for unit in &out.units {
            let n = unit.text().split_whitespace().count();
            assert!(n <= 15, "chunk of {n} words exceeds max");
        }
        let total: usize = out
            .units
            .iter()
            .map(|u| u.text().split_whitespace().count())
            .sum();
        assert_eq!(total, 40);
    }
}
