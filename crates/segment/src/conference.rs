//! Conference policy
//!
//! Finals only, with the most aggressive duplicate rejection: fingerprint
//! dedup, a first-five-words prefix check, and a similarity ceiling against
//! every prior utterance. Tuned for long-form conference speech where
//! recognizers love to re-commit overlapping finals.

use std::collections::HashMap;
use std::time::Instant;

use speech_relay_config::PolicyKind;
use speech_relay_core::text::{jaccard_similarity, normalized_prefix};

use crate::policy::{PolicyOutput, SegmentationPolicy, SynthesisUnit};
use crate::sentence::extract_complete;
use crate::FingerprintSet;

const MIN_WORDS: usize = 5;
const PREFIX_WORDS: usize = 5;
/// A same-prefix sentence must be this much longer to count as new content.
const PREFIX_GROWTH: f64 = 1.2;
const JACCARD_DUP: f64 = 0.85;

pub struct ConferencePolicy {
    spoken: FingerprintSet,
    /// First-five-words prefix of each spoken sentence, with the stored
    /// character length for the growth rule.
    prefixes: HashMap<String, usize>,
    spoken_texts: Vec<String>,
}

impl ConferencePolicy {
    pub fn new() -> Self {
        Self {
            spoken: FingerprintSet::new(),
            prefixes: HashMap::new(),
            spoken_texts: Vec::new(),
        }
    }

    fn passes_prefix_check(&self, candidate: &str) -> bool {
        let prefix = normalized_prefix(candidate, PREFIX_WORDS);
        match self.prefixes.get(&prefix) {
            Some(&stored_len) => {
                candidate.chars().count() as f64 > stored_len as f64 * PREFIX_GROWTH
            }
            None => true,
        }
    }

    fn passes_similarity_check(&self, candidate: &str) -> bool {
        self.spoken_texts
            .iter()
            .all(|prior| jaccard_similarity(prior, candidate) < JACCARD_DUP)
    }
}

impl Default for ConferencePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentationPolicy for ConferencePolicy {
    fn push(&mut self, text: &str, is_final: bool, _now: Instant) -> PolicyOutput {
        if !is_final {
            return PolicyOutput::display_only(text);
        }

        let mut units = Vec::new();
        for candidate in extract_complete(text, MIN_WORDS) {
            if self.spoken.contains(&candidate) {
                continue;
            }
            if !self.passes_prefix_check(&candidate) {
                continue;
            }
            if !self.passes_similarity_check(&candidate) {
                continue;
            }

            self.spoken.mark(&candidate);
            self.prefixes.insert(
                normalized_prefix(&candidate, PREFIX_WORDS),
                candidate.chars().count(),
            );
            self.spoken_texts.push(candidate.clone());
            units.push(SynthesisUnit::Utterance { text: candidate });
        }

        PolicyOutput {
            units,
            display_text: text.to_string(),
        }
    }

    fn poll(&mut self, _now: Instant) -> Vec<SynthesisUnit> {
        Vec::new()
    }

    fn reset(&mut self) {
        self.spoken.clear();
        self.prefixes.clear();
        self.spoken_texts.clear();
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Conference
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(units: &[SynthesisUnit]) -> Vec<&str> {
        units.iter().map(|u| u.text()).collect()
    }

    #[test]
    fn test_partials_ignored() {
        let mut p = ConferencePolicy::new();
        let out = p.push("Welcome everyone to this conference.", false, Instant::now());
        assert!(out.units.is_empty());
    }

    #[test]
    fn test_short_sentences_rejected() {
        let mut p = ConferencePolicy::new();
        let out = p.push("Thank you all. Let us begin with the agenda.", true, Instant::now());
        assert_eq!(texts(&out.units), vec!["Let us begin with the agenda."]);
    }

    #[test]
    fn test_same_prefix_needs_growth() {
        let mut p = ConferencePolicy::new();
        p.push(
            "Today we are going to discuss budgets.",
            true,
            Instant::now(),
        );
        // Same five-word prefix, barely longer: rejected
        let out = p.push(
            "Today we are going to discuss budgets now.",
            true,
            Instant::now(),
        );
        assert!(out.units.is_empty());
    }

    #[test]
    fn test_similar_sentence_rejected() {
        let mut p = ConferencePolicy::new();
        p.push(
            "The committee approved the final proposal on Tuesday afternoon.",
            true,
            Instant::now(),
        );
        let out = p.push(
            "The committee approved the final proposal on a Tuesday afternoon.",
            true,
            Instant::now(),
        );
        assert!(out.units.is_empty());
    }

    #[test]
    fn test_distinct_sentences_pass() {
        let mut p = ConferencePolicy::new();
        let first = p.push(
            "The committee approved the final proposal yesterday.",
            true,
            Instant::now(),
        );
        let second = p.push(
            "Our next milestone lands in early September.",
            true,
            Instant::now(),
        );
        assert_eq!(first.units.len(), 1);
        assert_eq!(second.units.len(), 1);
    }
}
