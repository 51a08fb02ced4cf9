//! Final-only policy
//!
//! Synthesis is driven by committed finals alone. Maximum quality and
//! minimum repetition, at the cost of latency: partials only update the
//! display.

use std::time::Instant;

use speech_relay_config::PolicyKind;
use speech_relay_core::text::{jaccard_similarity, normalize_for_match, word_count};

use crate::policy::{PolicyOutput, SegmentationPolicy, SynthesisUnit};
use crate::sentence::extract_sentences;
use crate::FingerprintSet;

const MIN_WORDS: usize = 3;
const JACCARD_DUP: f64 = 0.85;

pub struct FinalOnlyPolicy {
    spoken: FingerprintSet,
    /// Normalized forms of everything spoken, for containment and
    /// similarity checks that a hash cannot answer.
    spoken_norms: Vec<String>,
}

impl FinalOnlyPolicy {
    pub fn new() -> Self {
        Self {
            spoken: FingerprintSet::new(),
            spoken_norms: Vec::new(),
        }
    }

    fn is_duplicate(&self, candidate: &str) -> bool {
        if self.spoken.contains(candidate) {
            return true;
        }
        let norm = normalize_for_match(candidate);
        self.spoken_norms.iter().any(|prior| {
            prior == &norm
                || prior.contains(&norm)
                || norm.contains(prior.as_str())
                || jaccard_similarity(prior, &norm) >= JACCARD_DUP
        })
    }
}

impl Default for FinalOnlyPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentationPolicy for FinalOnlyPolicy {
    fn push(&mut self, text: &str, is_final: bool, _now: Instant) -> PolicyOutput {
        if !is_final {
            return PolicyOutput::display_only(text);
        }

        let (mut candidates, remainder) = extract_sentences(text);
        if !remainder.is_empty() {
            // A final's trailing fragment is committed text; voice it too.
            candidates.push(remainder);
        }

        let mut units = Vec::new();
        for candidate in candidates {
            if word_count(&candidate) < MIN_WORDS {
                continue;
            }
            if self.is_duplicate(&candidate) {
                continue;
            }
            self.spoken.mark(&candidate);
            self.spoken_norms.push(normalize_for_match(&candidate));
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
        self.spoken_norms.clear();
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::FinalOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(units: &[SynthesisUnit]) -> Vec<&str> {
        units.iter().map(|u| u.text()).collect()
    }

    #[test]
    fn test_partials_display_only() {
        let mut policy = FinalOnlyPolicy::new();
        let out = policy.push("Hello everyone today", false, Instant::now());
        assert!(out.units.is_empty());
        assert_eq!(out.display_text, "Hello everyone today");
    }

    #[test]
    fn test_multi_sentence_final() {
        let mut policy = FinalOnlyPolicy::new();
        let out = policy.push(
            "Hello to you. How are you today? I'm fine, thank you.",
            true,
            Instant::now(),
        );
        assert_eq!(
            texts(&out.units),
            vec![
                "Hello to you.",
                "How are you today?",
                "I'm fine, thank you."
            ]
        );
    }

    #[test]
    fn test_short_fragments_rejected() {
        let mut policy = FinalOnlyPolicy::new();
        let out = policy.push("Yes. We should begin the session.", true, Instant::now());
        assert_eq!(texts(&out.units), vec!["We should begin the session."]);
    }

    #[test]
    fn test_exact_duplicate_suppressed() {
        let mut policy = FinalOnlyPolicy::new();
        policy.push("We begin the session now.", true, Instant::now());
        let out = policy.push("we begin the session now", true, Instant::now());
        assert!(out.units.is_empty());
    }

    #[test]
    fn test_near_duplicate_suppressed_by_jaccard() {
        let mut policy = FinalOnlyPolicy::new();
        policy.push(
            "The quarterly revenue numbers exceeded all forecasts this year.",
            true,
            Instant::now(),
        );
        let out = policy.push(
            "The quarterly revenue numbers exceeded all the forecasts this year.",
            true,
            Instant::now(),
        );
        assert!(out.units.is_empty());
    }

    #[test]
    fn test_containment_suppressed() {
        let mut policy = FinalOnlyPolicy::new();
        policy.push("Welcome everyone to the annual meeting.", true, Instant::now());
        let out = policy.push("Welcome everyone to the annual", true, Instant::now());
        assert!(out.units.is_empty());
    }

    #[test]
    fn test_unterminated_final_flushed() {
        let mut policy = FinalOnlyPolicy::new();
        let out = policy.push("See you all next week", true, Instant::now());
        assert_eq!(texts(&out.units), vec!["See you all next week"]);
    }
}
