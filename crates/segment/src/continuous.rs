//! Continuous-streaming policy
//!
//! No utterance carving at all. A character cursor tracks how much of the
//! cumulative translated text has been forwarded; whenever the new suffix
//! reaches the minimum delta (or a final arrives) it goes out verbatim as a
//! delta for the persistent synthesis channel. Prosody is entirely the
//! provider's problem.

use std::time::Instant;

use speech_relay_config::{ContinuousSettings, PolicyKind};

use crate::policy::{PolicyOutput, SegmentationPolicy, SynthesisUnit};

pub struct ContinuousPolicy {
    settings: ContinuousSettings,
    /// Characters of the cumulative text already forwarded.
    cursor: usize,
}

impl ContinuousPolicy {
    pub fn new(settings: ContinuousSettings) -> Self {
        Self {
            settings,
            cursor: 0,
        }
    }
}

impl SegmentationPolicy for ContinuousPolicy {
    fn push(&mut self, text: &str, is_final: bool, _now: Instant) -> PolicyOutput {
        let total = text.chars().count();

        // The recognizer reset or revised below our cursor; re-sync rather
        // than re-speak already-forwarded text.
        if total < self.cursor {
            self.cursor = total;
        }

        let delta: String = text.chars().skip(self.cursor).collect();
        let delta_len = total - self.cursor;

        let mut units = Vec::new();
        if delta_len >= self.settings.min_delta_chars || (is_final && delta_len > 0) {
            self.cursor = total;
            units.push(SynthesisUnit::Delta { text: delta });
        }

        if is_final {
            // Next utterance restarts the cumulative text
            self.cursor = 0;
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
        self.cursor = 0;
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Continuous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ContinuousPolicy {
        ContinuousPolicy::new(ContinuousSettings::default())
    }

    #[test]
    fn test_deltas_cover_text_exactly_once() {
        let mut p = policy();
        let now = Instant::now();

        let mut forwarded = String::new();
        for (text, is_final) in [
            ("Hol", false),
            ("Hola a", false),
            ("Hola a tod", false),
            ("Hola a todos.", true),
        ] {
            for unit in p.push(text, is_final, now).units {
                forwarded.push_str(unit.text());
            }
        }
        assert_eq!(forwarded, "Hola a todos.");
    }

    #[test]
    fn test_small_delta_held_back() {
        let mut p = policy();
        let now = Instant::now();
        p.push("abc", false, now);
        let out = p.push("abcd", false, now);
        assert!(out.units.is_empty());
        let out = p.push("abcdef", false, now);
        assert_eq!(out.units[0].text(), "def");
    }

    #[test]
    fn test_final_flushes_any_delta() {
        let mut p = policy();
        let now = Instant::now();
        p.push("abc", false, now);
        let out = p.push("abcd", true, now);
        assert_eq!(out.units[0].text(), "d");
    }

    #[test]
    fn test_cursor_resets_after_final() {
        let mut p = policy();
        let now = Instant::now();
        p.push("First sentence.", true, now);
        let out = p.push("Second", false, now);
        assert_eq!(out.units[0].text(), "Second");
    }

    #[test]
    fn test_revision_shrink_resyncs() {
        let mut p = policy();
        let now = Instant::now();
        p.push("The cats are", false, now);
        // Recognizer revised to something shorter
        let out = p.push("The cat", false, now);
        assert!(out.units.is_empty());
        let out = p.push("The cat sat down", false, now);
        assert_eq!(out.units[0].text(), " sat down");
    }
}
