//! Text normalization and fingerprinting
//!
//! A fingerprint is a stable hash of the normalized form of an utterance:
//! NFD-decomposed with combining marks stripped, lowercased, whitespace
//! collapsed, non-alphanumerics dropped. It is the key for at-most-once
//! voicing, so two renderings of the same spoken sentence ("Héllo, wörld!"
//! vs "hello world") must collide.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

/// Normalize text for comparison only: NFD, strip combining marks,
/// lowercase, keep alphanumerics, collapse runs of everything else into
/// single spaces.
pub fn normalize_for_match(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.nfd() {
        if is_combining_mark(c) {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(c.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// Stable hash of the normalized utterance. SipHash with fixed keys, so the
/// value is deterministic for the life of the process, which is the entire
/// scope of a fingerprint (per-session in-memory state).
pub fn fingerprint(text: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    normalize_for_match(text).hash(&mut hasher);
    hasher.finish()
}

/// Unicode-aware word count.
pub fn word_count(text: &str) -> usize {
    text.unicode_words().count()
}

/// Words of the normalized form, for token-set comparisons.
pub fn normalized_tokens(text: &str) -> HashSet<String> {
    normalize_for_match(text)
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Token-set Jaccard similarity of two utterances, on normalized tokens.
/// Two empty texts are identical (1.0).
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let ta = normalized_tokens(a);
    let tb = normalized_tokens(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - intersection;
    if union == 0 {
        return 1.0;
    }
    intersection as f64 / union as f64
}

/// First `n` words of the normalized form, joined by spaces. Used for
/// prefix-based duplicate checks.
pub fn normalized_prefix(text: &str, n: usize) -> String {
    normalize_for_match(text)
        .split(' ')
        .filter(|w| !w.is_empty())
        .take(n)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_diacritics_and_case() {
        assert_eq!(normalize_for_match("Héllo, Wörld!"), "hello world");
        assert_eq!(normalize_for_match("  ¿Qué   tal?  "), "que tal");
    }

    #[test]
    fn test_fingerprint_collides_on_equivalent_text() {
        assert_eq!(fingerprint("Héllo, wörld!"), fingerprint("hello world"));
        assert_ne!(fingerprint("hello world"), fingerprint("hello worlds"));
    }

    #[test]
    fn test_fingerprint_stable_across_calls() {
        assert_eq!(fingerprint("Bienvenidos."), fingerprint("Bienvenidos."));
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count("Hola a todos."), 3);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn test_jaccard() {
        assert!((jaccard_similarity("the cat sat", "the cat sat") - 1.0).abs() < f64::EPSILON);
        assert!(jaccard_similarity("the cat sat", "a dog ran") < 0.01);
        let sim = jaccard_similarity("the quick brown fox jumps", "the quick brown fox leaps");
        assert!(sim > 0.6 && sim < 0.9);
    }

    #[test]
    fn test_normalized_prefix() {
        assert_eq!(
            normalized_prefix("The Quick, brown FOX jumps over", 5),
            "the quick brown fox jumps"
        );
        assert_eq!(normalized_prefix("one two", 5), "one two");
    }
}
