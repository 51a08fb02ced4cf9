//! Punctuation helper
//!
//! Recognizers emit unpunctuated fragments; synthesis sounds far better with
//! clause pauses and a terminal. These are morphological heuristics only -
//! no parsing, no language model.

use unicode_segmentation::UnicodeSegmentation;

use crate::sentence::ends_with_terminal;

/// Conjunctions that open a long clause and want a comma pause before them.
const CLAUSE_CONJUNCTIONS: &[&str] = &[
    "however", "although", "because", "while", "after", "before", "but",
];

/// Filler phrases that read as asides; a trailing comma marks the pause.
const FILLERS: &[&str] = &[
    "you know", "i think", "i mean", "vous savez", "je pense", "euh", "uh", "um", "hmm",
];

/// Leading words that signal a question.
const QUESTION_LEADS: &[&str] = &[
    "what", "where", "when", "who", "whom", "whose", "why", "how", "which", "is", "are", "was",
    "were", "do", "does", "did", "can", "could", "would", "will", "should", "shall", "may",
    "might", "am",
];

/// Words that signal exclamative intent anywhere in the fragment.
const EXCLAMATION_WORDS: &[&str] = &[
    "wow", "amazing", "incredible", "fantastic", "excellent", "congratulations", "bravo",
    "wonderful", "unbelievable",
];

/// Trailing words that tend to close a thought.
const CLOSERS: &[&str] = &[
    "today", "tomorrow", "tonight", "yesterday", "now", "soon", "please", "thanks", "everyone",
    "everybody",
];

/// Subject pronouns for the looks-complete heuristic.
const SUBJECTS: &[&str] = &[
    "i", "you", "he", "she", "it", "we", "they", "this", "that", "there",
];

/// Add clause commas and, when warranted, a terminal. Partials only get a
/// terminal if the fragment looks complete; finals always get one.
pub fn punctuate(text: &str, is_final: bool) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let mut out = insert_clause_commas(trimmed);
    out = mark_fillers(&out);

    if !ends_with_terminal(&out) && (is_final || looks_complete(&out)) {
        out.push(choose_terminal(&out));
    }
    out
}

fn insert_clause_commas(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut out: Vec<String> = Vec::with_capacity(words.len());
    let mut since_pause = 0usize;

    for word in words {
        let lower = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        let wants_comma = CLAUSE_CONJUNCTIONS.contains(&lower.as_str())
            || (lower == "and" && since_pause >= 7);

        if wants_comma && since_pause > 0 {
            if let Some(prev) = out.last_mut() {
                if !prev.ends_with([',', '.', '!', '?', ';', ':']) {
                    prev.push(',');
                    since_pause = 0;
                }
            }
        }

        if word.ends_with([',', '.', '!', '?', ';', ':']) {
            since_pause = 0;
        } else {
            since_pause += 1;
        }
        out.push(word.to_string());
    }

    out.join(" ")
}

fn mark_fillers(text: &str) -> String {
    let mut out = text.to_string();
    let lower = out.to_lowercase();
    for filler in FILLERS {
        // Only the leading filler gets a comma; mid-sentence rewrites are
        // riskier than they are worth.
        if lower.starts_with(filler) {
            let end = filler.len();
            if !out[end..].starts_with(',') && out.len() > end {
                out.insert(end, ',');
            }
            break;
        }
    }
    out
}

/// A partial looks complete when it is long enough, or shaped like a clause,
/// or ends in a closer word.
fn looks_complete(text: &str) -> bool {
    let words: Vec<String> = text.unicode_words().map(|w| w.to_lowercase()).collect();
    let n = words.len();
    if n >= 7 {
        return true;
    }
    if n >= 6 && words.iter().any(|w| SUBJECTS.contains(&w.as_str())) {
        return true;
    }
    if n >= 4 {
        if let Some(last) = words.last() {
            if CLOSERS.contains(&last.as_str()) {
                return true;
            }
        }
    }
    false
}

fn choose_terminal(text: &str) -> char {
    let words: Vec<String> = text.unicode_words().map(|w| w.to_lowercase()).collect();
    if let Some(first) = words.first() {
        if QUESTION_LEADS.contains(&first.as_str()) {
            return '?';
        }
    }
    if words.iter().any(|w| EXCLAMATION_WORDS.contains(&w.as_str())) {
        return '!';
    }
    '.'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_gets_period() {
        assert_eq!(punctuate("we start the meeting", true), "we start the meeting.");
    }

    #[test]
    fn test_question_lead() {
        assert_eq!(punctuate("where is the report", true), "where is the report?");
    }

    #[test]
    fn test_exclamation_word() {
        assert_eq!(punctuate("that is amazing news", true), "that is amazing news!");
    }

    #[test]
    fn test_existing_terminal_untouched() {
        assert_eq!(punctuate("All done.", true), "All done.");
    }

    #[test]
    fn test_clause_comma_before_conjunction() {
        let out = punctuate("we wanted to ship because the deadline moved", true);
        assert!(out.contains("ship, because"), "got: {out}");
    }

    #[test]
    fn test_and_after_long_clause() {
        let out = punctuate(
            "the team finished the rollout across every region and we celebrated",
            true,
        );
        assert!(out.contains("region, and"), "got: {out}");
    }

    #[test]
    fn test_and_after_short_clause_untouched() {
        let out = punctuate("salt and pepper", true);
        assert!(!out.contains(','), "got: {out}");
    }

    #[test]
    fn test_leading_filler_comma() {
        let out = punctuate("you know the plan changed again today", false);
        assert!(out.starts_with("you know,"), "got: {out}");
    }

    #[test]
    fn test_short_partial_left_open() {
        assert_eq!(punctuate("so then we", false), "so then we");
    }

    #[test]
    fn test_partial_with_closer_terminates() {
        assert_eq!(
            punctuate("we will meet again soon", false),
            "we will meet again soon."
        );
    }

    #[test]
    fn test_long_partial_terminates() {
        let out = punctuate("the quarterly numbers came in above every forecast", false);
        assert!(ends_with_terminal(&out));
    }
}
