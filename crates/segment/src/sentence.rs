//! Sentence extraction
//!
//! Scans cumulative text for terminal punctuation, rejecting boundaries that
//! end a known abbreviation. The remainder (text after the last boundary) is
//! returned separately so callers can keep it as a pending candidate.

use unicode_segmentation::UnicodeSegmentation;

/// Terminal punctuation across supported scripts.
pub const TERMINALS: &[char] = &['.', '!', '?', '؟', '。', '！'];

/// Abbreviations whose trailing period is not a sentence boundary.
const ABBREVIATIONS: &[&str] = &[
    "mr.", "mrs.", "ms.", "dr.", "prof.", "sr.", "jr.", "st.", "inc.", "ltd.", "co.", "corp.",
    "u.s.", "u.k.", "e.g.", "i.e.", "etc.", "vs.", "no.", "approx.",
];

/// Does the text end with terminal punctuation (ignoring trailing
/// whitespace and closing quotes/brackets)?
pub fn ends_with_terminal(text: &str) -> bool {
    text.trim_end()
        .trim_end_matches(['"', '\'', ')', ']', '\u{201d}', '\u{2019}', '」'])
        .chars()
        .last()
        .map(|c| TERMINALS.contains(&c))
        .unwrap_or(false)
}

/// Is the word ending at this terminal a known abbreviation? A lone letter
/// before the period (an initial, or the inner periods of "U.S.") also
/// suppresses the boundary.
fn is_abbreviation(sentence_so_far: &str) -> bool {
    let token = sentence_so_far
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or(sentence_so_far)
        .to_ascii_lowercase();
    if ABBREVIATIONS.contains(&token.as_str()) {
        return true;
    }
    let mut chars = token.chars().rev();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some('.'), Some(letter), None | Some('.')) if letter.is_alphabetic()
    )
}

/// Split cumulative text into complete sentences plus the unterminated
/// remainder. Trailing quotes and brackets stay attached to their sentence.
pub fn extract_sentences(text: &str) -> (Vec<String>, String) {
    let mut sentences = Vec::new();
    let mut current = String::new();

    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        current.push(c);
        i += 1;

        if !TERMINALS.contains(&c) {
            continue;
        }
        if c == '.' && is_abbreviation(&current) {
            continue;
        }
        // A period inside a number (3.14) is not a boundary
        if c == '.' && i < chars.len() && chars[i].is_ascii_digit() {
            continue;
        }

        // Attach closing quotes/brackets, then require a break
        while i < chars.len() {
            let next = chars[i];
            if next == '"' || next == '\'' || next == ')' || next == ']'
                || next == '\u{201d}' || next == '\u{2019}' || next == '」'
            {
                current.push(next);
                i += 1;
            } else {
                break;
            }
        }

        let sentence = current.trim().to_string();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        current.clear();
    }

    (sentences, current.trim().to_string())
}

/// Complete sentences only, with fragments below `min_words` rejected.
pub fn extract_complete(text: &str, min_words: usize) -> Vec<String> {
    extract_sentences(text)
        .0
        .into_iter()
        .filter(|s| s.unicode_words().count() >= min_words)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_split() {
        let (sentences, rest) = extract_sentences("Hello there. How are you? I am");
        assert_eq!(sentences, vec!["Hello there.", "How are you?"]);
        assert_eq!(rest, "I am");
    }

    #[test]
    fn test_abbreviations_not_boundaries() {
        let (sentences, rest) = extract_sentences("Dr. Smith visited the U.S. office yesterday.");
        assert_eq!(
            sentences,
            vec!["Dr. Smith visited the U.S. office yesterday."]
        );
        assert!(rest.is_empty());
    }

    #[test]
    fn test_decimal_numbers_kept_together() {
        let (sentences, rest) = extract_sentences("Pi is 3.14 roughly. Yes.");
        assert_eq!(sentences, vec!["Pi is 3.14 roughly.", "Yes."]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_non_latin_terminators() {
        let (sentences, _) = extract_sentences("こんにちは。元気ですか。");
        assert_eq!(sentences.len(), 2);
        let (sentences, _) = extract_sentences("مرحبا بالجميع؟ نعم！");
        assert_eq!(sentences.len(), 2);
    }

    #[test]
    fn test_closing_quote_attached() {
        let (sentences, rest) = extract_sentences("He said \"stop.\" Then left.");
        assert_eq!(sentences, vec!["He said \"stop.\"", "Then left."]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_min_words_filter() {
        let sentences = extract_complete("Yes. This one is long enough.", 3);
        assert_eq!(sentences, vec!["This one is long enough."]);
    }

    #[test]
    fn test_ends_with_terminal() {
        assert!(ends_with_terminal("Done."));
        assert!(ends_with_terminal("Done.\" "));
        assert!(ends_with_terminal("انتهى؟"));
        assert!(!ends_with_terminal("Not yet"));
        assert!(!ends_with_terminal(""));
    }
}
