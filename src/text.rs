//! Truncation detection and cleanup for raw post text.
//!
//! The upstream proxy truncates long posts inconsistently: sometimes with an
//! ellipsis, sometimes by cutting mid-sentence and appending a shortened link.
//! Detection therefore layers several heuristics rather than trusting any
//! single marker.

use std::sync::LazyLock;

use regex::Regex;

/// Length at which unterminated Latin-script text is assumed truncated.
const LONG_TEXT_THRESHOLD: usize = 240;

/// Dense scripts (Devanagari, Arabic, Hebrew, Thai, CJK) hit the platform's
/// weighted length limit earlier, so use a lower threshold for them.
const DENSE_SCRIPT_THRESHOLD: usize = 180;

/// Function words that almost never end a sentence. A post whose final tokens
/// come from this list was very likely cut off mid-sentence.
const MID_SENTENCE_WORDS: &[&str] = &[
    "the", "a", "an", "to", "in", "on", "at", "by", "for", "with", "about", "like", "of", "all",
];

/// Ellipsis followed (possibly after whitespace) by a link.
static ELLIPSIS_BEFORE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:…|\.{3})\s*https?://").unwrap());

/// Trailing shortened-link reference appended by the upstream when it cuts text.
static TRAILING_SHORT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*https?://t\.co/\w+\s*$").unwrap());

/// Trailing run of three or more period/ellipsis characters. A lone ellipsis
/// survives cleanup on purpose - it is the truncation detector's strongest
/// signal.
static TRAILING_ELLIPSIS_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.…]{3,}\s*$").unwrap());

static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Decide whether `text` looks cut off by the upstream.
#[must_use]
pub fn detect_truncation(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }

    if trimmed.ends_with('…') || trimmed.ends_with("...") {
        return true;
    }

    if ELLIPSIS_BEFORE_LINK.is_match(trimmed) {
        return true;
    }

    if ends_mid_sentence(trimmed) {
        return true;
    }

    let threshold = if contains_dense_script(trimmed) {
        DENSE_SCRIPT_THRESHOLD
    } else {
        LONG_TEXT_THRESHOLD
    };
    let char_count = trimmed.chars().count();
    if char_count >= threshold && !ends_with_terminal_punctuation(trimmed) {
        return true;
    }

    false
}

/// Clean raw post text. Order matters: the trailing shortened link is stripped
/// first because removing it can expose a trailing ellipsis that must also go.
#[must_use]
pub fn clean_text(text: &str) -> String {
    let without_link = TRAILING_SHORT_LINK.replace(text, "");
    let without_ellipsis = TRAILING_ELLIPSIS_RUN.replace(without_link.trim_end(), "");
    EXCESS_NEWLINES
        .replace_all(without_ellipsis.trim_end(), "\n\n")
        .into_owned()
}

fn ends_with_terminal_punctuation(text: &str) -> bool {
    matches!(text.chars().last(), Some('.' | '!' | '?' | '"'))
}

/// True when the last one or two whitespace-delimited tokens are common
/// mid-sentence function words.
fn ends_mid_sentence(text: &str) -> bool {
    text.split_whitespace()
        .rev()
        .take(2)
        .any(|token| MID_SENTENCE_WORDS.contains(&token.to_lowercase().as_str()))
}

fn contains_dense_script(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(c as u32,
            0x0590..=0x05FF      // Hebrew
            | 0x0600..=0x06FF    // Arabic
            | 0x0900..=0x097F    // Devanagari
            | 0x0E00..=0x0E7F    // Thai
            | 0x3040..=0x30FF    // Hiragana, Katakana
            | 0x4E00..=0x9FFF    // CJK unified ideographs
            | 0xAC00..=0xD7AF    // Hangul
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_trailing_ellipsis() {
        assert!(detect_truncation("Check this out…"));
        assert!(detect_truncation("Check this out..."));
        assert!(!detect_truncation("A complete sentence."));
    }

    #[test]
    fn test_detects_ellipsis_before_link() {
        assert!(detect_truncation("cut off here… https://t.co/abc123 more"));
        assert!(detect_truncation("cut off here...https://example.com/x trailing"));
    }

    #[test]
    fn test_detects_mid_sentence_cutoff() {
        assert!(detect_truncation("I was just walking to the"));
        assert!(detect_truncation("here is a story about"));
        assert!(!detect_truncation("that is all folks!"));
    }

    #[test]
    fn test_empty_text_never_truncated() {
        assert!(!detect_truncation(""));
        assert!(!detect_truncation("   \n  "));
    }

    #[test]
    fn test_long_latin_text_without_terminator() {
        let text = "word ".repeat(50); // 250 chars, no terminal punctuation
        assert!(detect_truncation(&text));

        let mut finished = "word ".repeat(50);
        finished.push('.');
        assert!(!detect_truncation(&finished));
    }

    #[test]
    fn test_dense_script_lower_threshold() {
        // 190 Devanagari chars, no terminal punctuation
        let text: String = std::iter::repeat('\u{0915}').take(190).collect();
        assert!(detect_truncation(&text));

        let mut terminated: String = std::iter::repeat('\u{0915}').take(189).collect();
        terminated.push('.');
        assert!(!detect_truncation(&terminated));

        // The same length in Latin script is under the 240 threshold
        let latin: String = std::iter::repeat('x').take(190).collect();
        assert!(!detect_truncation(&latin));
    }

    #[test]
    fn test_clean_strips_trailing_short_link() {
        assert_eq!(
            clean_text("Some text https://t.co/a1B2c3"),
            "Some text"
        );
        // Links in the middle stay
        assert_eq!(
            clean_text("See https://t.co/a1B2c3 for details"),
            "See https://t.co/a1B2c3 for details"
        );
    }

    #[test]
    fn test_clean_strips_ellipsis_run_exposed_by_link_removal() {
        // Order matters: the link goes first, then the dot run behind it
        assert_eq!(clean_text("Cut off here... https://t.co/xYz"), "Cut off here");
        // A lone ellipsis survives so truncation detection still fires
        assert_eq!(
            clean_text("Cut off here… https://t.co/a1B2c3"),
            "Cut off here…"
        );
    }

    #[test]
    fn test_clean_collapses_newlines() {
        assert_eq!(clean_text("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_text("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_clean_keeps_short_ellipsis_runs() {
        // Fewer than three trailing dots are legitimate punctuation
        assert_eq!(clean_text("Well.."), "Well..");
        assert_eq!(clean_text("Well...."), "Well");
    }
}
