//! Script classification for line-breaking decisions.
//!
//! Only the distinctions the line breaker needs are made: space-delimited
//! scripts, CJK (break allowed between any two ideographs), and Thai.

/// Script class of a codepoint or word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Script {
    /// Latin, Cyrillic, Greek, and other space-separated scripts.
    Latin,
    /// Chinese, Japanese, Korean.
    Cjk,
    /// Thai block.
    Thai,
    /// Digits, punctuation, symbols, or nothing significant.
    Other,
}

const CJK_RANGES: &[(u32, u32)] = &[
    // CJK Unified Ideographs
    (0x4E00, 0x9FFF),
    // Extension A
    (0x3400, 0x4DBF),
    // Compatibility Ideographs
    (0xF900, 0xFAFF),
    // Hiragana
    (0x3040, 0x309F),
    // Katakana
    (0x30A0, 0x30FF),
    // Hangul Syllables
    (0xAC00, 0xD7AF),
    // Extension B and beyond (plane 2)
    (0x20000, 0x2A6DF),
    // Fullwidth forms
    (0xFF00, 0xFFEF),
];

const THAI_RANGE: (u32, u32) = (0x0E00, 0x0E7F);

/// Whether `ch` is a CJK codepoint that permits a break on either side.
pub fn is_cjk_codepoint(ch: char) -> bool {
    let cp = ch as u32;
    CJK_RANGES.iter().any(|&(lo, hi)| cp >= lo && cp <= hi)
}

/// Whether `ch` lies in the Thai block (U+0E00..=U+0E7F).
pub fn is_thai_codepoint(ch: char) -> bool {
    let cp = ch as u32;
    cp >= THAI_RANGE.0 && cp <= THAI_RANGE.1
}

/// Classify a single codepoint.
pub fn classify(ch: char) -> Script {
    if is_cjk_codepoint(ch) {
        Script::Cjk
    } else if is_thai_codepoint(ch) {
        Script::Thai
    } else if ch.is_alphabetic() {
        Script::Latin
    } else {
        Script::Other
    }
}

/// Classify a word by its first significant codepoint.
///
/// ASCII digits and punctuation are skipped so `"(漢字)"` classifies as CJK.
/// Words with no alphabetic content classify as [`Script::Other`].
pub fn classify_word(word: &str) -> Script {
    let mut ascii_letter_seen = false;
    for ch in word.chars() {
        if ch.is_ascii() {
            ascii_letter_seen |= ch.is_ascii_alphabetic();
            continue;
        }
        match classify(ch) {
            Script::Other => continue,
            script => return script,
        }
    }
    if ascii_letter_seen {
        Script::Latin
    } else {
        Script::Other
    }
}

/// Fast check for any CJK codepoint in `text`.
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk_codepoint)
}

/// Fast check for any Thai codepoint in `text`.
pub fn contains_thai(text: &str) -> bool {
    text.chars().any(is_thai_codepoint)
}
