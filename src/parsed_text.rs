//! Pending paragraph: script-aware word queue, optimal line breaking, and
//! destructive line extraction.
//!
//! Words are appended as the content driver tokenizes markup and are popped
//! from the front as lines are produced, so a paragraph never holds more
//! than the words not yet laid out.

use std::collections::VecDeque;

use smallvec::SmallVec;

use crate::metrics::GlyphMetrics;
use crate::script::{contains_cjk, is_cjk_codepoint};
use crate::text_block::{BlockStyle, FontStyle, TextBlock, WordData};

/// Demerit sentinel meaning "unreachable".
pub const INFINITY_PENALTY: f32 = 10_000.0;
/// Cost added for every line to discourage extra lines.
pub const LINE_PENALTY: f32 = 50.0;
/// Fixed demerit for a word that alone exceeds the line width.
const OVERSIZED_WORD_DEMERITS: f32 = 100.0;

const SOFT_HYPHEN: char = '\u{00AD}';
const EM_SPACE: char = '\u{2003}';
const EN_SPACE: char = '\u{2002}';

/// A paragraph's words awaiting layout.
///
/// `words` and `word_styles` are index-aligned and always the same length.
#[derive(Clone, Debug)]
pub struct ParsedText {
    words: VecDeque<String>,
    word_styles: VecDeque<FontStyle>,
    style: BlockStyle,
    indent_level: u8,
    indent_pending: bool,
    hyphenation: bool,
    monospace: bool,
}

impl ParsedText {
    /// Start a paragraph with `style` alignment.
    ///
    /// `indent_level` is the first-line indent setting (0 = none, 2 = em
    /// space, 3 = em + en space, anything else = en space).
    pub fn new(style: BlockStyle, indent_level: u8, hyphenation: bool) -> Self {
        Self {
            words: VecDeque::with_capacity(16),
            word_styles: VecDeque::with_capacity(16),
            style,
            indent_level,
            indent_pending: indent_level > 0,
            hyphenation,
            monospace: false,
        }
    }

    /// Mark produced lines as monospace.
    pub fn with_monospace(mut self, monospace: bool) -> Self {
        self.monospace = monospace;
        self
    }

    pub fn style(&self) -> BlockStyle {
        self.style
    }

    pub fn set_style(&mut self, style: BlockStyle) {
        self.style = style;
    }

    pub fn is_monospace(&self) -> bool {
        self.monospace
    }

    pub fn set_monospace(&mut self, monospace: bool) {
        self.monospace = monospace;
    }

    /// Change the first-line indent before any line has been produced.
    pub fn set_indent_level(&mut self, indent_level: u8) {
        self.indent_level = indent_level;
        self.indent_pending = indent_level > 0;
    }

    /// Number of pending words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Iterate pending words with their styles.
    pub fn words(&self) -> impl Iterator<Item = (&str, FontStyle)> + '_ {
        self.words
            .iter()
            .map(String::as_str)
            .zip(self.word_styles.iter().copied())
    }

    /// Append a whitespace-free token, splitting CJK codepoints into
    /// standalone words.
    ///
    /// Runs of non-CJK codepoints stay grouped; each CJK codepoint becomes
    /// its own word so a line may break between any two ideographs.
    pub fn add_word(&mut self, word: &str, style: FontStyle) {
        if word.is_empty() {
            return;
        }
        if !contains_cjk(word) {
            self.push_word(word.to_string(), style);
            return;
        }

        let mut run_start: Option<usize> = None;
        for (idx, ch) in word.char_indices() {
            if is_cjk_codepoint(ch) {
                if let Some(start) = run_start.take() {
                    self.push_word(word[start..idx].to_string(), style);
                }
                self.push_word(ch.to_string(), style);
            } else if run_start.is_none() {
                run_start = Some(idx);
            }
        }
        if let Some(start) = run_start {
            self.push_word(word[start..].to_string(), style);
        }
    }

    fn push_word(&mut self, word: String, style: FontStyle) {
        self.words.push_back(word);
        self.word_styles.push_back(style);
    }

    /// Lay out pending words into lines of `viewport_width` pixels and hand
    /// each finished line to `process_line`, consuming the words it holds.
    ///
    /// With `include_last_line == false` the final (possibly incomplete) line
    /// is left pending so later words can still join it.
    pub fn layout_and_extract_lines<F>(
        &mut self,
        metrics: &dyn GlyphMetrics,
        font_id: i32,
        viewport_width: u16,
        include_last_line: bool,
        mut process_line: F,
    ) where
        F: FnMut(TextBlock),
    {
        if self.words.is_empty() {
            return;
        }

        let page_width = i32::from(viewport_width);
        let space_width = i32::from(metrics.space_width(font_id));

        if self.hyphenation {
            self.pre_split_oversized_words(metrics, font_id, viewport_width);
        }
        self.apply_indent();

        let word_widths = self.calculate_word_widths(metrics, font_id);
        let line_breaks = compute_line_breaks(page_width, space_width, &word_widths);
        let line_count = if include_last_line {
            line_breaks.len()
        } else {
            line_breaks.len().saturating_sub(1)
        };

        for break_index in 0..line_count {
            let line = self.extract_line(
                break_index,
                page_width,
                space_width,
                &word_widths,
                &line_breaks,
            );
            process_line(line);
        }
    }

    fn apply_indent(&mut self) {
        if !self.indent_pending {
            return;
        }
        let Some(first) = self.words.front_mut() else {
            return;
        };
        match self.indent_level {
            0 => {}
            2 => first.insert(0, EM_SPACE),
            3 => {
                first.insert(0, EN_SPACE);
                first.insert(0, EM_SPACE);
            }
            _ => first.insert(0, EN_SPACE),
        }
        self.indent_pending = false;
    }

    /// Measure every pending word, stripping soft hyphens in place so the
    /// stored text matches what is drawn.
    fn calculate_word_widths(&mut self, metrics: &dyn GlyphMetrics, font_id: i32) -> Vec<u16> {
        let mut widths = Vec::with_capacity(self.words.len());
        for (word, style) in self.words.iter_mut().zip(self.word_styles.iter()) {
            if word.contains(SOFT_HYPHEN) {
                *word = strip_soft_hyphens(word);
            }
            widths.push(metrics.text_width(font_id, word.as_str(), *style));
        }
        widths
    }

    fn extract_line(
        &mut self,
        break_index: usize,
        page_width: i32,
        space_width: i32,
        word_widths: &[u16],
        line_breaks: &[usize],
    ) -> TextBlock {
        let line_break = line_breaks[break_index];
        let last_break_at = if break_index > 0 {
            line_breaks[break_index - 1]
        } else {
            0
        };
        let line_word_count = line_break - last_break_at;
        let gaps = line_word_count.saturating_sub(1) as i32;

        let line_word_width_sum: i32 = word_widths[last_break_at..line_break]
            .iter()
            .map(|w| i32::from(*w))
            .sum();
        let spare_space = page_width - line_word_width_sum;
        let is_last_line = break_index == line_breaks.len() - 1;

        let mut spacing = space_width;
        if self.style == BlockStyle::Justified && !is_last_line && line_word_count >= 2 {
            spacing = spare_space / gaps;
        }

        let mut x = match self.style {
            BlockStyle::Right => spare_space - gaps * space_width,
            BlockStyle::Center => (spare_space - gaps * space_width) / 2,
            BlockStyle::Justified | BlockStyle::Left => 0,
        }
        .max(0);

        let mut line_data = Vec::with_capacity(line_word_count);
        for width in &word_widths[last_break_at..line_break] {
            let (Some(word), Some(style)) = (self.words.pop_front(), self.word_styles.pop_front())
            else {
                break;
            };
            line_data.push(WordData {
                word,
                x: clamp_x(x),
                style,
            });
            x += i32::from(*width) + spacing;
        }

        TextBlock::new(line_data, self.style, self.monospace)
    }

    /// Split words wider than the page at soft hyphens, falling back to the
    /// metrics oracle's forced hyphenation.
    fn pre_split_oversized_words(
        &mut self,
        metrics: &dyn GlyphMetrics,
        font_id: i32,
        page_width: u16,
    ) {
        let mut idx = 0usize;
        while idx < self.words.len() {
            let style = self.word_styles[idx];
            let fits = {
                let word = &self.words[idx];
                if word.contains(SOFT_HYPHEN) {
                    metrics.text_width(font_id, &strip_soft_hyphens(word), style) <= page_width
                } else {
                    metrics.text_width(font_id, word, style) <= page_width
                }
            };
            if fits {
                idx += 1;
                continue;
            }

            let (Some(word), Some(_)) = (self.words.remove(idx), self.word_styles.remove(idx))
            else {
                break;
            };
            let pieces = split_oversized_word(metrics, font_id, page_width, word, style);
            let piece_count = pieces.len();
            for (offset, piece) in pieces.into_iter().enumerate() {
                self.words.insert(idx + offset, piece);
                self.word_styles.insert(idx + offset, style);
            }
            idx += piece_count.max(1);
        }
    }
}

fn clamp_x(x: i32) -> u16 {
    x.clamp(0, i32::from(u16::MAX)) as u16
}

fn split_oversized_word(
    metrics: &dyn GlyphMetrics,
    font_id: i32,
    page_width: u16,
    word: String,
    style: FontStyle,
) -> SmallVec<[String; 4]> {
    let mut pieces: SmallVec<[String; 4]> = SmallVec::new();
    let mut remaining = word;
    loop {
        let stripped = strip_soft_hyphens(&remaining);
        if metrics.text_width(font_id, &stripped, style) <= page_width {
            pieces.push(remaining);
            break;
        }

        let positions = soft_hyphen_positions(&remaining);
        let best = positions.iter().rev().copied().find(|&pos| {
            let prefix = word_prefix(&remaining, pos);
            metrics.text_width(font_id, &prefix, style) <= page_width
        });
        let Some(pos) = best else {
            pieces.extend(metrics.break_oversized_word(font_id, &stripped, page_width, style));
            break;
        };

        pieces.push(word_prefix(&remaining, pos));
        let suffix = remaining[pos + SOFT_HYPHEN.len_utf8()..].to_string();
        if suffix.is_empty() {
            break;
        }
        remaining = suffix;
    }
    pieces
}

/// Byte offsets of every soft hyphen in `word`.
fn soft_hyphen_positions(word: &str) -> SmallVec<[usize; 8]> {
    word.char_indices()
        .filter(|(_, ch)| *ch == SOFT_HYPHEN)
        .map(|(idx, _)| idx)
        .collect()
}

/// Text before the soft hyphen at `pos`, stripped, plus a visible hyphen.
fn word_prefix(word: &str, pos: usize) -> String {
    let mut prefix = strip_soft_hyphens(&word[..pos]);
    prefix.push('-');
    prefix
}

/// Remove every soft hyphen from `text`.
pub fn strip_soft_hyphens(text: &str) -> String {
    if text.contains(SOFT_HYPHEN) {
        text.chars().filter(|ch| *ch != SOFT_HYPHEN).collect()
    } else {
        text.to_string()
    }
}

fn calculate_badness(line_width: i32, target_width: i32) -> f32 {
    if line_width > target_width {
        return INFINITY_PENALTY;
    }
    if line_width == target_width {
        return 0.0;
    }
    let ratio = (target_width - line_width) as f32 / target_width as f32;
    ratio * ratio * ratio * 100.0
}

fn calculate_demerits(badness: f32, is_last_line: bool) -> f32 {
    if badness >= INFINITY_PENALTY {
        return INFINITY_PENALTY;
    }
    if is_last_line {
        return 0.0;
    }
    (1.0 + badness) * (1.0 + badness)
}

/// Knuth-Plass breakpoints for `word_widths` on lines of `page_width`.
///
/// Returns the exclusive end index of every line, strictly increasing and
/// ending at `word_widths.len()`. A word wider than the page is placed
/// alone. When no chain of breaks reaches the start, every word gets its own
/// line.
pub fn compute_line_breaks(page_width: i32, space_width: i32, word_widths: &[u16]) -> Vec<usize> {
    let n = word_widths.len();
    if n == 0 {
        return Vec::new();
    }

    // min_demerits[i]: cheapest layout of words [0, i) as complete lines.
    let mut min_demerits = vec![INFINITY_PENALTY; n + 1];
    let mut prev_break: Vec<Option<usize>> = vec![None; n + 1];
    min_demerits[0] = 0.0;

    for i in 0..n {
        if min_demerits[i] >= INFINITY_PENALTY {
            continue;
        }

        let mut line_width = -space_width;
        for j in i..n {
            line_width += i32::from(word_widths[j]) + space_width;

            if line_width > page_width {
                if j == i {
                    let demerits = OVERSIZED_WORD_DEMERITS + LINE_PENALTY;
                    if min_demerits[i] + demerits < min_demerits[j + 1] {
                        min_demerits[j + 1] = min_demerits[i] + demerits;
                        prev_break[j + 1] = Some(i);
                    }
                }
                break;
            }

            let is_last_line = j == n - 1;
            let badness = calculate_badness(line_width, page_width);
            let demerits = calculate_demerits(badness, is_last_line) + LINE_PENALTY;

            if min_demerits[i] + demerits < min_demerits[j + 1] {
                min_demerits[j + 1] = min_demerits[i] + demerits;
                prev_break[j + 1] = Some(i);
            }
        }
    }

    let mut breaks = Vec::with_capacity(n / 4 + 1);
    let mut pos = n;
    while pos > 0 {
        let Some(prev) = prev_break[pos] else {
            break;
        };
        breaks.push(pos);
        pos = prev;
    }
    breaks.reverse();

    if breaks.is_empty() || pos != 0 {
        breaks.clear();
        breaks.extend(1..=n);
    }
    breaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::FixedAdvanceMetrics;

    fn metrics() -> FixedAdvanceMetrics {
        FixedAdvanceMetrics::new(10, 10, 20)
    }

    fn collect_lines(text: &mut ParsedText, width: u16, include_last: bool) -> Vec<TextBlock> {
        let m = metrics();
        let mut lines = Vec::new();
        text.layout_and_extract_lines(&m, 0, width, include_last, |line| lines.push(line));
        lines
    }

    fn paragraph(style: BlockStyle, words: &[&str]) -> ParsedText {
        let mut text = ParsedText::new(style, 0, true);
        for word in words {
            text.add_word(word, FontStyle::Regular);
        }
        text
    }

    fn next_pseudo_random(state: &mut u32) -> u32 {
        *state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        *state >> 16
    }

    #[test]
    fn four_equal_words_break_in_pairs() {
        assert_eq!(compute_line_breaks(100, 10, &[40, 40, 40, 40]), vec![2, 4]);
    }

    #[test]
    fn breaks_partition_all_words() {
        let mut seed = 7u32;
        for _ in 0..200 {
            let n = (next_pseudo_random(&mut seed) % 60) as usize;
            let widths: Vec<u16> = (0..n)
                .map(|_| (next_pseudo_random(&mut seed) % 90 + 1) as u16)
                .collect();
            let max = widths.iter().copied().max().unwrap_or(0);
            let page_width = i32::from(max) + (next_pseudo_random(&mut seed) % 200) as i32;
            let breaks = compute_line_breaks(page_width, 6, &widths);
            if n == 0 {
                assert!(breaks.is_empty());
                continue;
            }
            assert_eq!(*breaks.last().unwrap(), n);
            assert!(breaks.windows(2).all(|w| w[0] < w[1]));
            assert!(breaks[0] > 0);
        }
    }

    #[test]
    fn oversized_word_sits_alone() {
        let breaks = compute_line_breaks(100, 10, &[30, 150, 30]);
        assert_eq!(breaks, vec![1, 2, 3]);
    }

    #[test]
    fn unreachable_chain_falls_back_to_word_per_line() {
        // First line would be nearly empty: demerits exceed the sentinel.
        assert_eq!(compute_line_breaks(100, 10, &[0, 100]), vec![1, 2]);
    }

    #[test]
    fn breaks_are_deterministic() {
        let widths = [12u16, 48, 7, 33, 90, 5, 61, 22, 18, 40, 3];
        let a = compute_line_breaks(120, 8, &widths);
        let b = compute_line_breaks(120, 8, &widths);
        assert_eq!(a, b);

        let mut first = paragraph(BlockStyle::Justified, &["alpha", "beta", "gamma", "delta"]);
        let mut second = first.clone();
        assert_eq!(
            collect_lines(&mut first, 120, true),
            collect_lines(&mut second, 120, true)
        );
    }

    #[test]
    fn cjk_codepoints_become_words() {
        let mut text = ParsedText::new(BlockStyle::Left, 0, false);
        text.add_word("你好world", FontStyle::Bold);
        let words: Vec<_> = text.words().collect();
        assert_eq!(
            words,
            [
                ("你", FontStyle::Bold),
                ("好", FontStyle::Bold),
                ("world", FontStyle::Bold)
            ]
        );

        let mut text = ParsedText::new(BlockStyle::Left, 0, false);
        text.add_word("hello", FontStyle::Regular);
        assert_eq!(text.len(), 1);

        let mut text = ParsedText::new(BlockStyle::Left, 0, false);
        text.add_word("a你b", FontStyle::Regular);
        text.add_word("", FontStyle::Regular);
        let words: Vec<_> = text.words().map(|(w, _)| w).collect();
        assert_eq!(words, ["a", "你", "b"]);
    }

    #[test]
    fn left_lines_use_space_width() {
        let mut text = paragraph(BlockStyle::Left, &["aaaa", "aaaa", "aaaa", "aaaa"]);
        let lines = collect_lines(&mut text, 100, true);
        assert_eq!(lines.len(), 2);
        let xs: Vec<u16> = lines[0].words().iter().map(|w| w.x).collect();
        assert_eq!(xs, [0, 50]);
        assert!(text.is_empty());
    }

    #[test]
    fn justified_lines_spread_spare_space() {
        let mut text = paragraph(BlockStyle::Justified, &["aaa", "aa", "aaa", "aa", "a"]);
        let lines = collect_lines(&mut text, 110, true);
        assert_eq!(lines.len(), 2);
        // First line: 80px of words, 30px spare over two gaps.
        let xs: Vec<u16> = lines[0].words().iter().map(|w| w.x).collect();
        assert_eq!(xs, [0, 45, 80]);
        // Last line stays ragged.
        let xs: Vec<u16> = lines[1].words().iter().map(|w| w.x).collect();
        assert_eq!(xs, [0, 30]);
    }

    #[test]
    fn right_and_center_offsets() {
        let mut text = paragraph(BlockStyle::Right, &["aa", "aa"]);
        let lines = collect_lines(&mut text, 100, true);
        let xs: Vec<u16> = lines[0].words().iter().map(|w| w.x).collect();
        assert_eq!(xs, [50, 80]);

        let mut text = paragraph(BlockStyle::Center, &["aa", "aa"]);
        let lines = collect_lines(&mut text, 100, true);
        let xs: Vec<u16> = lines[0].words().iter().map(|w| w.x).collect();
        assert_eq!(xs, [25, 55]);
    }

    #[test]
    fn excluding_last_line_keeps_tail_pending() {
        let mut text = paragraph(BlockStyle::Left, &["aaaa", "aaaa", "aaaa", "aaaa", "aa"]);
        let lines = collect_lines(&mut text, 100, false);
        assert_eq!(lines.len(), 2);
        assert_eq!(text.len(), 1);
        text.add_word("bb", FontStyle::Regular);
        let rest = collect_lines(&mut text, 100, true);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].text(), "aa bb");
    }

    #[test]
    fn soft_hyphen_splits_oversized_word() {
        let mut text = ParsedText::new(BlockStyle::Left, 0, true);
        text.add_word(
            "supercalifragilisticexpialidocious\u{00AD}ish",
            FontStyle::Regular,
        );
        // 34 letters + hyphen = 350px fits; the full 37 letters do not.
        let lines = collect_lines(&mut text, 360, true);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text(), "supercalifragilisticexpialidocious-");
        assert!(metrics().text_width(0, &lines[0].text(), FontStyle::Regular) <= 360);
        assert_eq!(lines[1].text(), "ish");
    }

    #[test]
    fn soft_hyphen_picks_rightmost_fitting_split() {
        let mut text = ParsedText::new(BlockStyle::Left, 0, true);
        text.add_word("aaa\u{00AD}bbb\u{00AD}ccc\u{00AD}ddd", FontStyle::Regular);
        let lines = collect_lines(&mut text, 75, true);
        let texts: Vec<String> = lines.iter().map(TextBlock::text).collect();
        assert_eq!(texts, ["aaabbb-", "cccddd"]);
    }

    #[test]
    fn word_without_soft_hyphen_uses_forced_break() {
        let mut text = ParsedText::new(BlockStyle::Left, 0, true);
        text.add_word("abcdefghij", FontStyle::Regular);
        let lines = collect_lines(&mut text, 40, true);
        let texts: Vec<String> = lines.iter().map(TextBlock::text).collect();
        assert_eq!(texts, ["abc-", "def-", "ghij"]);
    }

    #[test]
    fn hyphenation_disabled_keeps_word_whole() {
        let mut text = ParsedText::new(BlockStyle::Left, 0, false);
        text.add_word("abc\u{00AD}defghij", FontStyle::Regular);
        let lines = collect_lines(&mut text, 40, true);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text(), "abcdefghij");
    }

    #[test]
    fn indent_is_applied_once() {
        let mut text = ParsedText::new(BlockStyle::Left, 2, false);
        for _ in 0..6 {
            text.add_word("aaaa", FontStyle::Regular);
        }
        let first = collect_lines(&mut text, 100, false);
        assert!(first[0].words()[0].word.starts_with('\u{2003}'));
        let rest = collect_lines(&mut text, 100, true);
        assert!(rest
            .iter()
            .all(|line| !line.words()[0].word.starts_with('\u{2003}')));

        let mut large = ParsedText::new(BlockStyle::Left, 3, false);
        large.add_word("x", FontStyle::Regular);
        let lines = collect_lines(&mut large, 100, true);
        assert_eq!(lines[0].words()[0].word, "\u{2003}\u{2002}x");

        let mut fallback = ParsedText::new(BlockStyle::Left, 1, false);
        fallback.add_word("x", FontStyle::Regular);
        let lines = collect_lines(&mut fallback, 100, true);
        assert_eq!(lines[0].words()[0].word, "\u{2002}x");
    }

    #[test]
    fn monospace_flag_reaches_lines() {
        let mut text = ParsedText::new(BlockStyle::Left, 0, false).with_monospace(true);
        text.add_word("let", FontStyle::Regular);
        let lines = collect_lines(&mut text, 100, true);
        assert!(lines[0].is_monospace());
    }
}
