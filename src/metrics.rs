//! Width-measurement and hyphenation hooks consumed by the typesetter.
//!
//! The glyph rasterizer owns the real implementation; layout only sees this
//! trait, injected as a shared handle.

use crate::text_block::FontStyle;

/// Font metrics oracle used for line fitting.
pub trait GlyphMetrics: Send + Sync {
    /// Advance width of `text` in pixels.
    fn text_width(&self, font_id: i32, text: &str, style: FontStyle) -> u16;

    /// Width of one inter-word space in pixels.
    fn space_width(&self, font_id: i32) -> u16;

    /// Nominal line advance in pixels.
    fn line_height(&self, font_id: i32) -> u16;

    /// Force-split a word that is wider than `max_width`.
    ///
    /// Every chunk except the last ends with a visible `-` and fits within
    /// `max_width` where possible. A chunk always holds at least one
    /// codepoint so the split terminates for any width.
    fn break_oversized_word(
        &self,
        font_id: i32,
        word: &str,
        max_width: u16,
        style: FontStyle,
    ) -> Vec<String> {
        let mut chunks = Vec::with_capacity(4);
        let mut rest = word;
        while !rest.is_empty() {
            if self.text_width(font_id, rest, style) <= max_width {
                chunks.push(rest.to_string());
                break;
            }
            let mut split_at = 0usize;
            let mut candidate = String::with_capacity(rest.len() + 1);
            for (idx, ch) in rest.char_indices() {
                candidate.clear();
                candidate.push_str(&rest[..idx + ch.len_utf8()]);
                candidate.push('-');
                if self.text_width(font_id, &candidate, style) > max_width {
                    break;
                }
                split_at = idx + ch.len_utf8();
            }
            if split_at == 0 {
                split_at = rest.chars().next().map_or(rest.len(), char::len_utf8);
            }
            if split_at >= rest.len() {
                chunks.push(rest.to_string());
                break;
            }
            let mut chunk = String::with_capacity(split_at + 1);
            chunk.push_str(&rest[..split_at]);
            chunk.push('-');
            chunks.push(chunk);
            rest = &rest[split_at..];
        }
        chunks
    }
}

/// Deterministic metrics with a fixed advance per codepoint.
///
/// CJK codepoints advance `wide_advance`; everything else `advance`. Bold
/// adds one pixel per codepoint. Useful for tests and host tooling where no
/// rasterizer is available.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedAdvanceMetrics {
    /// Advance for narrow codepoints.
    pub advance: u16,
    /// Advance for CJK codepoints.
    pub wide_advance: u16,
    /// Width of a space.
    pub space: u16,
    /// Line advance.
    pub line_height: u16,
}

impl FixedAdvanceMetrics {
    pub fn new(advance: u16, space: u16, line_height: u16) -> Self {
        Self {
            advance,
            wide_advance: advance.saturating_mul(2),
            space,
            line_height,
        }
    }
}

impl Default for FixedAdvanceMetrics {
    fn default() -> Self {
        Self::new(10, 5, 24)
    }
}

impl GlyphMetrics for FixedAdvanceMetrics {
    fn text_width(&self, _font_id: i32, text: &str, style: FontStyle) -> u16 {
        let bold_extra = u16::from(style.is_bold());
        let mut width = 0u16;
        for ch in text.chars() {
            let advance = if ch == '\u{00AD}' {
                0
            } else if crate::script::is_cjk_codepoint(ch) {
                self.wide_advance
            } else {
                self.advance
            };
            width = width.saturating_add(advance.saturating_add(bold_extra));
        }
        width
    }

    fn space_width(&self, _font_id: i32) -> u16 {
        self.space
    }

    fn line_height(&self, _font_id: i32) -> u16 {
        self.line_height
    }
}
