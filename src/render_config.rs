//! Rendering configuration fingerprint stored in every section header.

use serde::{Deserialize, Serialize};

use crate::text_block::BlockStyle;

/// Settings that determine how a chapter is paginated.
///
/// Every field is recorded in the section cache header; a cache built with
/// different settings is discarded.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Font family id handed to the metrics oracle.
    pub font_id: i32,
    /// Multiplier applied to the font's line height.
    pub line_compression: f32,
    /// First-line indent setting (0 none, 1 normal, 2 em, 3 large).
    pub indent_level: u8,
    /// Extra space after blocks (0 none, 1 quarter line, 3 full line).
    pub spacing_level: u8,
    /// Default paragraph alignment as a [`BlockStyle`] tag.
    pub paragraph_alignment: u8,
    /// Split oversized words at soft hyphens or by force.
    pub hyphenation: bool,
    /// Lay out images instead of alt text.
    pub show_images: bool,
    pub viewport_width: u16,
    pub viewport_height: u16,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            font_id: 0,
            line_compression: 1.0,
            indent_level: 0,
            spacing_level: 0,
            paragraph_alignment: BlockStyle::Justified as u8,
            hyphenation: true,
            show_images: true,
            viewport_width: 480,
            viewport_height: 800,
        }
    }
}

impl RenderConfig {
    /// Defaults sized for a display's text area.
    pub fn for_viewport(viewport_width: u16, viewport_height: u16) -> Self {
        Self {
            viewport_width,
            viewport_height,
            ..Self::default()
        }
    }

    pub fn with_font_id(mut self, font_id: i32) -> Self {
        self.font_id = font_id;
        self
    }

    pub fn with_line_compression(mut self, line_compression: f32) -> Self {
        self.line_compression = line_compression;
        self
    }

    pub fn with_indent_level(mut self, indent_level: u8) -> Self {
        self.indent_level = indent_level;
        self
    }

    pub fn with_spacing_level(mut self, spacing_level: u8) -> Self {
        self.spacing_level = spacing_level;
        self
    }

    pub fn with_paragraph_alignment(mut self, alignment: BlockStyle) -> Self {
        self.paragraph_alignment = alignment as u8;
        self
    }

    pub fn with_hyphenation(mut self, hyphenation: bool) -> Self {
        self.hyphenation = hyphenation;
        self
    }

    pub fn with_show_images(mut self, show_images: bool) -> Self {
        self.show_images = show_images;
        self
    }

    /// Alignment used for body paragraphs.
    pub fn block_style(&self) -> BlockStyle {
        BlockStyle::from_setting(self.paragraph_alignment)
    }

    /// Line advance in pixels for a font line height.
    pub fn line_advance(&self, font_line_height: u16) -> i32 {
        (f32::from(font_line_height) * self.line_compression) as i32
    }

    /// Extra vertical space after a block.
    pub fn block_spacing(&self, line_advance: i32) -> i32 {
        match self.spacing_level {
            1 => line_advance / 4,
            3 => line_advance,
            _ => 0,
        }
    }
}

impl PartialEq for RenderConfig {
    fn eq(&self, other: &Self) -> bool {
        self.font_id == other.font_id
            && self.line_compression.to_bits() == other.line_compression.to_bits()
            && self.indent_level == other.indent_level
            && self.spacing_level == other.spacing_level
            && self.paragraph_alignment == other.paragraph_alignment
            && self.hyphenation == other.hyphenation
            && self.show_images == other.show_images
            && self.viewport_width == other.viewport_width
            && self.viewport_height == other.viewport_height
    }
}

impl Eq for RenderConfig {}
