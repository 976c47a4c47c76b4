//! Typeset lines and their cache encoding.

use std::io::{Read, Write};

use crate::error::PagerError;
use crate::serialization::{read_string, read_u16, read_u8, write_string, write_u16, write_u8};

/// Sanity bound on words per serialized line.
pub const MAX_WORDS_PER_LINE: u16 = 10_000;

const ALIGNMENT_MASK: u8 = 0x03;
const FLAG_MONOSPACE: u8 = 0x04;

/// Font style tag attached to every word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FontStyle {
    #[default]
    Regular = 0,
    Bold = 1,
    Italic = 2,
    BoldItalic = 3,
}

impl FontStyle {
    /// Combine bold/italic toggles into a style tag.
    pub fn from_flags(bold: bool, italic: bool) -> Self {
        match (bold, italic) {
            (true, true) => Self::BoldItalic,
            (true, false) => Self::Bold,
            (false, true) => Self::Italic,
            (false, false) => Self::Regular,
        }
    }

    pub fn is_bold(self) -> bool {
        matches!(self, Self::Bold | Self::BoldItalic)
    }

    pub fn is_italic(self) -> bool {
        matches!(self, Self::Italic | Self::BoldItalic)
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Regular),
            1 => Some(Self::Bold),
            2 => Some(Self::Italic),
            3 => Some(Self::BoldItalic),
            _ => None,
        }
    }
}

/// Horizontal alignment of a block's lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockStyle {
    #[default]
    Justified = 0,
    Left = 1,
    Center = 2,
    Right = 3,
}

impl BlockStyle {
    /// Decode the low alignment bits; every 2-bit value is defined.
    fn from_bits(bits: u8) -> Self {
        match bits & ALIGNMENT_MASK {
            0 => Self::Justified,
            1 => Self::Left,
            2 => Self::Center,
            _ => Self::Right,
        }
    }

    /// Map a stored paragraph-alignment setting to a style, defaulting to justified.
    pub fn from_setting(setting: u8) -> Self {
        if setting > 3 {
            return Self::Justified;
        }
        Self::from_bits(setting)
    }
}

/// One positioned word of a line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WordData {
    /// Display text (soft hyphens already stripped).
    pub word: String,
    /// X offset in pixels from the line origin.
    pub x: u16,
    /// Font style tag.
    pub style: FontStyle,
}

/// An immutable typeset line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextBlock {
    words: Vec<WordData>,
    style: BlockStyle,
    monospace: bool,
}

impl TextBlock {
    pub fn new(words: Vec<WordData>, style: BlockStyle, monospace: bool) -> Self {
        Self {
            words,
            style,
            monospace,
        }
    }

    pub fn words(&self) -> &[WordData] {
        &self.words
    }

    pub fn style(&self) -> BlockStyle {
        self.style
    }

    pub fn is_monospace(&self) -> bool {
        self.monospace
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Concatenate the words with single spaces (debugging and tests).
    pub fn text(&self) -> String {
        let mut out = String::with_capacity(self.words.iter().map(|w| w.word.len() + 1).sum());
        for (idx, wd) in self.words.iter().enumerate() {
            if idx > 0 {
                out.push(' ');
            }
            out.push_str(&wd.word);
        }
        out
    }

    /// Encode the line.
    ///
    /// Field order is fixed: count, words, x offsets, styles, alignment byte.
    pub fn serialize<W: Write + ?Sized>(&self, w: &mut W) -> Result<(), PagerError> {
        let count = u16::try_from(self.words.len())
            .ok()
            .filter(|count| *count <= MAX_WORDS_PER_LINE)
            .ok_or_else(|| {
                PagerError::new(
                    crate::error::ErrorPhase::Serialize,
                    "LINE_TOO_LONG",
                    format!("Line has {} words", self.words.len()),
                )
            })?;
        write_u16(w, count)?;
        for wd in &self.words {
            write_string(w, &wd.word)?;
        }
        for wd in &self.words {
            write_u16(w, wd.x)?;
        }
        for wd in &self.words {
            write_u8(w, wd.style as u8)?;
        }
        let mut flags = self.style as u8;
        if self.monospace {
            flags |= FLAG_MONOSPACE;
        }
        write_u8(w, flags)
    }

    /// Decode a line written by [`serialize`](Self::serialize).
    ///
    /// Unknown high bits in the trailing alignment byte are ignored.
    pub fn deserialize<R: Read + ?Sized>(r: &mut R) -> Result<Self, PagerError> {
        let count = read_u16(r)?;
        if count > MAX_WORDS_PER_LINE {
            log::warn!(
                "[TXB] Deserialization failed: word count {} exceeds maximum",
                count
            );
            return Err(PagerError::corrupt(
                "CORRUPT_WORD_COUNT",
                format!("Word count {} exceeds {}", count, MAX_WORDS_PER_LINE),
            ));
        }
        let count = count as usize;

        let mut words = Vec::with_capacity(count);
        for _ in 0..count {
            words.push(read_string(r)?);
        }
        let mut xs = Vec::with_capacity(count);
        for _ in 0..count {
            xs.push(read_u16(r)?);
        }
        let mut data = Vec::with_capacity(count);
        for (word, x) in words.into_iter().zip(xs) {
            let tag = read_u8(r)?;
            let style = FontStyle::from_tag(tag).ok_or_else(|| {
                PagerError::corrupt("CORRUPT_FONT_STYLE", format!("Unknown font style {}", tag))
            })?;
            data.push(WordData { word, x, style });
        }

        let flags = read_u8(r)?;
        Ok(Self {
            words: data,
            style: BlockStyle::from_bits(flags),
            monospace: flags & FLAG_MONOSPACE != 0,
        })
    }
}
