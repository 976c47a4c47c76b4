//! Positioned page content and its cache encoding.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorPhase, PagerError};
use crate::serialization::{
    read_i16, read_u16, read_u32, read_u8, write_i16, write_u16, write_u32, write_u8,
};
use crate::text_block::TextBlock;

/// Sanity bound on elements per serialized page.
pub const MAX_ELEMENTS_PER_PAGE: u16 = 2048;
/// Sanity bound on an encoded image record.
pub const MAX_IMAGE_RECORD_BYTES: u32 = 4096;

const TAG_LINE: u8 = 1;
const TAG_IMAGE: u8 = 2;

/// Opaque image placement metadata.
///
/// Decoding and drawing belong to the renderer; the cache only records where
/// the image goes and how large it was laid out.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBlock {
    /// Resource path as referenced by the markup.
    pub src: String,
    /// Alternate text.
    pub alt: String,
    /// Laid-out width in pixels.
    pub width: u16,
    /// Laid-out height in pixels.
    pub height: u16,
}

/// A typeset line placed on a page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageLine {
    pub x: i16,
    pub y: i16,
    pub block: TextBlock,
}

/// An image placed on a page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageImage {
    pub x: i16,
    pub y: i16,
    pub image: ImageBlock,
}

/// One positioned element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageElement {
    Line(PageLine),
    Image(PageImage),
}

impl PageElement {
    /// Vertical position of the element's top edge.
    pub fn y(&self) -> i16 {
        match self {
            Self::Line(line) => line.y,
            Self::Image(image) => image.y,
        }
    }
}

/// An ordered list of positioned elements for one screen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Page {
    elements: Vec<PageElement>,
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_line(&mut self, x: i16, y: i16, block: TextBlock) {
        self.elements.push(PageElement::Line(PageLine { x, y, block }));
    }

    pub fn add_image(&mut self, x: i16, y: i16, image: ImageBlock) {
        self.elements
            .push(PageElement::Image(PageImage { x, y, image }));
    }

    pub fn elements(&self) -> &[PageElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Lines in drawing order.
    pub fn lines(&self) -> impl Iterator<Item = &PageLine> + '_ {
        self.elements.iter().filter_map(|element| match element {
            PageElement::Line(line) => Some(line),
            PageElement::Image(_) => None,
        })
    }

    /// Concatenated line texts separated by newlines (debugging and tests).
    pub fn text(&self) -> String {
        let mut out = String::new();
        for (idx, line) in self.lines().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            out.push_str(&line.block.text());
        }
        out
    }

    /// Encode the page: element count, then tagged elements.
    pub fn serialize<W: Write + ?Sized>(&self, w: &mut W) -> Result<(), PagerError> {
        let count = u16::try_from(self.elements.len())
            .ok()
            .filter(|count| *count <= MAX_ELEMENTS_PER_PAGE)
            .ok_or_else(|| {
                PagerError::new(
                    ErrorPhase::Serialize,
                    "PAGE_TOO_LARGE",
                    format!("Page has {} elements", self.elements.len()),
                )
            })?;
        write_u16(w, count)?;
        for element in &self.elements {
            match element {
                PageElement::Line(line) => {
                    write_u8(w, TAG_LINE)?;
                    write_i16(w, line.x)?;
                    write_i16(w, line.y)?;
                    line.block.serialize(w)?;
                }
                PageElement::Image(image) => {
                    write_u8(w, TAG_IMAGE)?;
                    write_i16(w, image.x)?;
                    write_i16(w, image.y)?;
                    let record = postcard::to_allocvec(&image.image).map_err(|err| {
                        PagerError::new(ErrorPhase::Serialize, "IMAGE_ENCODE", err.to_string())
                    })?;
                    let len = u32::try_from(record.len())
                        .ok()
                        .filter(|len| *len <= MAX_IMAGE_RECORD_BYTES)
                        .ok_or_else(|| {
                            PagerError::new(
                                ErrorPhase::Serialize,
                                "IMAGE_RECORD_TOO_LARGE",
                                format!("Image record of {} bytes", record.len()),
                            )
                        })?;
                    write_u32(w, len)?;
                    w.write_all(&record)?;
                }
            }
        }
        Ok(())
    }

    /// Decode a page written by [`serialize`](Self::serialize).
    pub fn deserialize<R: Read + ?Sized>(r: &mut R) -> Result<Self, PagerError> {
        let count = read_u16(r)?;
        if count > MAX_ELEMENTS_PER_PAGE {
            return Err(PagerError::corrupt(
                "CORRUPT_ELEMENT_COUNT",
                format!("Element count {} exceeds {}", count, MAX_ELEMENTS_PER_PAGE),
            ));
        }
        let mut elements = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let tag = read_u8(r)?;
            let x = read_i16(r)?;
            let y = read_i16(r)?;
            match tag {
                TAG_LINE => {
                    let block = TextBlock::deserialize(r)?;
                    elements.push(PageElement::Line(PageLine { x, y, block }));
                }
                TAG_IMAGE => {
                    let len = read_u32(r)?;
                    if len > MAX_IMAGE_RECORD_BYTES {
                        return Err(PagerError::corrupt(
                            "CORRUPT_IMAGE_RECORD",
                            format!("Image record length {}", len),
                        ));
                    }
                    let mut record = vec![0u8; len as usize];
                    r.read_exact(&mut record)?;
                    let image: ImageBlock = postcard::from_bytes(&record).map_err(|err| {
                        PagerError::corrupt("CORRUPT_IMAGE_RECORD", err.to_string())
                    })?;
                    elements.push(PageElement::Image(PageImage { x, y, image }));
                }
                other => {
                    return Err(PagerError::corrupt(
                        "CORRUPT_ELEMENT_TAG",
                        format!("Unknown page element tag {}", other),
                    ));
                }
            }
        }
        Ok(Self { elements })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text_block::{BlockStyle, FontStyle, WordData};
    use std::io::Cursor;

    fn line(text: &str) -> TextBlock {
        TextBlock::new(
            vec![WordData {
                word: text.to_string(),
                x: 0,
                style: FontStyle::Regular,
            }],
            BlockStyle::Left,
            false,
        )
    }

    #[test]
    fn mixed_page_round_trips() {
        let mut page = Page::new();
        page.add_line(4, 0, line("first"));
        page.add_image(
            10,
            24,
            ImageBlock {
                src: "images/cover.png".to_string(),
                alt: "Cover".to_string(),
                width: 300,
                height: 200,
            },
        );
        page.add_line(4, 224, line("second"));

        let mut out = Vec::new();
        page.serialize(&mut out).unwrap();
        let back = Page::deserialize(&mut Cursor::new(out)).unwrap();
        assert_eq!(back, page);
        assert_eq!(back.text(), "first\nsecond");
        assert_eq!(back.elements()[1].y(), 24);
    }

    #[test]
    fn line_element_layout() {
        let mut page = Page::new();
        page.add_line(-1, 2, TextBlock::new(Vec::new(), BlockStyle::Justified, false));
        let mut out = Vec::new();
        page.serialize(&mut out).unwrap();
        assert_eq!(out, [1, 0, TAG_LINE, 0xFF, 0xFF, 2, 0, 0, 0, 0]);
    }

    #[test]
    fn unknown_tag_is_corruption() {
        let bytes = vec![1, 0, 9, 0, 0, 0, 0];
        let err = Page::deserialize(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.code, "CORRUPT_ELEMENT_TAG");
    }

    #[test]
    fn truncated_page_is_corruption() {
        let mut page = Page::new();
        page.add_line(0, 0, line("cut"));
        let mut out = Vec::new();
        page.serialize(&mut out).unwrap();
        out.truncate(out.len() - 2);
        let err = Page::deserialize(&mut Cursor::new(out)).unwrap_err();
        assert!(err.is_corruption());
    }
}
