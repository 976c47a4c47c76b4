//! Persistent per-chapter page cache.
//!
//! File layout (little-endian):
//!
//! ```text
//! header   version u8, render config fields, page_count u32, lut_offset u32,
//!          has_more_content u8
//! pages    page_count serialized pages, in order
//! lut      page_count u32 file offsets, one per page
//! ```
//!
//! The header is written twice: first with placeholder `page_count` and
//! `lut_offset`, then patched once every page and the LUT are on disk. A file
//! still carrying placeholders is an interrupted build.

use std::io::{Seek, SeekFrom, Write};

use crate::content_parser::ContentParser;
use crate::error::{ErrorPhase, PagerError};
use crate::page::Page;
use crate::render_config::RenderConfig;
use crate::serialization::{
    read_f32, read_i32, read_u16, read_u32, read_u8, write_f32, write_i32, write_u16, write_u32,
    write_u8,
};
use crate::storage::{parent_dir, remove_quiet, retry, Storage};

/// Format version written by this build.
pub const SECTION_FILE_VERSION: u8 = 15;
/// `page_count` value of a header that was never patched.
pub const PAGE_COUNT_PLACEHOLDER: u32 = u32::MAX;
/// `lut_offset` value of a header that was never patched.
pub const LUT_OFFSET_PLACEHOLDER: u32 = 0;

/// One header field, in file order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HeaderField {
    Version,
    FontId,
    LineCompression,
    IndentLevel,
    SpacingLevel,
    ParagraphAlignment,
    Hyphenation,
    ShowImages,
    ViewportWidth,
    ViewportHeight,
    PageCount,
    LutOffset,
    MoreContent,
}

impl HeaderField {
    fn size(self) -> u32 {
        match self {
            Self::Version
            | Self::IndentLevel
            | Self::SpacingLevel
            | Self::ParagraphAlignment
            | Self::Hyphenation
            | Self::ShowImages
            | Self::MoreContent => 1,
            Self::ViewportWidth | Self::ViewportHeight => 2,
            Self::FontId | Self::LineCompression | Self::PageCount | Self::LutOffset => 4,
        }
    }
}

const V13_FIELDS: &[HeaderField] = &[
    HeaderField::Version,
    HeaderField::FontId,
    HeaderField::LineCompression,
    HeaderField::IndentLevel,
    HeaderField::SpacingLevel,
    HeaderField::ParagraphAlignment,
    HeaderField::Hyphenation,
    HeaderField::ViewportWidth,
    HeaderField::ViewportHeight,
    HeaderField::PageCount,
    HeaderField::LutOffset,
];

const V14_FIELDS: &[HeaderField] = &[
    HeaderField::Version,
    HeaderField::FontId,
    HeaderField::LineCompression,
    HeaderField::IndentLevel,
    HeaderField::SpacingLevel,
    HeaderField::ParagraphAlignment,
    HeaderField::Hyphenation,
    HeaderField::ShowImages,
    HeaderField::ViewportWidth,
    HeaderField::ViewportHeight,
    HeaderField::PageCount,
    HeaderField::LutOffset,
];

const V15_FIELDS: &[HeaderField] = &[
    HeaderField::Version,
    HeaderField::FontId,
    HeaderField::LineCompression,
    HeaderField::IndentLevel,
    HeaderField::SpacingLevel,
    HeaderField::ParagraphAlignment,
    HeaderField::Hyphenation,
    HeaderField::ShowImages,
    HeaderField::ViewportWidth,
    HeaderField::ViewportHeight,
    HeaderField::PageCount,
    HeaderField::LutOffset,
    HeaderField::MoreContent,
];

/// Known header layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionSchema {
    /// Before the show-images flag.
    V13,
    /// Before the partial-build flag.
    V14,
    V15,
}

impl SectionSchema {
    pub const CURRENT: Self = Self::V15;

    pub fn from_version(version: u8) -> Option<Self> {
        match version {
            13 => Some(Self::V13),
            14 => Some(Self::V14),
            15 => Some(Self::V15),
            _ => None,
        }
    }

    pub fn version(self) -> u8 {
        match self {
            Self::V13 => 13,
            Self::V14 => 14,
            Self::V15 => 15,
        }
    }

    fn fields(self) -> &'static [HeaderField] {
        match self {
            Self::V13 => V13_FIELDS,
            Self::V14 => V14_FIELDS,
            Self::V15 => V15_FIELDS,
        }
    }

    /// Encoded header size in bytes.
    pub fn header_size(self) -> u32 {
        self.fields().iter().map(|field| field.size()).sum()
    }
}

/// Decoded section header.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SectionHeader {
    pub schema: SectionSchema,
    pub config: RenderConfig,
    pub page_count: u32,
    pub lut_offset: u32,
    /// The build stopped at its page limit with input remaining.
    pub has_more_content: bool,
}

impl SectionHeader {
    /// Current-schema header with unpatched counts.
    pub fn placeholder(config: RenderConfig) -> Self {
        Self {
            schema: SectionSchema::CURRENT,
            config,
            page_count: PAGE_COUNT_PLACEHOLDER,
            lut_offset: LUT_OFFSET_PLACEHOLDER,
            has_more_content: false,
        }
    }

    pub fn has_placeholders(&self) -> bool {
        self.page_count == PAGE_COUNT_PLACEHOLDER || self.lut_offset == LUT_OFFSET_PLACEHOLDER
    }

    pub fn header_size(&self) -> u32 {
        self.schema.header_size()
    }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> Result<(), PagerError> {
        let c = &self.config;
        for field in self.schema.fields() {
            match field {
                HeaderField::Version => write_u8(w, self.schema.version())?,
                HeaderField::FontId => write_i32(w, c.font_id)?,
                HeaderField::LineCompression => write_f32(w, c.line_compression)?,
                HeaderField::IndentLevel => write_u8(w, c.indent_level)?,
                HeaderField::SpacingLevel => write_u8(w, c.spacing_level)?,
                HeaderField::ParagraphAlignment => write_u8(w, c.paragraph_alignment)?,
                HeaderField::Hyphenation => write_u8(w, u8::from(c.hyphenation))?,
                HeaderField::ShowImages => write_u8(w, u8::from(c.show_images))?,
                HeaderField::ViewportWidth => write_u16(w, c.viewport_width)?,
                HeaderField::ViewportHeight => write_u16(w, c.viewport_height)?,
                HeaderField::PageCount => write_u32(w, self.page_count)?,
                HeaderField::LutOffset => write_u32(w, self.lut_offset)?,
                HeaderField::MoreContent => write_u8(w, u8::from(self.has_more_content))?,
            }
        }
        Ok(())
    }

    /// Decode a header of any known schema.
    ///
    /// Returns `Ok(None)` for an unknown version byte.
    pub fn read<R: std::io::Read + ?Sized>(r: &mut R) -> Result<Option<Self>, PagerError> {
        let version = read_u8(r)?;
        let Some(schema) = SectionSchema::from_version(version) else {
            return Ok(None);
        };
        let mut header = Self {
            schema,
            config: RenderConfig::default(),
            page_count: PAGE_COUNT_PLACEHOLDER,
            lut_offset: LUT_OFFSET_PLACEHOLDER,
            has_more_content: false,
        };
        let c = &mut header.config;
        for field in schema.fields() {
            match field {
                HeaderField::Version => {}
                HeaderField::FontId => c.font_id = read_i32(r)?,
                HeaderField::LineCompression => c.line_compression = read_f32(r)?,
                HeaderField::IndentLevel => c.indent_level = read_u8(r)?,
                HeaderField::SpacingLevel => c.spacing_level = read_u8(r)?,
                HeaderField::ParagraphAlignment => c.paragraph_alignment = read_u8(r)?,
                HeaderField::Hyphenation => c.hyphenation = read_u8(r)? != 0,
                HeaderField::ShowImages => c.show_images = read_u8(r)? != 0,
                HeaderField::ViewportWidth => c.viewport_width = read_u16(r)?,
                HeaderField::ViewportHeight => c.viewport_height = read_u16(r)?,
                HeaderField::PageCount => header.page_count = read_u32(r)?,
                HeaderField::LutOffset => header.lut_offset = read_u32(r)?,
                HeaderField::MoreContent => header.has_more_content = read_u8(r)? != 0,
            }
        }
        Ok(Some(header))
    }
}

/// Why a cache file was rejected on load.
enum Rejection {
    UnknownVersion(u8),
    StaleVersion(SectionSchema),
    ConfigMismatch,
    Interrupted,
    Corrupt(PagerError),
}

/// Page cache for one chapter, stored at a fixed path.
pub struct Section<S: Storage> {
    storage: S,
    path: String,
    header: Option<SectionHeader>,
}

impl<S: Storage> Section<S> {
    pub fn new(storage: S, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
            header: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Header of the loaded or built file.
    pub fn header(&self) -> Option<&SectionHeader> {
        self.header.as_ref()
    }

    /// Pages in the loaded or built file (0 when nothing is loaded).
    pub fn page_count(&self) -> u32 {
        self.header.map_or(0, |header| header.page_count)
    }

    /// Whether the loaded or built file stopped at its page limit with
    /// chapter content left unpaginated.
    pub fn has_more_content(&self) -> bool {
        self.header.is_some_and(|header| header.has_more_content)
    }

    /// Open the cache file and validate it against `config`.
    ///
    /// Returns `Ok(false)` for a missing file. A file written by another
    /// version, with different settings, or damaged is deleted and also
    /// reported as `Ok(false)`.
    pub fn load_section_file(&mut self, config: &RenderConfig) -> Result<bool, PagerError> {
        self.header = None;
        if !self.storage.exists(&self.path) {
            return Ok(false);
        }

        let header = match self.read_validated_header(config)? {
            Ok(header) => header,
            Err(rejection) => {
                match rejection {
                    Rejection::UnknownVersion(version) => log::warn!(
                        "[SCT] Deserialization failed: unknown version {} in {}",
                        version,
                        self.path
                    ),
                    Rejection::StaleVersion(schema) => log::warn!(
                        "[SCT] Deserialization failed: version {} is stale in {}",
                        schema.version(),
                        self.path
                    ),
                    Rejection::ConfigMismatch => log::warn!(
                        "[SCT] Deserialization failed: parameters do not match in {}",
                        self.path
                    ),
                    Rejection::Interrupted => log::warn!(
                        "[SCT] Deserialization failed: unfinished build in {}",
                        self.path
                    ),
                    Rejection::Corrupt(err) => {
                        log::warn!("[SCT] Deserialization failed: {}", err)
                    }
                }
                self.clear_cache()?;
                return Ok(false);
            }
        };

        log::info!(
            "[SCT] Deserialization succeeded: {} pages{} in {}",
            header.page_count,
            if header.has_more_content {
                " (partial)"
            } else {
                ""
            },
            self.path
        );
        self.header = Some(header);
        Ok(true)
    }

    fn read_validated_header(
        &self,
        config: &RenderConfig,
    ) -> Result<Result<SectionHeader, Rejection>, PagerError> {
        let mut file = match self.storage.open_read(&self.path) {
            Ok(file) => file,
            Err(err) if err.code == "NOT_FOUND" => {
                return Ok(Err(Rejection::Corrupt(err)));
            }
            Err(err) => return Err(err),
        };

        let header = match SectionHeader::read(&mut file) {
            Ok(Some(header)) => header,
            Ok(None) => {
                file.seek(SeekFrom::Start(0))?;
                let version = read_u8(&mut file).unwrap_or(0);
                return Ok(Err(Rejection::UnknownVersion(version)));
            }
            Err(err) if err.is_corruption() => {
                return Ok(Err(Rejection::Corrupt(err.with_path(self.path.as_str()))))
            }
            Err(err) => return Err(err),
        };

        if header.schema != SectionSchema::CURRENT {
            return Ok(Err(Rejection::StaleVersion(header.schema)));
        }
        if header.config != *config {
            return Ok(Err(Rejection::ConfigMismatch));
        }
        if header.has_placeholders() {
            return Ok(Err(Rejection::Interrupted));
        }

        let file_len = file.seek(SeekFrom::End(0))?;
        let lut_end = u64::from(header.lut_offset) + 4 * u64::from(header.page_count);
        if header.lut_offset < header.header_size() || lut_end > file_len {
            return Ok(Err(Rejection::Corrupt(
                PagerError::corrupt(
                    "CORRUPT_LUT",
                    format!(
                        "LUT at {} with {} pages exceeds file length {}",
                        header.lut_offset, header.page_count, file_len
                    ),
                )
                .with_path(self.path.as_str()),
            )));
        }

        file.seek(SeekFrom::Start(u64::from(header.lut_offset)))?;
        for page_index in 0..header.page_count {
            let offset = match read_u32(&mut file) {
                Ok(offset) => offset,
                Err(err) if err.is_corruption() => return Ok(Err(Rejection::Corrupt(err))),
                Err(err) => return Err(err),
            };
            if offset < header.header_size() || offset >= header.lut_offset {
                return Ok(Err(Rejection::Corrupt(
                    PagerError::corrupt(
                        "CORRUPT_PAGE_OFFSET",
                        format!("Page offset {} outside page area", offset),
                    )
                    .with_path(self.path.as_str())
                    .with_page_index(page_index),
                )));
            }
        }

        Ok(Ok(header))
    }

    /// Delete the cache file if present.
    pub fn clear_cache(&mut self) -> Result<bool, PagerError> {
        self.header = None;
        if !self.storage.exists(&self.path) {
            return Ok(false);
        }
        self.storage.remove(&self.path)?;
        log::debug!("[SCT] Cache cleared: {}", self.path);
        Ok(true)
    }

    /// Paginate `parser` from the start of its input into a fresh cache
    /// file built for `config`.
    ///
    /// The parser is reset first, so a file written with a page limit is
    /// extended by building again with a larger (or no) limit. Stops after
    /// `max_pages` pages when non-zero and records in the header whether
    /// content remains. On any failure the partial file is removed.
    pub fn create_section_file(
        &mut self,
        config: &RenderConfig,
        parser: &mut dyn ContentParser,
        max_pages: u16,
    ) -> Result<(), PagerError> {
        self.header = None;
        if let Some(parent) = parent_dir(&self.path) {
            self.storage.mkdir(parent)?;
        }
        parser.reset();

        match self.write_section_file(config, parser, max_pages) {
            Ok(header) => {
                log::info!(
                    "[SCT] Section built: {} pages{} in {}",
                    header.page_count,
                    if header.has_more_content {
                        " (partial)"
                    } else {
                        ""
                    },
                    self.path
                );
                self.header = Some(header);
                Ok(())
            }
            Err(err) => {
                log::error!("[SCT] Section build failed: {}", err);
                remove_quiet(&self.storage, &self.path);
                Err(err.with_path(self.path.as_str()))
            }
        }
    }

    fn write_section_file(
        &self,
        config: &RenderConfig,
        parser: &mut dyn ContentParser,
        max_pages: u16,
    ) -> Result<SectionHeader, PagerError> {
        let mut file = retry("[SCT] open section for write", |_| {
            self.storage.open_write(&self.path)
        })?;
        let mut header = SectionHeader::placeholder(*config);
        header.write(&mut file)?;

        let mut lut: Vec<u32> = Vec::new();
        let parse_result = parser.parse_pages(
            &mut |page| {
                let offset = on_page_complete(&mut file, &page, lut.len());
                lut.push(offset);
            },
            max_pages,
        );
        parse_result?;

        if let Some(failed) = lut.iter().position(|offset| *offset == 0) {
            return Err(PagerError::new(
                ErrorPhase::Cache,
                "PAGE_WRITE_FAILED",
                "Failed to write page",
            )
            .with_page_index(failed as u32));
        }

        let lut_offset = stream_offset(&mut file)?;
        for offset in &lut {
            write_u32(&mut file, *offset)?;
        }

        header.page_count = u32::try_from(lut.len()).map_err(|_| {
            PagerError::new(ErrorPhase::Cache, "TOO_MANY_PAGES", "Page count overflows u32")
        })?;
        header.lut_offset = lut_offset;
        header.has_more_content = parser.has_more_content();
        file.seek(SeekFrom::Start(0))?;
        header.write(&mut file)?;
        file.flush()?;
        Ok(header)
    }

    /// Read page `index` from the loaded file.
    pub fn load_page(&self, index: u32) -> Result<Page, PagerError> {
        let header = self.header.ok_or_else(|| {
            PagerError::new(ErrorPhase::Cache, "NOT_LOADED", "Section file is not loaded")
                .with_path(self.path.as_str())
        })?;
        if index >= header.page_count {
            return Err(PagerError::new(
                ErrorPhase::Cache,
                "PAGE_OUT_OF_RANGE",
                format!("Section has {} pages", header.page_count),
            )
            .with_page_index(index));
        }

        let read = || -> Result<Page, PagerError> {
            let mut file = self.storage.open_read(&self.path)?;
            file.seek(SeekFrom::Start(
                u64::from(header.lut_offset) + 4 * u64::from(index),
            ))?;
            let offset = read_u32(&mut file)?;
            if offset < header.header_size() || offset >= header.lut_offset {
                return Err(PagerError::corrupt(
                    "CORRUPT_PAGE_OFFSET",
                    format!("Page offset {} outside page area", offset),
                ));
            }
            file.seek(SeekFrom::Start(u64::from(offset)))?;
            Page::deserialize(&mut file)
        };
        read().map_err(|err| err.with_path(self.path.as_str()).with_page_index(index))
    }
}

/// Serialize one completed page and return its file offset, or 0 when the
/// page could not be written.
fn on_page_complete<W: Write + Seek>(file: &mut W, page: &Page, page_index: usize) -> u32 {
    let offset = match stream_offset(file) {
        Ok(offset) => offset,
        Err(err) => {
            log::error!("[SCT] Failed to locate page {}: {}", page_index, err);
            return 0;
        }
    };
    if let Err(err) = page.serialize(file) {
        log::error!("[SCT] Failed to serialize page {}: {}", page_index, err);
        return 0;
    }
    log::debug!("[SCT] Page {} written at {}", page_index, offset);
    offset
}

fn stream_offset<W: Seek>(file: &mut W) -> Result<u32, PagerError> {
    let pos = file.stream_position()?;
    u32::try_from(pos).map_err(|_| {
        PagerError::new(
            ErrorPhase::Cache,
            "FILE_TOO_LARGE",
            format!("Offset {} overflows u32", pos),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::MAX_ELEMENTS_PER_PAGE;
    use crate::storage::FsStorage;
    use crate::text_block::{BlockStyle, FontStyle, TextBlock, WordData};

    struct VecParser {
        pages: Vec<Page>,
        cursor: usize,
        has_more: bool,
    }

    impl VecParser {
        fn with_pages(count: usize) -> Self {
            let pages = (0..count)
                .map(|i| {
                    let mut page = Page::new();
                    page.add_line(
                        0,
                        0,
                        TextBlock::new(
                            vec![WordData {
                                word: format!("page{}", i),
                                x: 0,
                                style: FontStyle::Regular,
                            }],
                            BlockStyle::Left,
                            false,
                        ),
                    );
                    page
                })
                .collect();
            Self {
                pages,
                cursor: 0,
                has_more: false,
            }
        }
    }

    impl ContentParser for VecParser {
        fn parse_pages(
            &mut self,
            on_page_complete: &mut dyn FnMut(Page),
            max_pages: u16,
        ) -> Result<(), PagerError> {
            let mut emitted = 0u16;
            while self.cursor < self.pages.len() {
                if max_pages > 0 && emitted >= max_pages {
                    break;
                }
                on_page_complete(self.pages[self.cursor].clone());
                self.cursor += 1;
                emitted += 1;
            }
            self.has_more = self.cursor < self.pages.len();
            Ok(())
        }

        fn has_more_content(&self) -> bool {
            self.has_more
        }

        fn reset(&mut self) {
            self.cursor = 0;
            self.has_more = false;
        }
    }

    fn config() -> RenderConfig {
        RenderConfig::for_viewport(480, 800)
    }

    #[test]
    fn header_sizes_follow_field_lists() {
        assert_eq!(SectionSchema::V15.header_size(), 27);
        assert_eq!(SectionSchema::V14.header_size(), 26);
        assert_eq!(SectionSchema::V13.header_size(), 25);
        let mut out = Vec::new();
        SectionHeader::placeholder(config()).write(&mut out).unwrap();
        assert_eq!(out.len(), 27);
        assert_eq!(out[0], SECTION_FILE_VERSION);
        assert_eq!(&out[18..22], &u32::MAX.to_le_bytes());
        assert_eq!(&out[22..26], &[0, 0, 0, 0]);
        assert_eq!(out[26], 0);
    }

    #[test]
    fn v14_header_decodes_without_partial_flag() {
        let mut header = SectionHeader::placeholder(config());
        header.schema = SectionSchema::V14;
        header.has_more_content = true;
        header.page_count = 1;
        header.lut_offset = 30;
        let mut out = Vec::new();
        header.write(&mut out).unwrap();
        assert_eq!(out.len(), 26);
        let back = SectionHeader::read(&mut std::io::Cursor::new(out))
            .unwrap()
            .unwrap();
        assert_eq!(back.schema, SectionSchema::V14);
        assert!(!back.has_more_content);
        assert_eq!(back.lut_offset, 30);
    }

    #[test]
    fn v13_header_decodes_without_show_images() {
        let mut header = SectionHeader::placeholder(config().with_show_images(false));
        header.schema = SectionSchema::V13;
        header.page_count = 3;
        header.lut_offset = 40;
        let mut out = Vec::new();
        header.write(&mut out).unwrap();
        assert_eq!(out.len(), 25);
        let back = SectionHeader::read(&mut std::io::Cursor::new(out))
            .unwrap()
            .unwrap();
        assert_eq!(back.schema, SectionSchema::V13);
        assert!(back.config.show_images);
        assert_eq!(back.page_count, 3);
        assert_eq!(back.lut_offset, 40);
    }

    #[test]
    fn build_then_load_pages() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let mut section = Section::new(&storage, "/sections/0.bin");
        section
            .create_section_file(&config(), &mut VecParser::with_pages(3), 0)
            .unwrap();
        assert_eq!(section.page_count(), 3);
        assert!(!section.has_more_content());

        let mut reopened = Section::new(&storage, "/sections/0.bin");
        assert!(reopened.load_section_file(&config()).unwrap());
        assert_eq!(reopened.page_count(), 3);
        assert_eq!(reopened.load_page(2).unwrap().text(), "page2");
        assert_eq!(reopened.load_page(0).unwrap().text(), "page0");
        assert_eq!(reopened.load_page(3).unwrap_err().code, "PAGE_OUT_OF_RANGE");
    }

    #[test]
    fn mismatched_config_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let mut section = Section::new(&storage, "0.bin");
        section
            .create_section_file(&config(), &mut VecParser::with_pages(1), 0)
            .unwrap();
        let other = RenderConfig::for_viewport(481, 800);
        assert!(!section.load_section_file(&other).unwrap());
        assert!(!storage.exists("0.bin"));
        assert!(!section.load_section_file(&config()).unwrap());
    }

    #[test]
    fn partial_build_reports_more_content() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let mut section = Section::new(&storage, "0.bin");
        section
            .create_section_file(&config(), &mut VecParser::with_pages(5), 2)
            .unwrap();
        assert_eq!(section.page_count(), 2);
        assert!(section.has_more_content());

        let mut reopened = Section::new(&storage, "0.bin");
        assert!(reopened.load_section_file(&config()).unwrap());
        assert_eq!(reopened.page_count(), 2);
        assert!(reopened.has_more_content());
    }

    #[test]
    fn rebuild_restarts_parser_from_first_page() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let mut section = Section::new(&storage, "0.bin");
        let mut parser = VecParser::with_pages(5);
        section
            .create_section_file(&config(), &mut parser, 2)
            .unwrap();
        assert!(section.has_more_content());

        section
            .create_section_file(&config(), &mut parser, 0)
            .unwrap();
        assert_eq!(section.page_count(), 5);
        assert!(!section.has_more_content());

        let mut reopened = Section::new(&storage, "0.bin");
        assert!(reopened.load_section_file(&config()).unwrap());
        assert!(!reopened.has_more_content());
        assert_eq!(reopened.load_page(0).unwrap().text(), "page0");
        assert_eq!(reopened.load_page(4).unwrap().text(), "page4");
    }

    #[test]
    fn unserializable_page_aborts_build() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let mut parser = VecParser::with_pages(3);
        let crowded = &mut parser.pages[1];
        for i in 0..=MAX_ELEMENTS_PER_PAGE {
            crowded.add_line(0, i as i16, TextBlock::new(Vec::new(), BlockStyle::Left, false));
        }

        let mut section = Section::new(&storage, "0.bin");
        let err = section
            .create_section_file(&config(), &mut parser, 0)
            .unwrap_err();
        assert_eq!(err.code, "PAGE_WRITE_FAILED");
        assert_eq!(err.page_index, Some(1));
        assert!(!storage.exists("0.bin"));
        assert!(section.header().is_none());
        assert!(!section.load_section_file(&config()).unwrap());
    }

    #[test]
    fn empty_section_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let mut section = Section::new(&storage, "0.bin");
        section
            .create_section_file(&config(), &mut VecParser::with_pages(0), 0)
            .unwrap();
        assert!(section.load_section_file(&config()).unwrap());
        assert_eq!(section.page_count(), 0);
    }

    #[test]
    fn unpatched_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        {
            let mut w = storage.open_write("0.bin").unwrap();
            SectionHeader::placeholder(config()).write(&mut w).unwrap();
            w.flush().unwrap();
        }
        let mut section = Section::new(&storage, "0.bin");
        assert!(!section.load_section_file(&config()).unwrap());
        assert!(!storage.exists("0.bin"));
    }

    #[test]
    fn failed_parse_removes_partial_file() {
        struct FailingParser;
        impl ContentParser for FailingParser {
            fn parse_pages(
                &mut self,
                on_page_complete: &mut dyn FnMut(Page),
                _max_pages: u16,
            ) -> Result<(), PagerError> {
                on_page_complete(Page::new());
                Err(PagerError::new(ErrorPhase::Parse, "BAD_MARKUP", "broken"))
            }
            fn has_more_content(&self) -> bool {
                false
            }
            fn reset(&mut self) {}
        }

        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let mut section = Section::new(&storage, "0.bin");
        let err = section
            .create_section_file(&config(), &mut FailingParser, 0)
            .unwrap_err();
        assert_eq!(err.code, "BAD_MARKUP");
        assert!(!storage.exists("0.bin"));
        assert_eq!(section.page_count(), 0);
    }
}
