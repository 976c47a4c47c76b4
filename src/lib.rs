//! Streaming pagination engine and on-disk page cache for memory-constrained
//! e-readers.
//!
//! Content drivers ([`MarkdownParser`], [`ChapterParser`]) turn markup into
//! laid-out [`Page`]s through the Knuth-Plass typesetter in [`ParsedText`].
//! A [`Section`] persists those pages as one cache file per chapter, keyed by
//! the [`RenderConfig`] that produced them, with a page lookup table for
//! random access.

#![cfg_attr(
    not(test),
    deny(
        clippy::disallowed_methods,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::todo,
        clippy::unimplemented
    )
)]

pub mod chapter_html;
pub mod content_parser;
pub mod error;
pub mod markdown;
pub mod metrics;
pub mod page;
pub mod parsed_text;
pub mod render_config;
pub mod script;
pub mod section;
pub mod serialization;
pub mod storage;
pub mod text_block;

pub use chapter_html::{
    normalize_void_elements, ChapterHtmlParser, ChapterParser, ChapterSource,
};
pub use content_parser::{
    BlockKind, ContentParser, MarkupSink, PageAssembler, PageSink, SpanKind,
};
pub use error::{ErrorPhase, PagerError};
pub use markdown::MarkdownParser;
pub use metrics::{FixedAdvanceMetrics, GlyphMetrics};
pub use page::{ImageBlock, Page, PageElement, PageImage, PageLine};
pub use parsed_text::{compute_line_breaks, ParsedText};
pub use render_config::RenderConfig;
pub use section::{Section, SectionHeader, SectionSchema, SECTION_FILE_VERSION};
pub use storage::{FsStorage, Storage};
pub use text_block::{BlockStyle, FontStyle, TextBlock, WordData};
