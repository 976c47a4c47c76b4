//! XHTML chapter driver and the chapter build wrapper.
//!
//! [`ChapterParser`] is what a section build drives: it streams the chapter
//! out of its container into a temporary file, rewrites HTML5 void elements
//! so the XML tokenizer accepts them, and feeds the result through
//! [`ChapterHtmlParser`].

use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::content_parser::{
    push_preformatted_text, BlockKind, ContentParser, MarkupSink, PageAssembler, SpanKind,
};
use crate::error::{ErrorPhase, PagerError};
use crate::metrics::GlyphMetrics;
use crate::page::{ImageBlock, Page};
use crate::render_config::RenderConfig;
use crate::storage::{remove_quiet, retry, Storage};

/// Chapters at least this large report parse progress.
pub const MIN_SIZE_FOR_PROGRESS: u64 = 50 * 1024;

const PROGRESS_STEP: u8 = 10;
const RULE_TEXT: &str = "\u{2500}\u{2500}\u{2500}";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Rewrite unterminated HTML5 void elements (`<br>`, `<img ...>`) as
/// self-closing tags. Comments, CDATA, and everything outside tags pass
/// through untouched.
pub fn normalize_void_elements<R: Read, W: Write>(
    input: R,
    mut output: W,
) -> Result<(), PagerError> {
    let mut bytes = BufReader::new(input).bytes();
    let mut tag: Vec<u8> = Vec::with_capacity(64);

    while let Some(byte) = bytes.next() {
        let byte = byte?;
        if byte != b'<' {
            output.write_all(&[byte])?;
            continue;
        }

        tag.clear();
        tag.push(b'<');
        let mut quote: Option<u8> = None;
        let mut closed = false;
        for next in bytes.by_ref() {
            let next = next?;
            tag.push(next);
            if tag.starts_with(b"<!--") {
                if tag.len() >= 7 && tag.ends_with(b"-->") {
                    closed = true;
                    break;
                }
                continue;
            }
            if tag.starts_with(b"<![CDATA[") {
                if tag.ends_with(b"]]>") {
                    closed = true;
                    break;
                }
                continue;
            }
            match (quote, next) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, b'"' | b'\'') => quote = Some(next),
                (None, b'>') => {
                    closed = true;
                    break;
                }
                (None, _) => {}
            }
        }

        if closed && needs_self_close(&tag) {
            let end = tag.len() - 1;
            output.write_all(&tag[..end])?;
            output.write_all(b"/>")?;
        } else {
            output.write_all(&tag)?;
        }
    }
    output.flush()?;
    Ok(())
}

fn needs_self_close(tag: &[u8]) -> bool {
    if tag.len() < 3 || tag.ends_with(b"/>") {
        return false;
    }
    let name_end = tag[1..]
        .iter()
        .position(|b| b.is_ascii_whitespace() || *b == b'>' || *b == b'/')
        .map_or(tag.len(), |pos| pos + 1);
    let name = &tag[1..name_end];
    VOID_ELEMENTS
        .iter()
        .any(|void| name.eq_ignore_ascii_case(void.as_bytes()))
}

fn tokenize_error(message: impl Into<String>, position: u64) -> PagerError {
    PagerError::new(
        ErrorPhase::Parse,
        "HTML_TOKENIZE_ERROR",
        format!("{} at byte {}", message.into(), position),
    )
}

fn decode_error(err: impl std::fmt::Debug, position: u64) -> PagerError {
    tokenize_error(format!("Decode error: {:?}", err), position)
}

fn local_name(raw: &[u8]) -> String {
    let decoded = String::from_utf8_lossy(raw);
    let local = decoded.rsplit(':').next().unwrap_or(decoded.as_ref());
    local.to_ascii_lowercase()
}

fn block_for_tag(tag: &str) -> Option<BlockKind> {
    match tag {
        "p" | "div" | "blockquote" | "section" | "article" => Some(BlockKind::Paragraph),
        "h1" => Some(BlockKind::Heading(1)),
        "h2" => Some(BlockKind::Heading(2)),
        "h3" => Some(BlockKind::Heading(3)),
        "h4" => Some(BlockKind::Heading(4)),
        "h5" => Some(BlockKind::Heading(5)),
        "h6" => Some(BlockKind::Heading(6)),
        "li" => Some(BlockKind::ListItem),
        "pre" => Some(BlockKind::Code),
        _ => None,
    }
}

fn span_for_tag(tag: &str) -> Option<SpanKind> {
    match tag {
        "b" | "strong" => Some(SpanKind::Bold),
        "i" | "em" => Some(SpanKind::Italic),
        _ => None,
    }
}

fn should_skip_tag(tag: &str) -> bool {
    matches!(tag, "head" | "script" | "style")
}

/// Entities outside the XML predefined set that chapters commonly use.
fn html_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "nbsp" => "\u{00A0}",
        "shy" => "\u{00AD}",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201C}",
        "rdquo" => "\u{201D}",
        "laquo" => "\u{00AB}",
        "raquo" => "\u{00BB}",
        "copy" => "\u{00A9}",
        "middot" => "\u{00B7}",
        "bull" => "\u{2022}",
        _ => return None,
    })
}

fn parse_dimension(value: &str) -> u16 {
    value
        .trim()
        .trim_end_matches("px")
        .trim()
        .parse::<f32>()
        .map_or(0, |v| v.clamp(0.0, f32::from(u16::MAX)) as u16)
}

fn image_from_start(e: &BytesStart<'_>) -> ImageBlock {
    let mut image = ImageBlock::default();
    for attr in e.attributes().flatten() {
        let key = local_name(attr.key.as_ref());
        let raw = String::from_utf8_lossy(&attr.value);
        let value = match quick_xml::escape::unescape(&raw) {
            Ok(value) => value.into_owned(),
            Err(_) => raw.to_string(),
        };
        match key.as_str() {
            "src" | "href" => image.src = value,
            "alt" => image.alt = value,
            "width" => image.width = parse_dimension(&value),
            "height" => image.height = parse_dimension(&value),
            _ => {}
        }
    }
    image
}

#[derive(Debug, Default)]
struct HtmlState {
    skip_depth: u32,
    pre_depth: u32,
    entity_buf: String,
}

impl HtmlState {
    fn text<S: MarkupSink + ?Sized>(&self, sink: &mut S, text: &str) {
        if self.pre_depth > 0 {
            push_preformatted_text(sink, text);
        } else {
            sink.on_text(text);
        }
    }

    fn start_tag<S: MarkupSink + ?Sized>(
        &mut self,
        sink: &mut S,
        e: &BytesStart<'_>,
        show_images: bool,
        self_closing: bool,
    ) {
        let tag = local_name(e.name().as_ref());
        if should_skip_tag(&tag) {
            if !self_closing {
                self.skip_depth += 1;
            }
            return;
        }
        if self.skip_depth > 0 {
            return;
        }

        match tag.as_str() {
            "br" => sink.on_line_break(),
            "hr" => {
                sink.on_enter_block(BlockKind::Rule);
                sink.on_text(RULE_TEXT);
                sink.on_leave_block(BlockKind::Rule);
            }
            "img" | "image" => {
                let image = image_from_start(e);
                if show_images {
                    sink.on_image(image);
                } else if !image.alt.is_empty() {
                    sink.on_enter_span(SpanKind::Italic);
                    sink.on_text(" ");
                    sink.on_text(&image.alt);
                    sink.on_text(" ");
                    sink.on_leave_span(SpanKind::Italic);
                }
            }
            _ => {
                if let Some(kind) = block_for_tag(&tag) {
                    if kind == BlockKind::Code {
                        self.pre_depth += 1;
                    }
                    sink.on_enter_block(kind);
                    if self_closing {
                        self.end_tag(sink, &tag);
                    }
                } else if let Some(kind) = span_for_tag(&tag) {
                    if !self_closing {
                        sink.on_enter_span(kind);
                    }
                }
            }
        }
    }

    fn end_tag<S: MarkupSink + ?Sized>(&mut self, sink: &mut S, tag: &str) {
        if should_skip_tag(tag) {
            self.skip_depth = self.skip_depth.saturating_sub(1);
            return;
        }
        if self.skip_depth > 0 {
            return;
        }
        if let Some(kind) = block_for_tag(tag) {
            sink.on_leave_block(kind);
            if kind == BlockKind::Code {
                self.pre_depth = self.pre_depth.saturating_sub(1);
            }
        } else if let Some(kind) = span_for_tag(tag) {
            sink.on_leave_span(kind);
        }
    }

    fn entity<S: MarkupSink + ?Sized>(&mut self, sink: &mut S, name: &str) {
        self.entity_buf.clear();
        self.entity_buf.push('&');
        self.entity_buf.push_str(name);
        self.entity_buf.push(';');
        match quick_xml::escape::unescape(&self.entity_buf) {
            Ok(resolved) => self.text(sink, &resolved),
            Err(_) => match html_entity(name) {
                Some(resolved) => self.text(sink, resolved),
                None => log::debug!("[HTML] Unknown entity &{};", name),
            },
        }
    }
}

struct Progress<'m> {
    total_bytes: u64,
    last_reported: Option<u8>,
    callback: Box<dyn FnMut(u8) + 'm>,
}

impl Progress<'_> {
    fn report(&mut self, position: u64) {
        let percent = (position.saturating_mul(100) / self.total_bytes.max(1)).min(100) as u8;
        let due = match self.last_reported {
            None => true,
            Some(last) => {
                percent >= last.saturating_add(PROGRESS_STEP) || (percent == 100 && last < 100)
            }
        };
        if due {
            (self.callback)(percent);
            self.last_reported = Some(percent);
        }
    }
}

/// [`ContentParser`] for one XHTML chapter read through a seekable stream.
///
/// The tokenizer is kept between calls, so a pass stopped at its page limit
/// continues from the next unread event.
pub struct ChapterHtmlParser<'m, R: BufRead> {
    reader: Option<Reader<R>>,
    buf: Vec<u8>,
    state: HtmlState,
    assembler: PageAssembler<'m>,
    progress: Option<Progress<'m>>,
    finished: bool,
    has_more: bool,
}

impl<'m, R: BufRead> ChapterHtmlParser<'m, R> {
    pub fn new(metrics: &'m dyn GlyphMetrics, config: RenderConfig, input: R) -> Self {
        Self {
            reader: Some(Self::xml_reader(input)),
            buf: Vec::with_capacity(256),
            state: HtmlState::default(),
            assembler: PageAssembler::new(metrics, config),
            progress: None,
            finished: false,
            has_more: false,
        }
    }

    fn xml_reader(input: R) -> Reader<R> {
        let mut reader = Reader::from_reader(input);
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = false;
        reader
    }

    /// Report percent-of-bytes progress for an input of `total_bytes`.
    pub fn with_progress(mut self, total_bytes: u64, callback: impl FnMut(u8) + 'm) -> Self {
        self.progress = Some(Progress {
            total_bytes,
            last_reported: None,
            callback: Box::new(callback),
        });
        self
    }

    fn take_progress(&mut self) -> Option<Box<dyn FnMut(u8) + 'm>> {
        self.progress.take().map(|progress| progress.callback)
    }

    fn position(&self) -> u64 {
        self.reader.as_ref().map_or(0, Reader::buffer_position)
    }

    fn handle_next_event(&mut self, on_page: &mut dyn FnMut(Page)) -> Result<bool, PagerError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(false);
        };
        let position = reader.buffer_position();
        let show_images = self.assembler.config().show_images;
        let event = reader
            .read_event_into(&mut self.buf)
            .map_err(|err| tokenize_error(format!("XML error: {:?}", err), position))?;

        let state = &mut self.state;
        let sink = &mut self.assembler.sink(on_page);
        match event {
            Event::Start(e) => state.start_tag(sink, &e, show_images, false),
            Event::Empty(e) => state.start_tag(sink, &e, show_images, true),
            Event::End(e) => {
                let tag = local_name(e.name().as_ref());
                state.end_tag(sink, &tag);
            }
            Event::Text(e) => {
                if state.skip_depth == 0 {
                    let text = e.decode().map_err(|err| decode_error(err, position))?;
                    state.text(sink, &text);
                }
            }
            Event::CData(e) => {
                if state.skip_depth == 0 {
                    let text = String::from_utf8_lossy(&e).into_owned();
                    state.text(sink, &text);
                }
            }
            Event::GeneralRef(e) => {
                if state.skip_depth == 0 {
                    let name = e.decode().map_err(|err| decode_error(err, position))?;
                    state.entity(sink, &name);
                }
            }
            Event::Eof => return Ok(false),
            _ => {}
        }
        self.buf.clear();

        let position = self.position();
        if let Some(progress) = self.progress.as_mut() {
            progress.report(position);
        }
        Ok(true)
    }
}

impl<R: BufRead + Seek> ContentParser for ChapterHtmlParser<'_, R> {
    fn parse_pages(
        &mut self,
        on_page_complete: &mut dyn FnMut(Page),
        max_pages: u16,
    ) -> Result<(), PagerError> {
        self.assembler.begin_pass(max_pages);
        let mut sink = self.assembler.sink(on_page_complete);
        sink.resume();
        if sink.should_stop() {
            self.has_more = true;
            return Ok(());
        }
        drop(sink);

        if !self.finished {
            while self.handle_next_event(on_page_complete)? {
                if self.assembler.hit_max_pages() {
                    log::debug!("[HTML] Page limit reached at byte {}", self.position());
                    self.has_more = true;
                    return Ok(());
                }
            }
            self.assembler.sink(on_page_complete).finish();
            self.finished = true;
        }

        self.has_more = self.assembler.has_pending_output();
        Ok(())
    }

    fn has_more_content(&self) -> bool {
        self.has_more
    }

    fn reset(&mut self) {
        self.reader = self.reader.take().and_then(|reader| {
            let mut input = reader.into_inner();
            match input.seek(SeekFrom::Start(0)) {
                Ok(_) => Some(Self::xml_reader(input)),
                Err(err) => {
                    log::warn!("[HTML] Failed to rewind chapter: {}", err);
                    None
                }
            }
        });
        self.buf.clear();
        self.state = HtmlState::default();
        self.assembler.reset();
        if let Some(progress) = self.progress.as_mut() {
            progress.last_reported = None;
        }
        self.finished = false;
        self.has_more = false;
    }
}

/// Container-side access to one chapter's raw markup.
pub trait ChapterSource {
    /// Write the complete chapter markup to `out`, returning the byte count.
    fn stream_to(&mut self, out: &mut dyn Write) -> Result<u64, PagerError>;
}

impl ChapterSource for &[u8] {
    fn stream_to(&mut self, out: &mut dyn Write) -> Result<u64, PagerError> {
        out.write_all(self)?;
        Ok(self.len() as u64)
    }
}

impl ChapterSource for Vec<u8> {
    fn stream_to(&mut self, out: &mut dyn Write) -> Result<u64, PagerError> {
        self.as_slice().stream_to(out)
    }
}

type StorageReader<S> = BufReader<<S as Storage>::Reader>;

/// Build-side [`ContentParser`] for one chapter of a container.
///
/// On the first pass the source is copied to `<temp_dir>/.chapter.html`
/// (retried on failure), normalized into `<temp_dir>/.chapter.norm.html`, and
/// parsed from there. Temporary files are removed once parsing ends, fails,
/// or the parser is reset or dropped.
pub struct ChapterParser<'m, S: Storage, C: ChapterSource> {
    storage: S,
    source: C,
    metrics: &'m dyn GlyphMetrics,
    config: RenderConfig,
    raw_path: String,
    normalized_path: String,
    progress: Option<Box<dyn FnMut(u8) + 'm>>,
    inner: Option<ChapterHtmlParser<'m, StorageReader<S>>>,
    has_more: bool,
}

impl<'m, S: Storage, C: ChapterSource> ChapterParser<'m, S, C> {
    pub fn new(
        storage: S,
        source: C,
        metrics: &'m dyn GlyphMetrics,
        config: RenderConfig,
        temp_dir: &str,
    ) -> Self {
        let temp_dir = temp_dir.trim_end_matches('/');
        Self {
            storage,
            source,
            metrics,
            config,
            raw_path: format!("{}/.chapter.html", temp_dir),
            normalized_path: format!("{}/.chapter.norm.html", temp_dir),
            progress: None,
            inner: None,
            has_more: false,
        }
    }

    /// Report parse progress (0-100) for chapters of at least
    /// [`MIN_SIZE_FOR_PROGRESS`] bytes.
    pub fn with_progress(mut self, callback: impl FnMut(u8) + 'm) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    fn stream_source(&mut self) -> Result<u64, PagerError> {
        let storage = &self.storage;
        let source = &mut self.source;
        let raw_path = self.raw_path.as_str();
        retry("[CHP] stream chapter to temp file", |attempt| {
            let streamed = storage.open_write(raw_path).and_then(|mut out| {
                let size = source.stream_to(&mut out)?;
                out.flush()?;
                Ok(size)
            });
            if streamed.is_err() {
                log::warn!(
                    "[CHP] Removing partial temp file after attempt {}",
                    attempt + 1
                );
                remove_quiet(storage, raw_path);
            }
            streamed
        })
    }

    fn normalize(&self) -> Result<(), PagerError> {
        let input = self.storage.open_read(&self.raw_path)?;
        let output = self.storage.open_write(&self.normalized_path)?;
        normalize_void_elements(input, output)
    }

    fn prepare(&mut self) -> Result<ChapterHtmlParser<'m, StorageReader<S>>, PagerError> {
        let size = self.stream_source()?;
        let input_path = match self.normalize() {
            Ok(()) => {
                remove_quiet(&self.storage, &self.raw_path);
                self.normalized_path.as_str()
            }
            Err(err) => {
                log::warn!(
                    "[CHP] Failed to normalize chapter, parsing the original: {}",
                    err
                );
                remove_quiet(&self.storage, &self.normalized_path);
                self.raw_path.as_str()
            }
        };

        let input = BufReader::new(self.storage.open_read(input_path)?);
        let mut parser = ChapterHtmlParser::new(self.metrics, self.config, input);
        if size >= MIN_SIZE_FOR_PROGRESS {
            if let Some(callback) = self.progress.take() {
                parser = parser.with_progress(size, callback);
            }
        }
        log::info!("[CHP] Chapter prepared: {} bytes", size);
        Ok(parser)
    }

    fn cleanup(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            if let Some(callback) = inner.take_progress() {
                self.progress = Some(callback);
            }
        }
        remove_quiet(&self.storage, &self.raw_path);
        remove_quiet(&self.storage, &self.normalized_path);
    }
}

impl<S: Storage, C: ChapterSource> ContentParser for ChapterParser<'_, S, C> {
    fn parse_pages(
        &mut self,
        on_page_complete: &mut dyn FnMut(Page),
        max_pages: u16,
    ) -> Result<(), PagerError> {
        if self.inner.is_none() {
            match self.prepare() {
                Ok(parser) => self.inner = Some(parser),
                Err(err) => {
                    log::error!("[CHP] Failed to prepare chapter: {}", err);
                    self.cleanup();
                    return Err(err);
                }
            }
        }
        let Some(inner) = self.inner.as_mut() else {
            return Ok(());
        };

        let result = inner.parse_pages(on_page_complete, max_pages);
        self.has_more = result.is_ok() && inner.has_more_content();
        if let Err(err) = &result {
            log::error!("[CHP] Chapter parse failed: {}", err);
        }
        if !self.has_more {
            self.cleanup();
        }
        result
    }

    fn has_more_content(&self) -> bool {
        self.has_more
    }

    fn reset(&mut self) {
        self.cleanup();
        self.has_more = false;
    }
}

impl<S: Storage, C: ChapterSource> Drop for ChapterParser<'_, S, C> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::FixedAdvanceMetrics;
    use crate::page::PageElement;
    use crate::storage::FsStorage;
    use crate::text_block::{BlockStyle, FontStyle};
    use std::cell::{Cell, RefCell};
    use std::io::{self, Cursor};

    fn metrics() -> FixedAdvanceMetrics {
        FixedAdvanceMetrics::new(10, 10, 20)
    }

    fn config() -> RenderConfig {
        RenderConfig::for_viewport(400, 200).with_paragraph_alignment(BlockStyle::Left)
    }

    fn normalize(input: &str) -> String {
        let mut out = Vec::new();
        normalize_void_elements(input.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn parse_html(html: &str, config: RenderConfig) -> Vec<Page> {
        let m = metrics();
        let mut parser = ChapterHtmlParser::new(&m, config, Cursor::new(html.as_bytes().to_vec()));
        let mut pages = Vec::new();
        parser.parse_pages(&mut |page| pages.push(page), 0).unwrap();
        assert!(!parser.has_more_content());
        pages
    }

    fn all_lines(pages: &[Page]) -> Vec<String> {
        pages
            .iter()
            .flat_map(Page::lines)
            .map(|line| line.block.text())
            .collect()
    }

    #[test]
    fn void_elements_are_self_closed() {
        assert_eq!(normalize("a<br>b"), "a<br/>b");
        assert_eq!(normalize("<BR >"), "<BR />");
        assert_eq!(
            normalize(r#"<img src="a>b.png" alt='x'>"#),
            r#"<img src="a>b.png" alt='x'/>"#
        );
        assert_eq!(normalize("<br/><hr />"), "<br/><hr />");
        assert_eq!(normalize("<p>x</p>"), "<p>x</p>");
        assert_eq!(normalize("<!-- <br> -->"), "<!-- <br> -->");
        assert_eq!(normalize("<bread>"), "<bread>");
    }

    #[test]
    fn blocks_spans_and_skipped_elements() {
        let html = "<html><head><title>T</title><style>p{}</style></head><body>\
                    <h1>Head</h1><p>plain <b>bold</b> <em>it</em></p>\
                    <script>ignored()</script><ul><li>item</li></ul></body></html>";
        let pages = parse_html(html, config());
        assert_eq!(all_lines(&pages), ["Head", "plain bold it", "\u{2022} item"]);
        let lines: Vec<_> = pages[0].lines().collect();
        assert_eq!(lines[0].block.style(), BlockStyle::Center);
        let styles: Vec<FontStyle> = lines[1].block.words().iter().map(|w| w.style).collect();
        assert_eq!(
            styles,
            [FontStyle::Regular, FontStyle::Bold, FontStyle::Italic]
        );
    }

    #[test]
    fn entities_and_line_breaks() {
        let html = "<p>fish &amp; chips&nbsp;now<br/>next &#8212; &mdash; &bogus;</p>";
        let pages = parse_html(html, config());
        assert_eq!(
            all_lines(&pages),
            ["fish & chips\u{00A0}now", "next \u{2014} \u{2014}"]
        );
    }

    #[test]
    fn preformatted_text_keeps_lines() {
        let html = "<pre>line one\nline two</pre>";
        let pages = parse_html(html, config());
        let lines: Vec<_> = pages[0].lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line.block.is_monospace()));
    }

    #[test]
    fn images_follow_show_images() {
        let html = r#"<p>before</p><img src="pic.png" alt="A picture" width="800px" height="200"/>"#;
        let pages = parse_html(html, config());
        let image = pages[0]
            .elements()
            .iter()
            .find_map(|element| match element {
                PageElement::Image(image) => Some(image),
                PageElement::Line(_) => None,
            })
            .unwrap();
        assert_eq!(image.image.src, "pic.png");
        assert_eq!((image.image.width, image.image.height), (400, 100));
        assert_eq!((image.x, image.y), (0, 20));

        let pages = parse_html(html, config().with_show_images(false));
        assert_eq!(all_lines(&pages), ["before", "A picture"]);
        let alt = pages[0].lines().nth(1).unwrap();
        assert_eq!(alt.block.words()[0].style, FontStyle::Italic);
    }

    #[test]
    fn page_limit_resumes_from_tokenizer_position() {
        let mut html = String::new();
        for i in 0..40 {
            html.push_str(&format!("<p>Paragraph number {}.</p>", i));
        }
        let all = parse_html(&html, config());
        assert!(all.len() >= 4);

        let m = metrics();
        let mut parser = ChapterHtmlParser::new(&m, config(), Cursor::new(html.into_bytes()));
        let mut resumed = Vec::new();
        let mut passes = 0;
        loop {
            parser.parse_pages(&mut |page| resumed.push(page), 1).unwrap();
            passes += 1;
            if !parser.has_more_content() {
                break;
            }
        }
        assert!(passes >= 4);
        assert_eq!(resumed, all);

        parser.reset();
        let mut again = Vec::new();
        parser.parse_pages(&mut |page| again.push(page), 0).unwrap();
        assert_eq!(again, all);
    }

    #[test]
    fn chapter_parser_streams_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        storage.mkdir("/tmp").unwrap();
        let m = metrics();
        let body = format!(
            "<html><body>{}</body></html>",
            "<p>word word word word word<br>again</p>".repeat(2000)
        );
        let mut reports = Vec::new();
        {
            let mut parser =
                ChapterParser::new(&storage, body.into_bytes(), &m, config(), "/tmp/")
                    .with_progress(|percent| reports.push(percent));
            let mut pages = 0;
            parser.parse_pages(&mut |_| pages += 1, 0).unwrap();
            assert!(pages > 10);
            assert!(!parser.has_more_content());
            assert!(!storage.exists("/tmp/.chapter.html"));
            assert!(!storage.exists("/tmp/.chapter.norm.html"));
        }
        assert!(!reports.is_empty());
        assert_eq!(reports.last().copied(), Some(100));
        assert!(reports.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn chapter_parser_keeps_temp_file_while_paused() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let m = metrics();
        let body = "<p>x</p>".repeat(100);
        let mut parser = ChapterParser::new(&storage, body.into_bytes(), &m, config(), "");
        parser.parse_pages(&mut |_| {}, 1).unwrap();
        assert!(parser.has_more_content());
        assert!(storage.exists(".chapter.norm.html"));
        drop(parser);
        assert!(!storage.exists(".chapter.norm.html"));
    }

    /// Writes half the chapter and fails on its first `failures` attempts.
    struct FlakySource<'a> {
        body: &'a [u8],
        failures: u32,
        attempts: &'a Cell<u32>,
    }

    impl ChapterSource for FlakySource<'_> {
        fn stream_to(&mut self, out: &mut dyn Write) -> Result<u64, PagerError> {
            let attempt = self.attempts.get();
            self.attempts.set(attempt + 1);
            if attempt < self.failures {
                out.write_all(&self.body[..self.body.len() / 2])?;
                return Err(io::Error::new(io::ErrorKind::TimedOut, "card busy").into());
            }
            out.write_all(self.body)?;
            Ok(self.body.len() as u64)
        }
    }

    #[test]
    fn chapter_stream_retries_after_partial_write() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let m = metrics();
        let body = "<p>alpha beta</p><p>gamma delta</p>";
        let expected = parse_html(body, config());

        let attempts = Cell::new(0);
        let source = FlakySource {
            body: body.as_bytes(),
            failures: 1,
            attempts: &attempts,
        };
        let mut parser = ChapterParser::new(&storage, source, &m, config(), "");
        let mut pages = Vec::new();
        parser.parse_pages(&mut |page| pages.push(page), 0).unwrap();

        assert_eq!(attempts.get(), 2);
        assert_eq!(pages, expected);
        assert_eq!(all_lines(&pages), ["alpha beta", "gamma delta"]);
        assert!(!storage.exists(".chapter.html"));
    }

    #[test]
    fn chapter_stream_gives_up_after_three_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let m = metrics();
        let attempts = Cell::new(0);
        let source = FlakySource {
            body: b"<p>never</p>",
            failures: u32::MAX,
            attempts: &attempts,
        };
        let mut parser = ChapterParser::new(&storage, source, &m, config(), "");
        let err = parser.parse_pages(&mut |_| {}, 0).unwrap_err();

        assert_eq!(err.code, "IO_ERROR");
        assert_eq!(attempts.get(), 3);
        assert!(!parser.has_more_content());
        assert!(!storage.exists(".chapter.html"));
        assert!(!storage.exists(".chapter.norm.html"));
    }

    #[test]
    fn failed_normalization_parses_original_markup() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        // A directory in the way makes the normalized output unwritable.
        storage.mkdir(".chapter.norm.html").unwrap();
        let m = metrics();
        let body = "<p>kept <b>anyway</b></p>";
        let mut parser = ChapterParser::new(&storage, body.as_bytes(), &m, config(), "");
        let mut pages = Vec::new();
        parser.parse_pages(&mut |page| pages.push(page), 0).unwrap();

        assert_eq!(all_lines(&pages), ["kept anyway"]);
        assert!(!storage.exists(".chapter.html"));
    }

    #[test]
    fn progress_survives_reset() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let m = metrics();
        let body = "<p>word word word word</p>".repeat(3000);
        let reports = RefCell::new(Vec::new());
        let mut parser = ChapterParser::new(&storage, body.into_bytes(), &m, config(), "")
            .with_progress(|percent| reports.borrow_mut().push(percent));

        parser.parse_pages(&mut |_| {}, 0).unwrap();
        let first_run = reports.borrow().len();
        assert!(first_run > 1);
        assert_eq!(reports.borrow().last().copied(), Some(100));

        parser.reset();
        reports.borrow_mut().clear();
        parser.parse_pages(&mut |_| {}, 0).unwrap();
        assert_eq!(reports.borrow().len(), first_run);
        assert_eq!(reports.borrow().last().copied(), Some(100));
    }
}
