//! Streaming content-parser contract and the shared page assembler.
//!
//! Markup drivers tokenize their input and forward structural events to a
//! [`MarkupSink`]. [`PageAssembler`] holds the layout state every driver
//! shares: it turns text into words, words into paragraphs, paragraphs into
//! lines, and lines into pages, holding at most one pending paragraph and one
//! open page. Each parse pass borrows it as a [`PageSink`], which hands every
//! page to the pass callback the moment it is complete.

use std::collections::VecDeque;

use crate::error::PagerError;
use crate::metrics::GlyphMetrics;
use crate::page::{ImageBlock, Page};
use crate::parsed_text::ParsedText;
use crate::render_config::RenderConfig;
use crate::text_block::{BlockStyle, FontStyle, TextBlock};

/// Pending words at which a paragraph is laid out early, keeping its last
/// line open.
pub const WORD_FLUSH_THRESHOLD: usize = 750;
/// Capacity of the in-progress word buffer in bytes.
pub const MAX_WORD_BYTES: usize = 200;

const BULLET: &str = "\u{2022}";

/// Source of pages for one chapter.
pub trait ContentParser {
    /// Parse until the input ends or `max_pages` pages (0 = unlimited) have
    /// been handed to `on_page_complete` during this call.
    fn parse_pages(
        &mut self,
        on_page_complete: &mut dyn FnMut(Page),
        max_pages: u16,
    ) -> Result<(), PagerError>;

    /// Whether the last call stopped at `max_pages` with input remaining.
    fn has_more_content(&self) -> bool;

    /// Rewind to the start of the input.
    fn reset(&mut self);
}

/// Structural block kinds recognized by the assembler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    /// Heading with level 1..=6.
    Heading(u8),
    ListItem,
    Quote,
    Code,
    /// Horizontal rule rendered as a centered glyph run.
    Rule,
}

/// Inline style spans.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanKind {
    Bold,
    Italic,
    Code,
}

/// Receiver of tokenizer events.
pub trait MarkupSink {
    fn on_enter_block(&mut self, kind: BlockKind);
    fn on_leave_block(&mut self, kind: BlockKind);
    fn on_enter_span(&mut self, kind: SpanKind);
    fn on_leave_span(&mut self, kind: SpanKind);
    /// Character data; runs of ASCII whitespace separate words.
    fn on_text(&mut self, text: &str);
    /// Forced line break inside the current block.
    fn on_line_break(&mut self);
    fn on_image(&mut self, image: ImageBlock);
    /// Whether the driver should stop feeding events.
    fn should_stop(&self) -> bool;
}

/// Feed preformatted text, turning every newline into a line break.
pub fn push_preformatted_text<S: MarkupSink + ?Sized>(sink: &mut S, text: &str) {
    let mut lines = text.split('\n').peekable();
    while let Some(line) = lines.next() {
        sink.on_text(line.trim_end_matches('\r'));
        if lines.peek().is_some() {
            sink.on_line_break();
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Depths {
    bold: u16,
    italic: u16,
    code_span: u16,
    heading: u16,
    list: u16,
    quote: u16,
    code_block: u16,
}

/// A sink call received after the pass reached its page limit, replayed at
/// the start of the next pass.
#[derive(Debug)]
enum Deferred {
    EnterBlock(BlockKind),
    LeaveBlock(BlockKind),
    EnterSpan(SpanKind),
    LeaveSpan(SpanKind),
    Text(String),
    LineBreak,
    Image(ImageBlock),
}

type PageOut<'o> = &'o mut dyn FnMut(Page);

/// Driver state carried across parse passes.
pub struct PageAssembler<'m> {
    metrics: &'m dyn GlyphMetrics,
    config: RenderConfig,
    line_advance: i32,
    word_buffer: heapless::String<MAX_WORD_BYTES>,
    word_style: FontStyle,
    current_block: Option<ParsedText>,
    block_has_text: bool,
    block_emitted_lines: bool,
    current_page: Page,
    next_y: i32,
    depths: Depths,
    overflow: VecDeque<Page>,
    deferred: VecDeque<Deferred>,
    max_pages: u16,
    emitted_this_pass: u16,
    hit_max_pages: bool,
}

impl<'m> PageAssembler<'m> {
    pub fn new(metrics: &'m dyn GlyphMetrics, config: RenderConfig) -> Self {
        let line_advance = config
            .line_advance(metrics.line_height(config.font_id))
            .max(1);
        Self {
            metrics,
            config,
            line_advance,
            word_buffer: heapless::String::new(),
            word_style: FontStyle::Regular,
            current_block: None,
            block_has_text: false,
            block_emitted_lines: false,
            current_page: Page::new(),
            next_y: 0,
            depths: Depths::default(),
            overflow: VecDeque::new(),
            deferred: VecDeque::new(),
            max_pages: 0,
            emitted_this_pass: 0,
            hit_max_pages: false,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Vertical advance of one line in pixels.
    pub fn line_advance(&self) -> i32 {
        self.line_advance
    }

    /// Drop all state and start over.
    pub fn reset(&mut self) {
        *self = Self::new(self.metrics, self.config);
    }

    /// Start a parse call limited to `max_pages` emitted pages (0 = no limit).
    pub fn begin_pass(&mut self, max_pages: u16) {
        self.max_pages = max_pages;
        self.emitted_this_pass = 0;
        self.hit_max_pages = false;
    }

    /// Borrow the assembler for one pass, delivering pages to `on_page`.
    pub fn sink<'a>(&'a mut self, on_page: &'a mut dyn FnMut(Page)) -> PageSink<'a, 'm> {
        PageSink {
            assembler: self,
            on_page,
        }
    }

    /// Whether the current pass reached its page limit.
    pub fn hit_max_pages(&self) -> bool {
        self.hit_max_pages
    }

    /// Words waiting in the open paragraph.
    pub fn pending_words(&self) -> usize {
        self.current_block.as_ref().map_or(0, ParsedText::len)
    }

    /// Completed pages held back because the pass hit its page limit.
    pub fn buffered_pages(&self) -> usize {
        self.overflow.len()
    }

    /// Whether pages or markup from an earlier pass still await delivery.
    pub fn has_pending_output(&self) -> bool {
        !self.overflow.is_empty() || !self.deferred.is_empty()
    }

    fn deliver(&mut self, page: Page, out: PageOut<'_>) {
        out(page);
        self.emitted_this_pass = self.emitted_this_pass.saturating_add(1);
        if self.max_pages > 0 && self.emitted_this_pass >= self.max_pages {
            self.hit_max_pages = true;
        }
    }

    fn emit_page(&mut self, page: Page, out: PageOut<'_>) {
        if self.hit_max_pages || !self.overflow.is_empty() {
            self.overflow.push_back(page);
        } else {
            self.deliver(page, out);
        }
    }

    fn resume(&mut self, out: PageOut<'_>) {
        while !self.hit_max_pages {
            let Some(page) = self.overflow.pop_front() else {
                break;
            };
            self.deliver(page, out);
        }
        while !self.hit_max_pages {
            let Some(call) = self.deferred.pop_front() else {
                break;
            };
            match call {
                Deferred::EnterBlock(kind) => self.enter_block(kind, out),
                Deferred::LeaveBlock(kind) => self.leave_block(kind, out),
                Deferred::EnterSpan(kind) => self.enter_span(kind),
                Deferred::LeaveSpan(kind) => self.leave_span(kind),
                Deferred::Text(text) => {
                    if let Some(stopped_at) = self.push_text(&text, out) {
                        self.deferred
                            .push_front(Deferred::Text(text[stopped_at..].to_string()));
                    }
                }
                Deferred::LineBreak => self.line_break(out),
                Deferred::Image(image) => self.place_image(image, out),
            }
        }
    }

    fn finish(&mut self, out: PageOut<'_>) {
        self.flush_word(out);
        self.layout_block(true, out);
        self.current_block = None;
        self.complete_page(out);
    }

    fn font_style(&self) -> FontStyle {
        let d = &self.depths;
        FontStyle::from_flags(
            d.bold > 0 || d.heading > 0,
            d.italic > 0 || d.code_span > 0 || d.quote > 0,
        )
    }

    fn new_block(&self, kind: BlockKind) -> ParsedText {
        let hyphenation = self.config.hyphenation;
        match kind {
            BlockKind::Heading(_) | BlockKind::Rule => {
                ParsedText::new(BlockStyle::Center, 0, hyphenation)
            }
            BlockKind::ListItem | BlockKind::Quote => {
                ParsedText::new(BlockStyle::Left, 0, hyphenation)
            }
            BlockKind::Code => ParsedText::new(BlockStyle::Left, 0, false).with_monospace(true),
            BlockKind::Paragraph => {
                if self.depths.code_block > 0 {
                    ParsedText::new(BlockStyle::Left, 0, false).with_monospace(true)
                } else if self.depths.quote > 0 || self.depths.list > 0 {
                    ParsedText::new(BlockStyle::Left, 0, hyphenation)
                } else {
                    ParsedText::new(
                        self.config.block_style(),
                        self.config.indent_level,
                        hyphenation,
                    )
                }
            }
        }
    }

    fn start_block(&mut self, kind: BlockKind, out: PageOut<'_>) {
        self.flush_word(out);
        if !self.block_has_text {
            // A fresh block holding only a list bullet absorbs the nested block.
            if self.current_block.as_ref().is_some_and(|block| !block.is_empty()) {
                return;
            }
            self.current_block = Some(self.new_block(kind));
            self.block_emitted_lines = false;
            return;
        }
        self.layout_block(true, out);
        self.current_block = Some(self.new_block(kind));
        self.block_has_text = false;
        self.block_emitted_lines = false;
    }

    fn ensure_block(&mut self) {
        if self.current_block.is_none() {
            self.current_block = Some(self.new_block(BlockKind::Paragraph));
            self.block_has_text = false;
            self.block_emitted_lines = false;
        }
    }

    fn flush_word(&mut self, out: PageOut<'_>) {
        if self.word_buffer.is_empty() {
            return;
        }
        self.ensure_block();
        let style = self.word_style;
        let mut over_threshold = false;
        if let Some(block) = self.current_block.as_mut() {
            block.add_word(&self.word_buffer, style);
            over_threshold = block.len() > WORD_FLUSH_THRESHOLD;
        }
        self.word_buffer.clear();
        self.block_has_text = true;
        if over_threshold {
            self.layout_block(false, out);
        }
    }

    fn layout_block(&mut self, include_last_line: bool, out: PageOut<'_>) {
        let Some(mut block) = self.current_block.take() else {
            return;
        };
        let metrics = self.metrics;
        let font_id = self.config.font_id;
        let width = self.config.viewport_width;
        block.layout_and_extract_lines(metrics, font_id, width, include_last_line, |line| {
            self.add_line_to_page(line, out)
        });
        self.current_block = Some(block);
    }

    fn add_line_to_page(&mut self, line: TextBlock, out: PageOut<'_>) {
        if self.next_y + self.line_advance > i32::from(self.config.viewport_height) {
            self.complete_page(out);
        }
        self.current_page.add_line(0, clamp_i16(self.next_y), line);
        self.next_y += self.line_advance;
        self.block_emitted_lines = true;
    }

    fn advance_blank_line(&mut self, out: PageOut<'_>) {
        if self.next_y + self.line_advance > i32::from(self.config.viewport_height) {
            self.complete_page(out);
            return;
        }
        self.next_y += self.line_advance;
    }

    fn complete_page(&mut self, out: PageOut<'_>) {
        if !self.current_page.is_empty() {
            let page = std::mem::take(&mut self.current_page);
            self.emit_page(page, out);
        }
        self.next_y = 0;
    }

    fn fit_image(&self, image: &mut ImageBlock) {
        let max_w = u32::from(self.config.viewport_width.max(1));
        let max_h = u32::from(self.config.viewport_height.max(1));
        let (mut w, mut h) = (u32::from(image.width), u32::from(image.height));
        if w == 0 || h == 0 {
            w = max_w;
            h = max_h / 2;
        }
        if w > max_w {
            h = h * max_w / w;
            w = max_w;
        }
        if h > max_h {
            w = w * max_h / h;
            h = max_h;
        }
        image.width = w.max(1) as u16;
        image.height = h.max(1) as u16;
    }

    fn enter_block(&mut self, kind: BlockKind, out: PageOut<'_>) {
        self.start_block(kind, out);
        match kind {
            BlockKind::Heading(_) => self.depths.heading += 1,
            BlockKind::ListItem => {
                self.depths.list += 1;
                let style = self.font_style();
                if let Some(block) = self.current_block.as_mut() {
                    block.add_word(BULLET, style);
                }
            }
            BlockKind::Quote => self.depths.quote += 1,
            BlockKind::Code => self.depths.code_block += 1,
            BlockKind::Paragraph | BlockKind::Rule => {}
        }
    }

    fn leave_block(&mut self, kind: BlockKind, out: PageOut<'_>) {
        self.flush_word(out);
        self.layout_block(true, out);
        let had_block = self.current_block.take().is_some();
        if had_block && (self.block_has_text || self.block_emitted_lines) {
            self.next_y += self.config.block_spacing(self.line_advance);
        }
        self.block_has_text = false;
        self.block_emitted_lines = false;
        let d = &mut self.depths;
        match kind {
            BlockKind::Heading(_) => d.heading = d.heading.saturating_sub(1),
            BlockKind::ListItem => d.list = d.list.saturating_sub(1),
            BlockKind::Quote => d.quote = d.quote.saturating_sub(1),
            BlockKind::Code => d.code_block = d.code_block.saturating_sub(1),
            BlockKind::Paragraph | BlockKind::Rule => {}
        }
    }

    fn enter_span(&mut self, kind: SpanKind) {
        let d = &mut self.depths;
        match kind {
            SpanKind::Bold => d.bold += 1,
            SpanKind::Italic => d.italic += 1,
            SpanKind::Code => d.code_span += 1,
        }
    }

    fn leave_span(&mut self, kind: SpanKind) {
        let d = &mut self.depths;
        match kind {
            SpanKind::Bold => d.bold = d.bold.saturating_sub(1),
            SpanKind::Italic => d.italic = d.italic.saturating_sub(1),
            SpanKind::Code => d.code_span = d.code_span.saturating_sub(1),
        }
    }

    /// Feed `text` word by word. Returns the byte index of the first
    /// unconsumed character when the page limit was reached part way.
    fn push_text(&mut self, text: &str, out: PageOut<'_>) -> Option<usize> {
        for (idx, ch) in text.char_indices() {
            if self.hit_max_pages {
                return Some(idx);
            }
            if ch.is_ascii_whitespace() {
                self.flush_word(out);
                continue;
            }
            if self.word_buffer.len() + ch.len_utf8() > MAX_WORD_BYTES {
                self.flush_word(out);
            }
            if self.word_buffer.is_empty() {
                self.word_style = self.font_style();
            }
            let _ = self.word_buffer.push(ch);
        }
        None
    }

    fn line_break(&mut self, out: PageOut<'_>) {
        self.flush_word(out);
        let continuation = match self.current_block.as_ref() {
            Some(block) if !block.is_empty() => Some((block.style(), block.is_monospace())),
            _ => None,
        };
        match continuation {
            Some((style, monospace)) => {
                self.layout_block(true, out);
                self.current_block = Some(
                    ParsedText::new(style, 0, self.config.hyphenation && !monospace)
                        .with_monospace(monospace),
                );
            }
            None if self.depths.code_block > 0 => self.advance_blank_line(out),
            None => {}
        }
    }

    fn place_image(&mut self, mut image: ImageBlock, out: PageOut<'_>) {
        self.flush_word(out);
        self.layout_block(true, out);
        self.current_block = None;
        self.block_has_text = false;
        self.block_emitted_lines = false;

        self.fit_image(&mut image);
        let height = i32::from(image.height);
        if self.next_y + height > i32::from(self.config.viewport_height)
            && !self.current_page.is_empty()
        {
            self.complete_page(out);
        }
        let x = (i32::from(self.config.viewport_width) - i32::from(image.width)) / 2;
        self.current_page
            .add_image(clamp_i16(x.max(0)), clamp_i16(self.next_y), image);
        self.next_y += height;
        self.next_y += self.config.block_spacing(self.line_advance);
    }
}

fn clamp_i16(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// [`PageAssembler`] bound to one pass's page callback.
///
/// Once the pass reaches its page limit, further calls are queued in the
/// assembler and replayed by the next pass's [`PageSink::resume`].
pub struct PageSink<'a, 'm> {
    assembler: &'a mut PageAssembler<'m>,
    on_page: &'a mut dyn FnMut(Page),
}

impl PageSink<'_, '_> {
    /// Deliver pages and replay markup held back by an earlier pass.
    pub fn resume(&mut self) {
        self.assembler.resume(&mut *self.on_page);
    }

    /// Flush everything pending into completed pages.
    pub fn finish(&mut self) {
        self.assembler.finish(&mut *self.on_page);
    }

    fn deferring(&self) -> bool {
        self.assembler.hit_max_pages || !self.assembler.deferred.is_empty()
    }

    fn defer(&mut self, call: Deferred) {
        self.assembler.deferred.push_back(call);
    }
}

impl MarkupSink for PageSink<'_, '_> {
    fn on_enter_block(&mut self, kind: BlockKind) {
        if self.deferring() {
            return self.defer(Deferred::EnterBlock(kind));
        }
        self.assembler.enter_block(kind, &mut *self.on_page);
    }

    fn on_leave_block(&mut self, kind: BlockKind) {
        if self.deferring() {
            return self.defer(Deferred::LeaveBlock(kind));
        }
        self.assembler.leave_block(kind, &mut *self.on_page);
    }

    fn on_enter_span(&mut self, kind: SpanKind) {
        if self.deferring() {
            return self.defer(Deferred::EnterSpan(kind));
        }
        self.assembler.enter_span(kind);
    }

    fn on_leave_span(&mut self, kind: SpanKind) {
        if self.deferring() {
            return self.defer(Deferred::LeaveSpan(kind));
        }
        self.assembler.leave_span(kind);
    }

    fn on_text(&mut self, text: &str) {
        if self.deferring() {
            return self.defer(Deferred::Text(text.to_string()));
        }
        if let Some(stopped_at) = self.assembler.push_text(text, &mut *self.on_page) {
            self.defer(Deferred::Text(text[stopped_at..].to_string()));
        }
    }

    fn on_line_break(&mut self) {
        if self.deferring() {
            return self.defer(Deferred::LineBreak);
        }
        self.assembler.line_break(&mut *self.on_page);
    }

    fn on_image(&mut self, image: ImageBlock) {
        if self.deferring() {
            return self.defer(Deferred::Image(image));
        }
        self.assembler.place_image(image, &mut *self.on_page);
    }

    fn should_stop(&self) -> bool {
        self.assembler.hit_max_pages
    }
}
