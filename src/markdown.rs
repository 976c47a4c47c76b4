//! Markdown content driver.

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

use crate::content_parser::{
    push_preformatted_text, BlockKind, ContentParser, MarkupSink, PageAssembler, SpanKind,
};
use crate::error::PagerError;
use crate::metrics::GlyphMetrics;
use crate::page::Page;
use crate::render_config::RenderConfig;

const RULE_TEXT: &str = "\u{2500}\u{2500}\u{2500}";
const TABLE_PLACEHOLDER: &str = "[Table omitted]";
const IMAGE_PLACEHOLDER: &str = "[Image]";

fn parser_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS
}

#[derive(Clone, Copy, Debug, Default)]
struct MarkdownState {
    in_code_block: bool,
    table_depth: u16,
    image_depth: u16,
}

impl MarkdownState {
    fn skipping(&self) -> bool {
        self.table_depth > 0 || self.image_depth > 0
    }
}

fn italic_text<S: MarkupSink + ?Sized>(sink: &mut S, text: &str) {
    sink.on_enter_span(SpanKind::Italic);
    sink.on_text(text);
    sink.on_leave_span(SpanKind::Italic);
}

fn handle_event<S: MarkupSink + ?Sized>(state: &mut MarkdownState, sink: &mut S, event: Event<'_>) {
    match event {
        Event::Start(Tag::Table(_)) => {
            if state.table_depth == 0 {
                sink.on_enter_block(BlockKind::Paragraph);
                italic_text(sink, TABLE_PLACEHOLDER);
                sink.on_leave_block(BlockKind::Paragraph);
            }
            state.table_depth += 1;
        }
        Event::End(TagEnd::Table) => state.table_depth = state.table_depth.saturating_sub(1),
        Event::Start(Tag::Image { .. }) => {
            if state.image_depth == 0 && state.table_depth == 0 {
                sink.on_text(" ");
                italic_text(sink, IMAGE_PLACEHOLDER);
                sink.on_text(" ");
            }
            state.image_depth += 1;
        }
        Event::End(TagEnd::Image) => state.image_depth = state.image_depth.saturating_sub(1),
        _ if state.skipping() => {}

        Event::Start(Tag::Paragraph) => sink.on_enter_block(BlockKind::Paragraph),
        Event::End(TagEnd::Paragraph) => sink.on_leave_block(BlockKind::Paragraph),
        Event::Start(Tag::Heading { level, .. }) => {
            sink.on_enter_block(BlockKind::Heading(level as u8))
        }
        Event::End(TagEnd::Heading(level)) => sink.on_leave_block(BlockKind::Heading(level as u8)),
        Event::Start(Tag::BlockQuote(_)) => sink.on_enter_block(BlockKind::Quote),
        Event::End(TagEnd::BlockQuote(_)) => sink.on_leave_block(BlockKind::Quote),
        Event::Start(Tag::Item) => sink.on_enter_block(BlockKind::ListItem),
        Event::End(TagEnd::Item) => sink.on_leave_block(BlockKind::ListItem),
        Event::Start(Tag::CodeBlock(_)) => {
            state.in_code_block = true;
            sink.on_enter_block(BlockKind::Code);
        }
        Event::End(TagEnd::CodeBlock) => {
            state.in_code_block = false;
            sink.on_leave_block(BlockKind::Code);
        }
        Event::Start(Tag::Emphasis) => sink.on_enter_span(SpanKind::Italic),
        Event::End(TagEnd::Emphasis) => sink.on_leave_span(SpanKind::Italic),
        Event::Start(Tag::Strong) => sink.on_enter_span(SpanKind::Bold),
        Event::End(TagEnd::Strong) => sink.on_leave_span(SpanKind::Bold),

        Event::Text(text) => {
            if state.in_code_block {
                push_preformatted_text(sink, &text);
            } else {
                sink.on_text(&text);
            }
        }
        Event::Code(code) => {
            sink.on_enter_span(SpanKind::Code);
            sink.on_text(&code);
            sink.on_leave_span(SpanKind::Code);
        }
        Event::InlineMath(math) | Event::DisplayMath(math) => sink.on_text(&math),
        Event::SoftBreak => sink.on_text(" "),
        Event::HardBreak => sink.on_line_break(),
        Event::Rule => {
            sink.on_enter_block(BlockKind::Rule);
            sink.on_text(RULE_TEXT);
            sink.on_leave_block(BlockKind::Rule);
        }
        Event::TaskListMarker(checked) => sink.on_text(if checked { "[x] " } else { "[ ] " }),
        Event::FootnoteReference(label) => {
            sink.on_text("[");
            sink.on_text(&label);
            sink.on_text("]");
        }
        _ => {}
    }
}

/// [`ContentParser`] for a Markdown document held in memory.
///
/// A pass stopped at its page limit remembers how many tokenizer events it
/// consumed; the next pass re-tokenizes and skips them, continuing layout
/// from the retained assembler state.
pub struct MarkdownParser<'m> {
    source: String,
    state: MarkdownState,
    assembler: PageAssembler<'m>,
    events_consumed: usize,
    finished: bool,
    has_more: bool,
}

impl<'m> MarkdownParser<'m> {
    pub fn new(
        metrics: &'m dyn GlyphMetrics,
        config: RenderConfig,
        source: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            state: MarkdownState::default(),
            assembler: PageAssembler::new(metrics, config),
            events_consumed: 0,
            finished: false,
            has_more: false,
        }
    }
}

impl ContentParser for MarkdownParser<'_> {
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

        if !self.finished {
            let events = Parser::new_ext(&self.source, parser_options()).skip(self.events_consumed);
            for event in events {
                self.events_consumed += 1;
                handle_event(&mut self.state, &mut sink, event);
                if sink.should_stop() {
                    log::debug!("[MD] Page limit reached after {} events", self.events_consumed);
                    self.has_more = true;
                    return Ok(());
                }
            }
            sink.finish();
            self.finished = true;
        }

        drop(sink);
        self.has_more = self.assembler.has_pending_output();
        Ok(())
    }

    fn has_more_content(&self) -> bool {
        self.has_more
    }

    fn reset(&mut self) {
        self.state = MarkdownState::default();
        self.assembler.reset();
        self.events_consumed = 0;
        self.finished = false;
        self.has_more = false;
    }
}
