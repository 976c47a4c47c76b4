use pager_stream::{BlockStyle, FixedAdvanceMetrics, RenderConfig};

pub const DISPLAY_WIDTH: u16 = 480;
pub const DISPLAY_HEIGHT: u16 = 800;

const VOCABULARY: &[&str] = &[
    "the", "quiet", "harbour", "lantern", "drifted", "across", "a", "winter", "morning",
    "while", "sailors", "argued", "about", "tides", "and", "unfinished", "letters",
];

/// Fixed-advance measurer shared by the integration tests.
pub fn metrics() -> FixedAdvanceMetrics {
    FixedAdvanceMetrics::new(11, 6, 24)
}

pub fn config() -> RenderConfig {
    RenderConfig::for_viewport(DISPLAY_WIDTH, DISPLAY_HEIGHT)
        .with_paragraph_alignment(BlockStyle::Justified)
        .with_spacing_level(1)
        .with_indent_level(1)
}

/// `count` space-separated words drawn from a fixed vocabulary.
pub fn words(count: usize, seed: usize) -> String {
    let mut out = String::with_capacity(count * 8);
    for i in 0..count {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(VOCABULARY[(i * 7 + seed) % VOCABULARY.len()]);
    }
    out
}

/// Markdown chapter with a heading, `paragraphs` body paragraphs, a list and
/// a code block.
pub fn markdown_chapter(paragraphs: usize) -> String {
    let mut out = String::from("# Chapter One\n\n");
    for i in 0..paragraphs {
        out.push_str(&words(40 + i % 25, i));
        out.push_str("\n\n");
        if i % 10 == 9 {
            out.push_str("- first point\n- second *point*\n\n```\nfn main() {}\n```\n\n");
        }
    }
    out
}

/// XHTML chapter with HTML5 void elements left unterminated.
pub fn xhtml_chapter(paragraphs: usize) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\">\
         <head><title>Chapter</title><style>p { margin: 0 }</style></head><body>\
         <h1>Chapter One</h1>",
    );
    for i in 0..paragraphs {
        out.push_str("<p>");
        out.push_str(&words(40 + i % 25, i));
        if i % 5 == 4 {
            out.push_str(" <em>slanted words</em> &mdash; <b>heavy</b><br>after the break");
        }
        out.push_str("</p>");
        if i % 12 == 11 {
            out.push_str("<img src=\"images/plate.png\" alt=\"A plate\" width=\"600\" height=\"300\">");
        }
    }
    out.push_str("</body></html>");
    out
}
