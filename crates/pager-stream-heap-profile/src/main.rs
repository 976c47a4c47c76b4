//! DHAT heap profiler for pager-stream.
//!
//! Profiles allocation patterns of the pagination pipeline:
//! typeset -> layout -> section build -> page read.
//!
//! Usage:
//!   cargo run -p pager-stream-heap-profile --release -- [OPTIONS] [CHAPTER_FILES...]
//!
//! Chapter files are `.md` or `.html`/`.xhtml`. Outputs dhat-<phase>-<name>.json
//! files in the output directory (default: target/memory).
//! Open in https://nnethercote.github.io/dh_view/dh_view.html

#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;

use pager_stream::{
    ChapterHtmlParser, ContentParser, FixedAdvanceMetrics, FsStorage, MarkdownParser, ParsedText,
    RenderConfig, Section,
};

const DISPLAY_WIDTH: u16 = 480;
const DISPLAY_HEIGHT: u16 = 800;
const SYNTHETIC_NAME: &str = "synthetic";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Typeset,
    Layout,
    Build,
    Read,
}

impl Phase {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "typeset" => Some(Self::Typeset),
            "layout" => Some(Self::Layout),
            "build" => Some(Self::Build),
            "read" => Some(Self::Read),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Typeset => "typeset",
            Self::Layout => "layout",
            Self::Build => "build",
            Self::Read => "read",
        }
    }
}

/// A chapter loaded into memory, with the driver its extension selects.
enum Chapter {
    Markdown(String),
    Xhtml(Vec<u8>),
}

impl Chapter {
    fn load(path: &Path) -> Self {
        let bytes = std::fs::read(path)
            .unwrap_or_else(|e| panic!("read {}: {}", path.display(), e));
        let is_markdown = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("md"));
        if is_markdown {
            Self::Markdown(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            Self::Xhtml(bytes)
        }
    }

    fn synthetic() -> Self {
        let vocabulary = ["a", "narrow", "street", "ran", "downhill", "toward", "the", "river"];
        let mut text = String::from("# Synthetic\n\n");
        for p in 0..300 {
            for w in 0..(40 + p % 60) {
                text.push_str(vocabulary[(p + w * 3) % vocabulary.len()]);
                text.push(' ');
            }
            text.push_str("\n\n");
        }
        Self::Markdown(text)
    }

    fn parser<'m>(
        &'m self,
        metrics: &'m FixedAdvanceMetrics,
        config: RenderConfig,
    ) -> Box<dyn ContentParser + 'm> {
        match self {
            Self::Markdown(text) => Box::new(MarkdownParser::new(metrics, config, text.as_str())),
            Self::Xhtml(bytes) => Box::new(ChapterHtmlParser::new(
                metrics,
                config,
                Cursor::new(bytes.as_slice()),
            )),
        }
    }

    fn plain_words(&self) -> Vec<String> {
        let text = match self {
            Self::Markdown(text) => text.clone(),
            Self::Xhtml(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        };
        text.split_whitespace().map(str::to_string).collect()
    }
}

fn profile_chapter(chapter: &Chapter, phase: Phase, scratch: &Path) {
    let metrics = FixedAdvanceMetrics::new(11, 6, 24);
    let config = RenderConfig::for_viewport(DISPLAY_WIDTH, DISPLAY_HEIGHT);

    match phase {
        Phase::Typeset => {
            let mut text = ParsedText::new(config.block_style(), 0, config.hyphenation);
            for word in chapter.plain_words() {
                text.add_word(&word, pager_stream::FontStyle::Regular);
            }
            let mut lines = 0usize;
            text.layout_and_extract_lines(&metrics, config.font_id, DISPLAY_WIDTH, true, |_| {
                lines += 1
            });
            eprintln!("    lines={}", lines);
        }
        Phase::Layout => {
            let mut parser = chapter.parser(&metrics, config);
            let mut pages = 0usize;
            parser
                .parse_pages(&mut |_| pages += 1, 0)
                .unwrap_or_else(|e| panic!("layout: {}", e));
            eprintln!("    pages={}", pages);
        }
        Phase::Build | Phase::Read => {
            let storage = FsStorage::new(scratch);
            let mut section = Section::new(&storage, "sections/profile.bin");
            let mut parser = chapter.parser(&metrics, config);
            section
                .create_section_file(&config, parser.as_mut(), 0)
                .unwrap_or_else(|e| panic!("build: {}", e));
            if phase == Phase::Read {
                let mut reader = Section::new(&storage, "sections/profile.bin");
                let loaded = reader
                    .load_section_file(&config)
                    .unwrap_or_else(|e| panic!("load: {}", e));
                assert!(loaded, "section cache was rejected");
                for index in (0..reader.page_count()).rev() {
                    let _page = reader
                        .load_page(index)
                        .unwrap_or_else(|e| panic!("page {}: {}", index, e));
                }
            }
            eprintln!("    pages={}", section.page_count());
        }
    }
}

fn short_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(SYNTHETIC_NAME)
        .to_string()
}

fn usage() {
    eprintln!("Usage: heap-profile [OPTIONS] [CHAPTER_FILES...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --phase <typeset|layout|build|read>  Phase to profile (default: build)");
    eprintln!("  --out-dir <DIR>                      Output directory (default: target/memory)");
    eprintln!();
    eprintln!("Each chapter gets its own clean DHAT profile (separate process).");
    eprintln!("If no chapter files are given, profiles a synthetic Markdown chapter.");
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut phase = Phase::Build;
    let mut out_dir = PathBuf::from("target/memory");
    let mut files: Vec<PathBuf> = Vec::new();
    // Internal flag: when set, we're a child process profiling a single input.
    let mut single_file_mode = false;
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--phase" => {
                i += 1;
                phase = args
                    .get(i)
                    .and_then(|p| Phase::from_str(p))
                    .unwrap_or_else(|| {
                        usage();
                        std::process::exit(1);
                    });
            }
            "--out-dir" => {
                i += 1;
                out_dir = args.get(i).map(PathBuf::from).unwrap_or_else(|| {
                    usage();
                    std::process::exit(1);
                });
            }
            "--single-file" => single_file_mode = true,
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other => files.push(PathBuf::from(other)),
        }
        i += 1;
    }

    std::fs::create_dir_all(&out_dir).unwrap_or_else(|e| {
        eprintln!("Failed to create output dir {}: {}", out_dir.display(), e);
        std::process::exit(1);
    });
    let phase_name = phase.name();

    if single_file_mode || files.is_empty() {
        let chapter = match files.first() {
            Some(file) => Chapter::load(file),
            None => Chapter::synthetic(),
        };
        let name = files
            .first()
            .map_or_else(|| SYNTHETIC_NAME.to_string(), |f| short_name(f));
        let scratch = out_dir.join(format!("scratch-{name}"));
        let json_path = out_dir.join(format!("dhat-{phase_name}-{name}.json"));
        eprintln!("heap-profile: phase={}, input={}", phase_name, name);

        {
            let _profiler = dhat::Profiler::builder().file_name(json_path.clone()).build();
            profile_chapter(&chapter, phase, &scratch);
            // _profiler drops here, writes JSON
        }
        let _ = std::fs::remove_dir_all(&scratch);
        eprintln!(
            "Done. Open {} in https://nnethercote.github.io/dh_view/dh_view.html",
            json_path.display()
        );
        return;
    }

    let self_exe = std::env::current_exe().unwrap_or_else(|e| {
        eprintln!("Failed to determine own executable path: {}", e);
        std::process::exit(1);
    });

    let mut any_failed = false;
    for file in &files {
        let status = Command::new(&self_exe)
            .arg("--single-file")
            .arg("--phase")
            .arg(phase_name)
            .arg("--out-dir")
            .arg(&out_dir)
            .arg(file)
            .status();

        match status {
            Ok(s) if s.success() => {}
            Ok(s) => {
                eprintln!("    FAILED (exit {})", s.code().unwrap_or(-1));
                any_failed = true;
            }
            Err(e) => {
                eprintln!("    FAILED to spawn: {}", e);
                any_failed = true;
            }
        }
    }

    if any_failed {
        std::process::exit(1);
    }
}
