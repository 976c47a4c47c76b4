use std::env;
use std::fs;
use std::path::Path;
use std::process::ExitCode;

use pager_stream::section::SectionHeader;
use pager_stream::{
    ChapterParser, ContentParser, FixedAdvanceMetrics, FsStorage, MarkdownParser, PageElement,
    RenderConfig, Section, SectionSchema, Storage,
};
use serde_json::json;

#[derive(Clone, Debug)]
enum Command {
    Build {
        input: String,
        cache: String,
        config: Option<String>,
        max_pages: u16,
    },
    Info {
        cache: String,
    },
    Page {
        cache: String,
        index: u32,
    },
}

fn help_text() -> &'static str {
    "usage:\n  \
     pager-stream build <input.md|input.html> <cache> [--config <json>] [--max-pages <n>]\n  \
     pager-stream info <cache>\n  \
     pager-stream page <cache> <index>"
}

fn main() -> ExitCode {
    match run(env::args().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {}", msg);
            eprintln!("{}", help_text());
            ExitCode::FAILURE
        }
    }
}

fn run(args: Vec<String>) -> Result<(), String> {
    match parse_args(args)? {
        Command::Build {
            input,
            cache,
            config,
            max_pages,
        } => run_build(&input, &cache, config.as_deref(), max_pages),
        Command::Info { cache } => run_info(&cache),
        Command::Page { cache, index } => run_page(&cache, index),
    }
}

fn parse_args(args: Vec<String>) -> Result<Command, String> {
    let positional = |i: usize, name: &str| {
        args.get(i)
            .filter(|v| !v.starts_with("--"))
            .cloned()
            .ok_or_else(|| format!("missing <{}>", name))
    };

    match args.get(1).map(String::as_str) {
        Some("build") => {
            let input = positional(2, "input")?;
            let cache = positional(3, "cache")?;
            let mut config = None;
            let mut max_pages = 0u16;
            let mut i = 4usize;
            while i < args.len() {
                match args[i].as_str() {
                    "--config" => {
                        let v = args
                            .get(i + 1)
                            .ok_or_else(|| "--config requires a value".to_string())?;
                        config = Some(v.clone());
                        i += 2;
                    }
                    "--max-pages" => {
                        let v = args
                            .get(i + 1)
                            .ok_or_else(|| "--max-pages requires a value".to_string())?;
                        max_pages = v
                            .parse()
                            .map_err(|_| format!("invalid --max-pages value: {}", v))?;
                        i += 2;
                    }
                    other => return Err(format!("unknown argument: {}", other)),
                }
            }
            Ok(Command::Build {
                input,
                cache,
                config,
                max_pages,
            })
        }
        Some("info") => Ok(Command::Info {
            cache: positional(2, "cache")?,
        }),
        Some("page") => {
            let cache = positional(2, "cache")?;
            let index = positional(3, "index")?;
            let index = index
                .parse()
                .map_err(|_| format!("invalid page index: {}", index))?;
            Ok(Command::Page { cache, index })
        }
        Some("--help" | "-h") => Err("help requested".to_string()),
        Some(other) => Err(format!("unknown command: {}", other)),
        None => Err("missing command".to_string()),
    }
}

/// Storage rooted at the cache file's directory plus the file name within it.
fn open_cache(cache: &str) -> Result<(FsStorage, String), String> {
    let path = Path::new(cache);
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("invalid cache path: {}", cache))?;
    let root = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    Ok((FsStorage::new(root), name.to_string()))
}

fn load_config(path: Option<&str>) -> Result<RenderConfig, String> {
    let Some(path) = path else {
        return Ok(RenderConfig::default());
    };
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {}", path, e))?;
    serde_json::from_str(&text).map_err(|e| format!("{}: {}", path, e))
}

fn run_build(input: &str, cache: &str, config: Option<&str>, max_pages: u16) -> Result<(), String> {
    let config = load_config(config)?;
    let (storage, name) = open_cache(cache)?;
    storage.mkdir("").map_err(|e| e.to_string())?;
    let metrics = FixedAdvanceMetrics::default();
    let source = fs::read(input).map_err(|e| format!("{}: {}", input, e))?;

    let extension = Path::new(input)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let mut parser: Box<dyn ContentParser + '_> = match extension.as_deref() {
        Some("md" | "markdown") => {
            let text = String::from_utf8(source).map_err(|e| format!("{}: {}", input, e))?;
            Box::new(MarkdownParser::new(&metrics, config, text))
        }
        Some("html" | "xhtml" | "htm") => Box::new(
            ChapterParser::new(&storage, source, &metrics, config, "").with_progress(|percent| {
                println!("parsing... {}%", percent);
            }),
        ),
        _ => return Err(format!("unsupported input type: {}", input)),
    };

    let mut section = Section::new(&storage, name);
    section
        .create_section_file(&config, parser.as_mut(), max_pages)
        .map_err(|e| e.to_string())?;
    println!(
        "built {} pages into {}{}",
        section.page_count(),
        cache,
        if section.has_more_content() {
            " (more content remains)"
        } else {
            ""
        }
    );
    Ok(())
}

fn read_header(storage: &FsStorage, name: &str) -> Result<SectionHeader, String> {
    let mut file = storage.open_read(name).map_err(|e| e.to_string())?;
    SectionHeader::read(&mut file)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("{}: unknown section version", name))
}

fn run_info(cache: &str) -> Result<(), String> {
    let (storage, name) = open_cache(cache)?;
    let header = read_header(&storage, &name)?;
    let c = &header.config;
    let info = json!({
        "version": header.schema.version(),
        "current": header.schema == SectionSchema::CURRENT,
        "header_size": header.header_size(),
        "page_count": header.page_count,
        "lut_offset": header.lut_offset,
        "complete": !header.has_placeholders(),
        "has_more_content": header.has_more_content,
        "config": {
            "font_id": c.font_id,
            "line_compression": c.line_compression,
            "indent_level": c.indent_level,
            "spacing_level": c.spacing_level,
            "paragraph_alignment": c.paragraph_alignment,
            "hyphenation": c.hyphenation,
            "show_images": c.show_images,
            "viewport_width": c.viewport_width,
            "viewport_height": c.viewport_height,
        },
    });
    let text = serde_json::to_string_pretty(&info).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}

fn run_page(cache: &str, index: u32) -> Result<(), String> {
    let (storage, name) = open_cache(cache)?;
    let header = read_header(&storage, &name)?;
    if header.schema != SectionSchema::CURRENT {
        return Err(format!(
            "{}: section version {} must be rebuilt",
            cache,
            header.schema.version()
        ));
    }

    let mut section = Section::new(&storage, name);
    if !section
        .load_section_file(&header.config)
        .map_err(|e| e.to_string())?
    {
        return Err(format!("{}: section cache is invalid and was removed", cache));
    }
    let page = section.load_page(index).map_err(|e| e.to_string())?;

    let elements: Vec<_> = page
        .elements()
        .iter()
        .map(|element| match element {
            PageElement::Line(line) => json!({
                "type": "line",
                "x": line.x,
                "y": line.y,
                "style": format!("{:?}", line.block.style()),
                "monospace": line.block.is_monospace(),
                "words": line.block.words().iter().map(|w| json!({
                    "word": w.word,
                    "x": w.x,
                    "style": format!("{:?}", w.style),
                })).collect::<Vec<_>>(),
            }),
            PageElement::Image(image) => json!({
                "type": "image",
                "x": image.x,
                "y": image.y,
                "image": image.image,
            }),
        })
        .collect();
    let out = json!({
        "index": index,
        "page_count": section.page_count(),
        "elements": elements,
    });
    let text = serde_json::to_string_pretty(&out).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}
