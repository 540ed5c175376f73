//! Hierarchical content parsing.
//!
//! Turns raw documents (local files or fetched pages) into a [`ContentTree`]
//! whose nesting mirrors the source's heading structure. Markdown and HTML
//! headings become tree levels; the paragraphs under a heading become that
//! section's text. Plain text falls back to a flat root-only tree.
//!
//! Directory parsing walks a read-only file tree and isolates failures per
//! file: one unreadable document never prevents its siblings from being
//! parsed. Failures are surfaced in the aggregate result, not thrown.

use globset::{Glob, GlobSet, GlobSetBuilder};
use pulldown_cmark::{Event, HeadingLevel, Parser as MarkdownParser, Tag, TagEnd};
use scraper::{Html, Selector};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::content::{ContentNode, ContentTree};
use crate::error::IngestError;
use crate::ingest::IngestionFailure;

/// Document formats the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocFormat {
    Markdown,
    Html,
    Text,
}

impl DocFormat {
    /// Detect a format from a file extension, defaulting to plain text.
    pub fn from_extension(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("md") | Some("markdown") => DocFormat::Markdown,
            Some("html") | Some("htm") => DocFormat::Html,
            _ => DocFormat::Text,
        }
    }

    /// Detect a format from an HTTP content type, defaulting to HTML
    /// (the common case for fetched pages).
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.contains("markdown") {
            DocFormat::Markdown
        } else if content_type.contains("text/plain") {
            DocFormat::Text
        } else {
            DocFormat::Html
        }
    }
}

/// Parse a raw document into a content tree.
///
/// Fails with [`IngestError::Parse`] when the document is empty or its
/// structure cannot be read.
pub fn parse(
    source_id: &str,
    uri: &str,
    raw: &str,
    format: DocFormat,
) -> Result<ContentTree, IngestError> {
    if raw.trim().is_empty() {
        return Err(IngestError::parse(source_id, "document is empty"));
    }

    let root = match format {
        DocFormat::Markdown => markdown_tree(source_id, raw),
        DocFormat::Html => html_tree(source_id, raw)?,
        DocFormat::Text => text_tree(source_id, raw),
    };

    Ok(ContentTree {
        source_uri: uri.to_string(),
        root,
    })
}

/// Read and parse a single file, detecting the format from its extension.
/// Unreadable bytes (e.g. invalid UTF-8) surface as a parse failure.
pub fn parse_file(path: &Path, source_id: &str) -> Result<ContentTree, IngestError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| IngestError::parse(source_id, e.to_string()))?;
    let uri = format!("file://{}", path.display());
    parse(source_id, &uri, &raw, DocFormat::from_extension(path))
}

/// Options for [`parse_from_directory`].
#[derive(Debug, Clone)]
pub struct DirectoryParsingConfig {
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
}

impl Default for DirectoryParsingConfig {
    fn default() -> Self {
        Self {
            include_globs: vec![
                "**/*.md".to_string(),
                "**/*.markdown".to_string(),
                "**/*.txt".to_string(),
                "**/*.html".to_string(),
                "**/*.htm".to_string(),
            ],
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

/// Aggregate result of parsing one directory: the successfully parsed
/// trees plus every per-file failure encountered along the way.
#[derive(Debug, Default)]
pub struct DirectoryParsingResult {
    pub content_roots: Vec<ContentTree>,
    pub failures: Vec<IngestionFailure>,
}

/// Recursively discover and parse documents under `root`.
///
/// Returns an error only when the directory itself cannot be walked
/// (missing, not a directory). Individual file failures are collected in
/// the result and never abort the walk.
pub fn parse_from_directory(
    root: &Path,
    config: &DirectoryParsingConfig,
) -> Result<DirectoryParsingResult, IngestError> {
    if !root.is_dir() {
        return Err(IngestError::parse(
            root.display().to_string(),
            "not a directory",
        ));
    }

    let include_set = build_globset(&config.include_globs)
        .map_err(|e| IngestError::parse(root.display().to_string(), e.to_string()))?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)
        .map_err(|e| IngestError::parse(root.display().to_string(), e.to_string()))?;

    let mut result = DirectoryParsingResult::default();

    let walker = WalkDir::new(root)
        .follow_links(config.follow_symlinks)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let source = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                result.failures.push(IngestionFailure::new(source, e.to_string()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match parse_file(path, &rel_str) {
            Ok(tree) => {
                debug!(source = %rel_str, sections = tree.section_count(), "parsed document");
                result.content_roots.push(tree);
            }
            Err(e) => {
                result
                    .failures
                    .push(IngestionFailure::from_error(path.display().to_string(), &e));
            }
        }
    }

    Ok(result)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

// ============ Markdown ============

fn heading_depth(level: HeadingLevel) -> usize {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn markdown_tree(source_id: &str, raw: &str) -> ContentNode {
    let mut builder = TreeBuilder::new(source_id);
    let mut in_heading = false;
    let mut heading_buf = String::new();
    let mut pending_level = 0usize;

    for event in MarkdownParser::new(raw) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                in_heading = true;
                heading_buf.clear();
                pending_level = heading_depth(level);
            }
            Event::End(TagEnd::Heading(_)) => {
                in_heading = false;
                let title = heading_buf.trim();
                // The first top-level heading names the document itself.
                if pending_level == 1 && builder.is_pristine() && !builder.root_titled() {
                    builder.name_document(title);
                } else {
                    builder.open_section(pending_level, title);
                }
            }
            Event::Start(Tag::CodeBlock(_)) => {
                builder.push_text("\n```\n");
            }
            Event::End(TagEnd::CodeBlock) => {
                builder.push_text("```\n\n");
            }
            Event::End(TagEnd::Paragraph) => {
                builder.push_text("\n\n");
            }
            Event::Start(Tag::Item) => {
                builder.push_text("- ");
            }
            Event::End(TagEnd::Item) => {
                builder.push_text("\n");
            }
            Event::Text(t) => {
                if in_heading {
                    heading_buf.push_str(&t);
                } else {
                    builder.push_text(&t);
                }
            }
            Event::Code(code) => {
                if in_heading {
                    heading_buf.push_str(&code);
                } else {
                    builder.push_text("`");
                    builder.push_text(&code);
                    builder.push_text("`");
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                builder.push_text("\n");
            }
            _ => {}
        }
    }

    builder.finish()
}

// ============ HTML ============

fn html_tree(source_id: &str, raw: &str) -> Result<ContentNode, IngestError> {
    let document = Html::parse_document(raw);

    let title_selector =
        Selector::parse("title").map_err(|e| IngestError::parse(source_id, e.to_string()))?;
    let content_selector = Selector::parse("h1, h2, h3, h4, h5, h6, p, li, pre")
        .map_err(|e| IngestError::parse(source_id, e.to_string()))?;

    let page_title = document
        .select(&title_selector)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let mut builder = TreeBuilder::new(source_id);
    if let Some(title) = page_title {
        builder.set_root_title(&title);
    }

    let mut saw_content = false;
    let mut h1_seen = false;
    for element in document.select(&content_selector) {
        let text = element.text().collect::<String>();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        saw_content = true;
        match element.value().name() {
            // The page's first h1 names the document; later h1s open sections.
            "h1" if !h1_seen && builder.is_pristine() => {
                builder.name_document(text);
                h1_seen = true;
            }
            "h1" => builder.open_section(1, text),
            "h2" => builder.open_section(2, text),
            "h3" => builder.open_section(3, text),
            "h4" => builder.open_section(4, text),
            "h5" => builder.open_section(5, text),
            "h6" => builder.open_section(6, text),
            "li" => {
                builder.push_text("- ");
                builder.push_text(text);
                builder.push_text("\n");
            }
            _ => {
                builder.push_text(text);
                builder.push_text("\n\n");
            }
        }
    }

    if !saw_content {
        return Err(IngestError::parse(source_id, "no readable content in page"));
    }

    Ok(builder.finish())
}

// ============ Plain text ============

fn text_tree(source_id: &str, raw: &str) -> ContentNode {
    let mut builder = TreeBuilder::new(source_id);
    if let Some(first_line) = raw.lines().find(|l| !l.trim().is_empty()) {
        builder.set_root_title(first_line.trim());
    }
    builder.push_text(raw.trim());
    builder.finish()
}

// ============ Tree assembly ============

/// Incremental tree assembly shared by all formats. Maintains a stack of
/// open sections; a heading at level L closes every open section at level
/// >= L before opening a new child.
struct TreeBuilder {
    // (depth, node) — index 0 is always the root at depth 0.
    stack: Vec<(usize, ContentNode)>,
    text_buf: String,
    next_id: usize,
    source_id: String,
    root_titled: bool,
}

impl TreeBuilder {
    fn new(source_id: &str) -> Self {
        let root_title = Path::new(source_id)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| source_id.to_string());
        Self {
            stack: vec![(0, ContentNode::new(source_id, root_title))],
            text_buf: String::new(),
            next_id: 0,
            source_id: source_id.to_string(),
            root_titled: false,
        }
    }

    fn set_root_title(&mut self, title: &str) {
        if !self.root_titled {
            self.stack[0].1.title = title.to_string();
            self.root_titled = true;
        }
    }

    /// True while nothing but the untouched root is on the stack.
    fn is_pristine(&self) -> bool {
        self.stack.len() == 1 && self.stack[0].1.children.is_empty()
    }

    fn root_titled(&self) -> bool {
        self.root_titled
    }

    /// Record the document's own title without opening a section.
    fn name_document(&mut self, title: &str) {
        self.flush_text();
        self.set_root_title(title);
    }

    fn push_text(&mut self, text: &str) {
        self.text_buf.push_str(text);
    }

    fn flush_text(&mut self) {
        let text = self.text_buf.trim();
        if !text.is_empty() {
            let node = &mut self.stack.last_mut().expect("stack never empty").1;
            match &mut node.text {
                Some(existing) => {
                    existing.push_str("\n\n");
                    existing.push_str(text);
                }
                None => node.text = Some(text.to_string()),
            }
        }
        self.text_buf.clear();
    }

    fn open_section(&mut self, level: usize, title: &str) {
        self.flush_text();

        while self.stack.len() > 1 && self.stack.last().expect("stack never empty").0 >= level {
            self.close_section();
        }

        self.next_id += 1;
        let id = format!("{}#s{}", self.source_id, self.next_id);
        self.stack.push((level, ContentNode::new(id, title)));
    }

    fn close_section(&mut self) {
        let (_, node) = self.stack.pop().expect("stack never empty");
        self.stack
            .last_mut()
            .expect("root never popped")
            .1
            .children
            .push(node);
    }

    fn finish(mut self) -> ContentNode {
        self.flush_text();
        while self.stack.len() > 1 {
            self.close_section();
        }
        self.stack.pop().expect("stack never empty").1
    }
}
