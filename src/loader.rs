//! Document loader: walks the documents directory and turns each supported
//! file into one or more [`Document`]s.
//!
//! | Extension | Content type | Documents |
//! |-----------|--------------|-----------|
//! | `.pdf` | `application/pdf` | one per page, `page` set (1-based) |
//! | `.txt` | `text/plain` | one |
//! | `.md`, `.markdown` | `text/markdown` | one, `title` from the first `# ` heading |
//!
//! Loading is per-file fallible: a file that fails to parse becomes a
//! [`RagError::Load`] and a file with any other extension becomes a
//! [`RagError::UnsupportedFormat`]. Both are collected in
//! [`LoadReport::skipped`] and the walk continues.
//!
//! Hidden files and directories (leading `.`) are never visited. `source`
//! metadata is the file name; exclude globs match the path relative to the
//! documents directory.

use anyhow::Result;
use docqa_core::error::RagError;
use docqa_core::models::{Document, DocumentMetadata};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Directory walk settings.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Glob patterns (relative to the documents directory) to ignore.
    pub exclude_globs: Vec<String>,
}

/// Outcome of loading a directory.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    /// Files that were skipped, with the reason.
    pub skipped: Vec<RagError>,
}

/// Load every supported file under `dir`.
///
/// A missing directory yields an empty report and a warning. Only invalid
/// exclude globs are errors.
pub fn load_documents(dir: &Path, options: &LoaderOptions) -> Result<LoadReport> {
    let mut report = LoadReport::default();

    if !dir.exists() {
        warn!(dir = %dir.display(), "documents directory does not exist");
        return Ok(report);
    }

    let exclude_set = build_globset(&options.exclude_globs)?;
    let max_depth = if options.recursive { usize::MAX } else { 1 };

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| dir.display().to_string());
                warn!(path = %path, error = %e, "skipping unreadable entry");
                report.skipped.push(RagError::Load {
                    path,
                    message: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(dir).unwrap_or(path);
        if exclude_set.is_match(relative) {
            debug!(path = %relative.display(), "excluded by glob");
            continue;
        }

        match load_file(path) {
            Ok(docs) => {
                debug!(path = %relative.display(), documents = docs.len(), "loaded");
                report.documents.extend(docs);
            }
            Err(e) => {
                warn!(error = %e, "skipping file");
                report.skipped.push(e);
            }
        }
    }

    info!(
        dir = %dir.display(),
        documents = report.documents.len(),
        skipped = report.skipped.len(),
        "documents loaded"
    );

    Ok(report)
}

/// Load a single file, dispatching on its extension.
pub fn load_file(path: &Path) -> Result<Vec<Document>, RagError> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => load_pdf(path),
        "txt" => load_text(path),
        "md" | "markdown" => load_markdown(path),
        _ => Err(RagError::UnsupportedFormat {
            path: path.display().to_string(),
            extension,
        }),
    }
}

fn load_pdf(path: &Path) -> Result<Vec<Document>, RagError> {
    let bytes = std::fs::read(path).map_err(|e| load_error(path, e))?;
    let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
        .map_err(|e| load_error(path, format!("PDF extraction failed: {}", e)))?;
    let (title, author) = pdf_info(&bytes);

    let source = file_name(path);
    let docs = pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            let mut metadata = DocumentMetadata::new(source.clone(), MIME_PDF);
            metadata.page = Some(i as u32 + 1);
            metadata.title = title.clone();
            metadata.author = author.clone();
            Document::new(normalize_newlines(&text), metadata)
        })
        .collect();
    Ok(docs)
}

fn load_text(path: &Path) -> Result<Vec<Document>, RagError> {
    let text = read_utf8(path)?;
    let metadata = DocumentMetadata::new(file_name(path), MIME_TEXT);
    Ok(vec![Document::new(text, metadata)])
}

fn load_markdown(path: &Path) -> Result<Vec<Document>, RagError> {
    let text = read_utf8(path)?;
    let mut metadata = DocumentMetadata::new(file_name(path), MIME_MARKDOWN);
    metadata.title = markdown_title(&text);
    Ok(vec![Document::new(text, metadata)])
}

fn read_utf8(path: &Path) -> Result<String, RagError> {
    let bytes = std::fs::read(path).map_err(|e| load_error(path, e))?;
    let text = String::from_utf8(bytes).map_err(|e| load_error(path, e))?;
    Ok(normalize_newlines(&text))
}

/// First level-one ATX heading, if any.
fn markdown_title(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim_start)
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Title and author from the PDF document information dictionary.
fn pdf_info(bytes: &[u8]) -> (Option<String>, Option<String>) {
    let Ok(doc) = lopdf::Document::load_mem(bytes) else {
        return (None, None);
    };
    let info = match doc.trailer.get(&b"Info"[..]) {
        Ok(lopdf::Object::Reference(id)) => doc.get_object(*id).and_then(|o| o.as_dict()).ok(),
        Ok(lopdf::Object::Dictionary(dict)) => Some(dict),
        _ => None,
    };
    let Some(info) = info else {
        return (None, None);
    };

    let field = |key: &[u8]| match info.get(key) {
        Ok(lopdf::Object::String(raw, _)) => decode_pdf_string(raw),
        _ => None,
    };
    (field(&b"Title"[..]), field(&b"Author"[..]))
}

/// Decode a PDF text string: UTF-16BE with BOM, otherwise byte-per-char.
fn decode_pdf_string(raw: &[u8]) -> Option<String> {
    let text = if raw.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = raw[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        raw.iter().map(|&b| b as char).collect()
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn load_error(path: &Path, message: impl std::fmt::Display) -> RagError {
    RagError::Load {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
