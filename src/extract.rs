//! Plain-text extraction for the formats the loaders understand.
//!
//! Loaders supply bytes (a file on disk, a fetched page); this module returns
//! UTF-8 text. PDFs are extracted page by page so every page keeps its page
//! number; HTML is reduced to its visible text.

use std::path::Path;

/// Extraction error. The loader logs it and skips the item.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedExtension(String),
    Pdf(String),
    Utf8(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedExtension(ext) => write!(f, "unsupported file type: {}", ext),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Utf8(e) => write!(f, "not valid UTF-8 text: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// File kinds recognized by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Text,
    Html,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(FileKind::Pdf),
            "txt" | "md" | "markdown" | "rst" => Ok(FileKind::Text),
            "html" | "htm" => Ok(FileKind::Html),
            other => Err(ExtractError::UnsupportedExtension(other.to_string())),
        }
    }
}

/// Extract text from a file's bytes. Returns one entry per page for PDFs
/// (`Some(page)`, 1-based) and a single `None`-paged entry otherwise.
pub fn extract_pages(bytes: &[u8], kind: FileKind) -> Result<Vec<(Option<u32>, String)>, ExtractError> {
    match kind {
        FileKind::Pdf => {
            let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
                .map_err(|e| ExtractError::Pdf(e.to_string()))?;
            Ok(pages
                .into_iter()
                .enumerate()
                .map(|(i, text)| (Some(i as u32 + 1), text))
                .collect())
        }
        FileKind::Text => {
            let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::Utf8(e.to_string()))?;
            Ok(vec![(None, text.to_string())])
        }
        FileKind::Html => {
            let html = String::from_utf8_lossy(bytes);
            Ok(vec![(None, html_to_text(&html))])
        }
    }
}

/// Elements whose content is never visible text.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "head", "template", "svg"];

/// Elements that start a new line of text.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "tr", "table", "section", "article", "header", "footer",
    "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre", "hr", "main", "nav",
];

/// Reduce an HTML page to its visible text.
///
/// Drops comments and the content of non-visible elements, turns block
/// elements into line breaks, decodes common entities, and collapses runs
/// of whitespace. Malformed markup degrades to "strip what looks like a tag".
pub fn html_to_text(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len() / 2);
    let mut i = 0usize;

    while i < html.len() {
        let rest = &html[i..];
        if !rest.starts_with('<') {
            let next_tag = rest.find('<').unwrap_or(rest.len());
            out.push_str(&decode_entities(&rest[..next_tag]));
            i += next_tag;
            continue;
        }

        if rest.starts_with("<!--") {
            i += rest.find("-->").map(|p| p + 3).unwrap_or(rest.len());
            continue;
        }

        // A bare `<` with nothing closing it is text.
        let tag_end = match rest.find('>') {
            Some(p) => p,
            None => {
                out.push_str(&decode_entities(rest));
                break;
            }
        };
        let name = tag_name(&lower[i + 1..i + tag_end]);

        if SKIPPED_ELEMENTS.contains(&name.as_str()) && !lower[i..].starts_with("</") {
            let closing = format!("</{}", name);
            match lower[i + tag_end..].find(&closing) {
                Some(p) => {
                    let after = i + tag_end + p;
                    i = after + lower[after..].find('>').map(|q| q + 1).unwrap_or(closing.len());
                }
                None => i = html.len(),
            }
            continue;
        }

        if BLOCK_ELEMENTS.contains(&name.as_str()) {
            out.push('\n');
        }
        i += tag_end + 1;
    }

    collapse_whitespace(&out)
}

fn tag_name(inner: &str) -> String {
    inner
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];
        let semi = candidate.find(';').filter(|&p| p <= 10);
        let decoded = semi.and_then(|p| decode_entity(&candidate[1..p]).map(|c| (c, p)));
        match decoded {
            Some((c, p)) => {
                out.push(c);
                rest = &candidate[p + 1..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Collapse horizontal whitespace to single spaces and keep at most one
/// blank line between blocks.
fn collapse_whitespace(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();

    let mut out = String::new();
    let mut blank_run = 0;
    for line in lines {
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        blank_run = 0;
    }
    out
}
