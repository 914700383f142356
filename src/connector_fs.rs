//! File-based source loader.
//!
//! Walks the documents directory, keeps files matching the include globs
//! (and not the exclude globs), and turns each into [`SourceDocument`]s:
//! one per page for PDFs, one per file otherwise. A file that cannot be read
//! or parsed is logged and skipped; it never aborts the batch.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ChunkingConfig;
use crate::error::SourceLoadError;
use crate::extract::{extract_pages, FileKind};
use crate::models::SourceDocument;

/// Result of a file scan: the loaded documents and the per-item failures.
#[derive(Debug, Default)]
pub struct FileLoad {
    pub documents: Vec<SourceDocument>,
    pub failures: Vec<SourceLoadError>,
}

/// Load every recognized file under `directory`.
///
/// `skip` names files that must never be loaded as documents (the URL list).
///
/// # Errors
///
/// Only a missing directory or an invalid glob is an error; per-file
/// problems are collected in [`FileLoad::failures`].
pub fn load_file_sources(
    directory: &Path,
    chunking: &ChunkingConfig,
    skip: &[PathBuf],
) -> Result<FileLoad> {
    if !directory.is_dir() {
        bail!("documents directory does not exist: {}", directory.display());
    }

    let include_set = build_globset(&chunking.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
    excludes.extend(chunking.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(directory) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if skip.iter().any(|s| s == path) {
            continue;
        }
        let relative = path.strip_prefix(directory).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        paths.push(path.to_path_buf());
    }

    // Sort for deterministic ordering
    paths.sort();

    let mut load = FileLoad::default();
    for path in paths {
        match load_file(&path) {
            Ok(docs) => {
                tracing::debug!(path = %path.display(), pages = docs.len(), "loaded file");
                load.documents.extend(docs);
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping file");
                load.failures.push(e);
            }
        }
    }

    Ok(load)
}

/// Load a single file into one document per page.
pub fn load_file(path: &Path) -> Result<Vec<SourceDocument>, SourceLoadError> {
    let kind = FileKind::from_path(path).map_err(|e| SourceLoadError::Extract {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let bytes = std::fs::read(path).map_err(|e| SourceLoadError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let pages = extract_pages(&bytes, kind).map_err(|e| SourceLoadError::Extract {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let source = path.display().to_string();
    Ok(pages
        .into_iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(page, text)| SourceDocument {
            text,
            source: source.clone(),
            page,
        })
        .collect())
}

/// Read a line-delimited URL list. One URL per non-empty line; blank lines
/// are ignored. A missing file means no URLs.
pub fn read_url_list(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn loads_text_files_in_sorted_order() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.md"), "Bravo").unwrap();
        fs::write(tmp.path().join("a.txt"), "Alpha").unwrap();
        fs::write(tmp.path().join("ignored.png"), [0u8, 1, 2]).unwrap();

        let load = load_file_sources(tmp.path(), &ChunkingConfig::default(), &[]).unwrap();
        let texts: Vec<&str> = load.documents.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["Alpha", "Bravo"]);
        assert!(load.failures.is_empty());
        assert!(load.documents.iter().all(|d| d.page.is_none()));
    }

    #[test]
    fn broken_pdf_is_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("broken.pdf"), b"definitely not a pdf").unwrap();
        fs::write(tmp.path().join("ok.txt"), "still loaded").unwrap();

        let load = load_file_sources(tmp.path(), &ChunkingConfig::default(), &[]).unwrap();
        assert_eq!(load.documents.len(), 1);
        assert_eq!(load.documents[0].text, "still loaded");
        assert_eq!(load.failures.len(), 1);
    }

    #[test]
    fn url_list_is_never_a_document() {
        let tmp = TempDir::new().unwrap();
        let urls = tmp.path().join("urls.txt");
        fs::write(&urls, "https://example.com\n").unwrap();
        fs::write(tmp.path().join("notes.txt"), "notes").unwrap();

        let load =
            load_file_sources(tmp.path(), &ChunkingConfig::default(), &[urls.clone()]).unwrap();
        assert_eq!(load.documents.len(), 1);
        assert_eq!(load.documents[0].text, "notes");
    }

    #[test]
    fn url_list_skips_blank_lines() {
        let tmp = TempDir::new().unwrap();
        let urls = tmp.path().join("urls.txt");
        fs::write(&urls, "https://a.example\n\n   \nhttps://b.example  \n").unwrap();
        assert_eq!(
            read_url_list(&urls).unwrap(),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(read_url_list(&tmp.path().join("missing.txt")).unwrap().is_empty());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_file_sources(&tmp.path().join("nope"), &ChunkingConfig::default(), &[]);
        assert!(err.is_err());
    }
}
