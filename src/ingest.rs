//! Ingestion pipeline: loaders → chunker → staged index generation.
//!
//! This module produces a fully written, unpublished generation. Publishing
//! and retiring old generations is left to the caller
//! ([`Session::ingest`](crate::session::Session::ingest)), which must first
//! release its own reader on the old generation.

use anyhow::Result;
use serde::Serialize;

use crate::chunk::split;
use crate::config::Config;
use crate::connector_fs::{load_file_sources, read_url_list};
use crate::connector_web::{load_url_sources, PageFetcher};
use crate::embedding::Embedder;
use crate::index::{self, BuildMode, BuildOptions, StagedGeneration};
use crate::models::SourceDocument;
use crate::progress::{IngestProgressEvent, IngestProgressReporter};

/// Documents gathered from every loader, plus how many items were skipped.
#[derive(Debug, Default)]
pub struct LoadedSources {
    pub documents: Vec<SourceDocument>,
    pub files_skipped: usize,
    pub urls_skipped: usize,
}

/// What an ingest call did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestReport {
    /// An index exists and a rebuild was not forced.
    AlreadyPresent { generation: String, chunks: usize },
    /// Loaders found nothing; the existing index (if any) was left alone.
    NoSources,
    Built(BuildSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildSummary {
    pub generation: String,
    pub documents: usize,
    pub chunks: usize,
    pub files_skipped: usize,
    pub urls_skipped: usize,
    pub generations_retired: usize,
    pub fingerprint: String,
}

/// Run every loader. The URL list file is never treated as a document.
pub async fn load_sources(config: &Config, fetchers: &[Box<dyn PageFetcher>]) -> Result<LoadedSources> {
    let urls_file = config.paths.urls_file();
    let files = load_file_sources(
        &config.paths.documents_dir,
        &config.chunking,
        std::slice::from_ref(&urls_file),
    )?;

    let urls = read_url_list(&urls_file)?;
    let pages = load_url_sources(&urls, fetchers).await;

    tracing::info!(
        files = files.documents.len(),
        files_skipped = files.failures.len(),
        pages = pages.documents.len(),
        urls_skipped = pages.failures.len(),
        "sources loaded"
    );

    let mut documents = files.documents;
    documents.extend(pages.documents);
    Ok(LoadedSources {
        documents,
        files_skipped: files.failures.len(),
        urls_skipped: pages.failures.len(),
    })
}

/// Load, split, and write a new generation. Returns `None` when there is
/// nothing to index.
pub async fn stage_from_sources(
    config: &Config,
    embedder: &dyn Embedder,
    fetchers: &[Box<dyn PageFetcher>],
    progress: &dyn IngestProgressReporter,
) -> Result<Option<(StagedGeneration, LoadedSources)>> {
    progress.report(IngestProgressEvent::Loading);
    let sources = load_sources(config, fetchers).await?;
    if sources.documents.is_empty() {
        return Ok(None);
    }

    progress.report(IngestProgressEvent::Chunking {
        documents: sources.documents.len() as u64,
    });
    let chunks = split(
        &sources.documents,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    )?;
    if chunks.is_empty() {
        return Ok(None);
    }

    let options = BuildOptions {
        mode: BuildMode::Fresh,
        chunk_size: config.chunking.chunk_size,
        chunk_overlap: config.chunking.chunk_overlap,
        batch_size: config.embedding.batch_size,
        progress,
    };
    let staged = index::stage(&chunks, &config.paths.index_dir, embedder, &options).await?;
    Ok(Some((staged, sources)))
}
