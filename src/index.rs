//! Persisted similarity index with atomic generation swaps.
//!
//! # Layout
//!
//! ```text
//! <index_dir>/
//!   CURRENT                 name of the live generation, e.g. "gen-3f2c..."
//!   gen-<uuid>/
//!     index.sqlite          tables `chunks` and `vectors`
//!     manifest.json         model, dims, chunk count, chunk params, fingerprint
//! ```
//!
//! A rebuild never touches the live generation. It writes a complete new
//! `gen-<uuid>/` directory ([`stage`]), then publishes it by writing
//! `CURRENT.tmp` and renaming it over `CURRENT` ([`publish`]). A rename is
//! atomic, so `CURRENT` always names a complete generation or does not
//! exist. Readers that opened the previous generation keep working against
//! it until they drop their [`IndexReader`]; old generations are removed
//! afterwards by [`retire_stale_generations`].

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob, Embedder};
use crate::error::IndexError;
use crate::migrate;
use crate::models::{Chunk, EmbeddingRecord};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress};

pub const CURRENT_FILE: &str = "CURRENT";
const CURRENT_TMP_FILE: &str = "CURRENT.tmp";
const GENERATION_PREFIX: &str = "gen-";
pub const DB_FILE: &str = "index.sqlite";
pub const MANIFEST_FILE: &str = "manifest.json";

const REMOVE_ATTEMPTS: u32 = 5;
const REMOVE_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub generation: String,
    pub model: String,
    pub dims: usize,
    pub chunk_count: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// SHA-256 over the chunk hashes in order; equal inputs give equal fingerprints.
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Write a complete new generation from the given chunks.
    Fresh,
    /// Append to the live generation. Not supported: every rebuild is fresh.
    Incremental,
}

pub struct BuildOptions<'a> {
    pub mode: BuildMode,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub progress: &'a dyn IngestProgressReporter,
}

impl Default for BuildOptions<'_> {
    fn default() -> Self {
        Self {
            mode: BuildMode::Fresh,
            chunk_size: 1000,
            chunk_overlap: 100,
            batch_size: 64,
            progress: &NoProgress,
        }
    }
}

/// A fully written generation that has not been published yet.
#[derive(Debug, Clone)]
pub struct StagedGeneration {
    pub name: String,
    pub path: PathBuf,
    pub manifest: Manifest,
}

/// Build and publish a new generation. Convenience for callers that hold no
/// reader on the old one.
pub async fn build(
    chunks: &[Chunk],
    index_dir: &Path,
    embedder: &dyn Embedder,
    options: &BuildOptions<'_>,
) -> Result<StagedGeneration, IndexError> {
    let staged = stage(chunks, index_dir, embedder, options).await?;
    publish(index_dir, &staged)?;
    Ok(staged)
}

/// Write a complete new generation next to the live one.
///
/// On any failure the new generation directory is removed and `CURRENT` is
/// left exactly as it was.
pub async fn stage(
    chunks: &[Chunk],
    index_dir: &Path,
    embedder: &dyn Embedder,
    options: &BuildOptions<'_>,
) -> Result<StagedGeneration, IndexError> {
    if options.mode == BuildMode::Incremental {
        return Err(IndexError::Rebuild(
            "incremental builds are not supported; rebuild fresh".to_string(),
        ));
    }

    std::fs::create_dir_all(index_dir)?;
    let name = format!("{}{}", GENERATION_PREFIX, Uuid::new_v4());
    let path = index_dir.join(&name);
    std::fs::create_dir(&path)?;

    match write_generation(chunks, &name, &path, embedder, options).await {
        Ok(manifest) => {
            tracing::info!(
                generation = %name,
                chunks = manifest.chunk_count,
                dims = manifest.dims,
                "staged index generation"
            );
            Ok(StagedGeneration {
                name,
                path,
                manifest,
            })
        }
        Err(e) => {
            if let Err(cleanup) = remove_dir_with_retry(&path).await {
                tracing::warn!(path = %path.display(), error = %cleanup, "failed to clean up aborted generation");
            }
            Err(IndexError::Rebuild(format!("{:#}", e)))
        }
    }
}

async fn write_generation(
    chunks: &[Chunk],
    name: &str,
    path: &Path,
    embedder: &dyn Embedder,
    options: &BuildOptions<'_>,
) -> anyhow::Result<Manifest> {
    let batch_size = options.batch_size.max(1);
    let total = chunks.len() as u64;
    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = embedder.embed(&texts).await.context("embedding failed")?;
        if embedded.len() != batch.len() {
            anyhow::bail!(
                "embedding service returned {} vectors for {} chunks",
                embedded.len(),
                batch.len()
            );
        }
        vectors.extend(embedded);
        options.progress.report(IngestProgressEvent::Embedding {
            n: vectors.len() as u64,
            total,
        });
    }

    let dims = vectors.first().map(|v| v.len()).unwrap_or(embedder.dims());
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        anyhow::bail!(
            "inconsistent embedding dimensions: expected {}, got {}",
            dims,
            bad.len()
        );
    }

    let pool = db::connect(&path.join(DB_FILE)).await?;
    let written = insert_records(&pool, chunks, &vectors).await;
    // Close before returning so SQLite releases the file on every path.
    pool.close().await;
    written?;

    let manifest = Manifest {
        generation: name.to_string(),
        model: embedder.model_name().to_string(),
        dims,
        chunk_count: chunks.len(),
        chunk_size: options.chunk_size,
        chunk_overlap: options.chunk_overlap,
        fingerprint: fingerprint(chunks),
        created_at: Utc::now(),
    };
    let json = serde_json::to_string_pretty(&manifest)?;
    std::fs::write(path.join(MANIFEST_FILE), json)?;

    Ok(manifest)
}

async fn insert_records(pool: &SqlitePool, chunks: &[Chunk], vectors: &[Vec<f32>]) -> anyhow::Result<()> {
    migrate::create_schema(pool).await?;

    let mut tx = pool.begin().await?;
    for (chunk, vector) in chunks.iter().zip(vectors) {
        let rowid = sqlx::query(
            "INSERT INTO chunks (id, source, page, char_offset, chunk_index, text, hash) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.source)
        .bind(chunk.page.map(i64::from))
        .bind(chunk.offset as i64)
        .bind(chunk.chunk_index as i64)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("INSERT INTO vectors (chunk_rowid, dims, embedding) VALUES (?, ?, ?)")
            .bind(rowid)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub fn fingerprint(chunks: &[Chunk]) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.hash.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Make a staged generation the live one.
pub fn publish(index_dir: &Path, staged: &StagedGeneration) -> Result<(), IndexError> {
    if !staged.path.join(MANIFEST_FILE).is_file() {
        return Err(IndexError::Rebuild(format!(
            "generation {} is incomplete; refusing to publish",
            staged.name
        )));
    }

    let tmp = index_dir.join(CURRENT_TMP_FILE);
    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(staged.name.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, index_dir.join(CURRENT_FILE))?;

    tracing::info!(generation = %staged.name, "published index generation");
    Ok(())
}

/// Path of the live generation, if `CURRENT` names a complete one.
pub fn resolve_current(index_dir: &Path) -> Result<Option<PathBuf>, IndexError> {
    let pointer = index_dir.join(CURRENT_FILE);
    let name = match std::fs::read_to_string(&pointer) {
        Ok(s) => s.trim().to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if !is_generation_name(&name) {
        return Err(IndexError::Corrupt {
            path: pointer,
            message: format!("CURRENT names an invalid generation: {:?}", name),
        });
    }

    let path = index_dir.join(&name);
    if path.join(MANIFEST_FILE).is_file() && path.join(DB_FILE).is_file() {
        Ok(Some(path))
    } else {
        tracing::warn!(generation = %name, "CURRENT names a missing generation");
        Ok(None)
    }
}

fn is_generation_name(name: &str) -> bool {
    name.starts_with(GENERATION_PREFIX)
        && name.len() > GENERATION_PREFIX.len()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

pub fn read_manifest(generation: &Path) -> Result<Manifest, IndexError> {
    let path = generation.join(MANIFEST_FILE);
    let content = std::fs::read_to_string(&path)?;
    serde_json::from_str(&content).map_err(|e| IndexError::Corrupt {
        path,
        message: e.to_string(),
    })
}

/// Manifest of the live generation, if any.
pub fn current_manifest(index_dir: &Path) -> Result<Option<Manifest>, IndexError> {
    match resolve_current(index_dir)? {
        Some(generation) => Ok(Some(read_manifest(&generation)?)),
        None => Ok(None),
    }
}

fn list_generations(index_dir: &Path) -> Result<Vec<PathBuf>, IndexError> {
    if !index_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut generations = Vec::new();
    for entry in std::fs::read_dir(index_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type()?.is_dir() && is_generation_name(&name) {
            generations.push(entry.path());
        }
    }
    generations.sort();
    Ok(generations)
}

/// Remove every generation other than the live one. Returns how many were
/// removed. A generation that still cannot be removed after retries is
/// logged and left for the next run.
pub async fn retire_stale_generations(index_dir: &Path) -> Result<usize, IndexError> {
    let current = resolve_current(index_dir)?;
    let mut removed = 0;
    for generation in list_generations(index_dir)? {
        if Some(&generation) == current.as_ref() {
            continue;
        }
        match remove_dir_with_retry(&generation).await {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(path = %generation.display(), error = %e, "could not retire old generation")
            }
        }
    }
    Ok(removed)
}

/// Delete the index. `CURRENT` goes first, so the index is absent the moment
/// this starts; generations are removed after. Returns whether anything was
/// there. Idempotent.
pub async fn reset_index(index_dir: &Path) -> Result<bool, IndexError> {
    let mut existed = false;

    match std::fs::remove_file(index_dir.join(CURRENT_FILE)) {
        Ok(()) => existed = true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let _ = std::fs::remove_file(index_dir.join(CURRENT_TMP_FILE));

    for generation in list_generations(index_dir)? {
        existed = true;
        remove_dir_with_retry(&generation).await?;
    }

    if existed {
        tracing::info!(index_dir = %index_dir.display(), "index reset");
    }
    Ok(existed)
}

async fn remove_dir_with_retry(path: &Path) -> std::io::Result<()> {
    let mut attempt = 1;
    loop {
        match std::fs::remove_dir_all(path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) if attempt < REMOVE_ATTEMPTS => {
                tracing::debug!(path = %path.display(), attempt, error = %e, "removal failed, retrying");
                attempt += 1;
                tokio::time::sleep(REMOVE_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Read handle on one published generation.
///
/// The handle stays valid after a newer generation is published; drop it
/// (or call [`IndexReader::close`]) and open again to see the new one.
pub struct IndexReader {
    generation: PathBuf,
    manifest: Manifest,
    pool: SqlitePool,
}

impl IndexReader {
    pub async fn open(index_dir: &Path) -> Result<Self, IndexError> {
        let generation =
            resolve_current(index_dir)?.ok_or_else(|| IndexError::NotFound(index_dir.to_path_buf()))?;
        let manifest = read_manifest(&generation)?;
        let db_path = generation.join(DB_FILE);
        let pool = db::connect_read_only(&db_path)
            .await
            .map_err(|e| IndexError::Corrupt {
                path: db_path.clone(),
                message: format!("{:#}", e),
            })?;

        tracing::debug!(generation = %manifest.generation, "opened index reader");
        Ok(Self {
            generation,
            manifest,
            pool,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn generation(&self) -> &Path {
        &self.generation
    }

    /// Every stored chunk with its vector, in insertion order.
    pub async fn load_records(&self) -> Result<Vec<EmbeddingRecord>, IndexError> {
        let rows = sqlx::query(
            "SELECT c.rowid AS rowid, c.id, c.source, c.page, c.char_offset, c.chunk_index, \
                    c.text, c.hash, v.embedding \
             FROM chunks c JOIN vectors v ON v.chunk_rowid = c.rowid \
             ORDER BY c.rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.corrupt(e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let page: Option<i64> = row.try_get("page").map_err(|e| self.corrupt(e))?;
            let offset: i64 = row.try_get("char_offset").map_err(|e| self.corrupt(e))?;
            let chunk_index: i64 = row.try_get("chunk_index").map_err(|e| self.corrupt(e))?;
            let blob: Vec<u8> = row.try_get("embedding").map_err(|e| self.corrupt(e))?;
            records.push(EmbeddingRecord {
                chunk: Chunk {
                    id: row.try_get("id").map_err(|e| self.corrupt(e))?,
                    text: row.try_get("text").map_err(|e| self.corrupt(e))?,
                    source: row.try_get("source").map_err(|e| self.corrupt(e))?,
                    page: page.map(|p| p as u32),
                    offset: offset as usize,
                    chunk_index: chunk_index as usize,
                    hash: row.try_get("hash").map_err(|e| self.corrupt(e))?,
                },
                vector: blob_to_vec(&blob),
                persisted_id: row.try_get("rowid").map_err(|e| self.corrupt(e))?,
            });
        }
        Ok(records)
    }

    fn corrupt(&self, e: impl std::fmt::Display) -> IndexError {
        IndexError::Corrupt {
            path: self.generation.join(DB_FILE),
            message: e.to_string(),
        }
    }

    /// Release the database so the generation directory can be removed.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::split;
    use crate::embedding::HashEmbedder;
    use crate::models::SourceDocument;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            8
        }
        async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("service unavailable")
        }
    }

    fn chunks(text: &str) -> Vec<Chunk> {
        let doc = SourceDocument {
            text: text.to_string(),
            source: "facts.txt".to_string(),
            page: None,
        };
        split(&[doc], 1000, 100).unwrap()
    }

    #[tokio::test]
    async fn build_publishes_a_readable_generation() {
        let tmp = TempDir::new().unwrap();
        let index_dir = tmp.path().join("vectorstore");
        let embedder = HashEmbedder::new(64);

        let staged = build(
            &chunks("The capital of France is Paris."),
            &index_dir,
            &embedder,
            &BuildOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(resolve_current(&index_dir).unwrap(), Some(staged.path.clone()));
        let reader = IndexReader::open(&index_dir).await.unwrap();
        assert_eq!(reader.manifest().chunk_count, 1);
        assert_eq!(reader.manifest().dims, 64);
        let records = reader.load_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].chunk.text, "The capital of France is Paris.");
        assert_eq!(records[0].vector.len(), 64);
        reader.close().await;
    }

    #[tokio::test]
    async fn failed_build_leaves_current_untouched() {
        let tmp = TempDir::new().unwrap();
        let index_dir = tmp.path().join("vectorstore");
        let good = build(
            &chunks("first"),
            &index_dir,
            &HashEmbedder::new(16),
            &BuildOptions::default(),
        )
        .await
        .unwrap();

        let err = build(
            &chunks("second"),
            &index_dir,
            &FailingEmbedder,
            &BuildOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IndexError::Rebuild(_)));
        assert_eq!(resolve_current(&index_dir).unwrap(), Some(good.path));
        assert_eq!(list_generations(&index_dir).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn incremental_mode_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let options = BuildOptions {
            mode: BuildMode::Incremental,
            ..BuildOptions::default()
        };
        let err = build(&chunks("x"), tmp.path(), &HashEmbedder::new(8), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Rebuild(_)));
        assert_eq!(resolve_current(tmp.path()).unwrap(), None);
    }

    #[tokio::test]
    async fn retire_keeps_only_current() {
        let tmp = TempDir::new().unwrap();
        let embedder = HashEmbedder::new(8);
        for text in ["one", "two", "three"] {
            build(&chunks(text), tmp.path(), &embedder, &BuildOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(list_generations(tmp.path()).unwrap().len(), 3);
        assert_eq!(retire_stale_generations(tmp.path()).await.unwrap(), 2);
        let remaining = list_generations(tmp.path()).unwrap();
        assert_eq!(Some(remaining[0].clone()), resolve_current(tmp.path()).unwrap());
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        build(&chunks("x"), tmp.path(), &HashEmbedder::new(8), &BuildOptions::default())
            .await
            .unwrap();
        assert!(reset_index(tmp.path()).await.unwrap());
        assert!(!reset_index(tmp.path()).await.unwrap());
        assert!(matches!(
            IndexReader::open(tmp.path()).await,
            Err(IndexError::NotFound(_))
        ));
    }

    #[test]
    fn garbage_current_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CURRENT_FILE), "../../etc").unwrap();
        assert!(matches!(
            resolve_current(tmp.path()),
            Err(IndexError::Corrupt { .. })
        ));
    }

    #[test]
    fn fingerprint_tracks_content() {
        assert_eq!(fingerprint(&chunks("same")), fingerprint(&chunks("same")));
        assert_ne!(fingerprint(&chunks("same")), fingerprint(&chunks("different")));
    }
}
