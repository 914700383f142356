//! Similarity retrieval: the confidence gate.
//!
//! The query is embedded with the same service that built the index, then
//! compared against every stored vector by cosine similarity (brute force;
//! collections here are small enough that a scan beats maintaining an ANN
//! structure). The top `k` matches are kept and any below the score
//! threshold are dropped. An empty result means "no grounding" and sends the
//! orchestrator to fallback.

use anyhow::Result;
use std::sync::Arc;

use crate::embedding::{cosine_similarity, embed_query, Embedder};
use crate::error::IndexError;
use crate::index::IndexReader;
use crate::models::{EmbeddingRecord, RetrievedMatch};

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Matches for `query` in descending score order, at most `k`, none
    /// scoring below `score_threshold`.
    ///
    /// # Errors
    ///
    /// Embedding failures, unreadable index rows, and a query vector whose
    /// dimensionality differs from the index ([`IndexError::Corrupt`]).
    pub async fn retrieve(
        &self,
        reader: &IndexReader,
        query: &str,
        k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedMatch>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        let dims = reader.manifest().dims;
        if query_vec.len() != dims {
            return Err(IndexError::Corrupt {
                path: reader.generation().to_path_buf(),
                message: format!(
                    "query embedding has {} dimensions but the index was built with {} ({}); rebuild the index",
                    query_vec.len(),
                    dims,
                    reader.manifest().model
                ),
            }
            .into());
        }

        let records = reader.load_records().await?;
        let matches = rank(&query_vec, records, k, score_threshold);
        tracing::debug!(
            candidates = reader.manifest().chunk_count,
            kept = matches.len(),
            k,
            score_threshold,
            "retrieval done"
        );
        Ok(matches)
    }
}

/// Score, sort (stable, so equal scores keep index order), truncate to `k`,
/// then apply the threshold.
pub fn rank(
    query_vec: &[f32],
    records: Vec<EmbeddingRecord>,
    k: usize,
    score_threshold: f32,
) -> Vec<RetrievedMatch> {
    let mut scored: Vec<RetrievedMatch> = records
        .into_iter()
        .map(|record| RetrievedMatch {
            score: cosine_similarity(query_vec, &record.vector),
            chunk: record.chunk,
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(k);
    scored.retain(|m| m.score >= score_threshold);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn record(id: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            chunk: Chunk {
                id: id.to_string(),
                text: id.to_string(),
                source: "s".to_string(),
                page: None,
                offset: 0,
                chunk_index: 0,
                hash: String::new(),
            },
            vector,
            persisted_id: 0,
        }
    }

    fn ids(matches: &[RetrievedMatch]) -> Vec<&str> {
        matches.iter().map(|m| m.chunk.id.as_str()).collect()
    }

    fn corpus() -> Vec<EmbeddingRecord> {
        vec![
            record("far", vec![0.0, 1.0]),
            record("near", vec![1.0, 0.1]),
            record("exact", vec![1.0, 0.0]),
            record("middle", vec![1.0, 1.0]),
        ]
    }

    #[test]
    fn sorted_descending_and_truncated() {
        let out = rank(&[1.0, 0.0], corpus(), 2, -1.0);
        assert_eq!(ids(&out), vec!["exact", "near"]);
        assert!(out[0].score >= out[1].score);
    }

    #[test]
    fn threshold_drops_weak_matches() {
        let out = rank(&[1.0, 0.0], corpus(), 10, 0.5);
        assert_eq!(ids(&out), vec!["exact", "near", "middle"]);
        assert!(out.iter().all(|m| m.score >= 0.5));
    }

    #[test]
    fn raising_threshold_never_adds_matches() {
        let mut last = usize::MAX;
        for t in [-1.0, 0.0, 0.3, 0.7, 0.99, 1.0] {
            let n = rank(&[1.0, 0.0], corpus(), 10, t).len();
            assert!(n <= last);
            last = n;
        }
    }

    #[test]
    fn ties_keep_index_order() {
        let records = vec![record("first", vec![1.0, 0.0]), record("second", vec![2.0, 0.0])];
        let out = rank(&[1.0, 0.0], records, 2, 0.0);
        assert_eq!(ids(&out), vec!["first", "second"]);
    }

    #[test]
    fn empty_index_yields_no_matches() {
        assert!(rank(&[1.0, 0.0], Vec::new(), 3, 0.0).is_empty());
    }
}
