//! Core data models used throughout askdocs.
//!
//! These types represent the documents, chunks, matches, and answers that
//! flow through the ingestion and query pipeline, plus the conversation and
//! task records kept by a [`Session`](crate::session::Session).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw text produced by a loader, before chunking.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub text: String,
    /// File path or URL.
    pub source: String,
    /// 1-based page number for paginated sources (PDF).
    pub page: Option<u32>,
}

/// A bounded slice of a document's text; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source: String,
    pub page: Option<u32>,
    /// Char offset of the chunk within its document.
    pub offset: usize,
    /// Position within the document, contiguous from 0.
    pub chunk_index: usize,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// A chunk together with its embedding, as written into an index generation.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    /// Row id inside the generation's database.
    pub persisted_id: i64,
}

/// A chunk returned from a similarity search, with its cosine score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedMatch {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Agent => write!(f, "agent"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Generated from retrieved chunks.
    Rag,
    /// Produced by the general-knowledge fallback service.
    Fallback,
    /// Neither; the answer is an explanation or diagnostic.
    None,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Rag => write!(f, "RAG"),
            Provenance::Fallback => write!(f, "FALLBACK"),
            Provenance::None => write!(f, "NONE"),
        }
    }
}

/// One entry of an answer's source list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub label: String,
    pub page: Option<u32>,
}

impl SourceRef {
    /// Display form: PDFs are shortened to their file name.
    pub fn display(&self) -> String {
        let label = if self.label.to_ascii_lowercase().ends_with(".pdf") {
            std::path::Path::new(&self.label)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| self.label.clone())
        } else {
            self.label.clone()
        };
        match self.page {
            Some(p) => format!("{} (p. {})", label, p),
            None => label,
        }
    }
}

/// The `(answer, sources, provenance)` triple every query ends in.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: u64,
    pub name: String,
    pub params: serde_json::Value,
    pub status: TaskStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_ref_shortens_pdf_paths() {
        let r = SourceRef {
            label: "/data/documents/reports/annual.pdf".to_string(),
            page: Some(3),
        };
        assert_eq!(r.display(), "annual.pdf (p. 3)");

        let url = SourceRef {
            label: "https://example.com/a".to_string(),
            page: None,
        };
        assert_eq!(url.display(), "https://example.com/a");
    }

    #[test]
    fn provenance_serializes_lowercase() {
        let json = serde_json::to_string(&Provenance::Fallback).unwrap();
        assert_eq!(json, "\"fallback\"");
        assert_eq!(Provenance::Rag.to_string(), "RAG");
    }
}
