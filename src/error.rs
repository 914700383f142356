//! Typed errors for the pipeline stages.
//!
//! Plumbing uses `anyhow`; these types exist where a caller has to tell
//! failures apart (the orchestrator routes on [`IndexError::NotFound`], the
//! loaders count [`SourceLoadError`]s, and every delegate failure is reported
//! as a [`StageError`] tagged with the stage that failed).

use std::path::PathBuf;
use thiserror::Error;

/// A single file or URL could not be loaded. The item is skipped.
#[derive(Debug, Error)]
pub enum SourceLoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to extract text from {path}: {message}")]
    Extract { path: PathBuf, message: String },
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no index found at {0}; run ingestion first")]
    NotFound(PathBuf),
    #[error("index rebuild failed: {0}")]
    Rebuild(String),
    #[error("index at {path} is unusable: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pipeline stage names used to tag diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Retrieval,
    Generation,
    Fallback,
    Summary,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Retrieval => "retrieval",
            Stage::Generation => "generation",
            Stage::Fallback => "fallback",
            Stage::Summary => "summary",
        };
        f.write_str(name)
    }
}

/// A delegate call failed during a query.
#[derive(Debug, Error)]
#[error("[{stage} error] {message}")]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, err: impl std::fmt::Display) -> Self {
        Self {
            stage,
            message: err.to_string(),
        }
    }

    /// The diagnostic shown to the user in place of an answer.
    pub fn diagnostic(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_is_tagged() {
        let e = StageError::new(Stage::Generation, "upstream timed out");
        assert_eq!(e.diagnostic(), "[generation error] upstream timed out");
    }

    #[test]
    fn not_found_is_actionable() {
        let e = IndexError::NotFound(PathBuf::from("/srv/vectorstore"));
        assert!(e.to_string().contains("run ingestion first"));
    }
}
