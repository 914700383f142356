//! Per-query state machine: grounded answer, general-knowledge fallback,
//! or an explanation.
//!
//! ```text
//! Retrieve ──matches──▶ Generate ──answer──▶ Done(Rag)
//!    │                     │  └──error───▶ Done(None, "[generation error] ...")
//!    │ empty / missing     │ no answer
//!    │ index / error       ▼
//!    └──────────────▶ NeedFallback ──enabled──▶ Done(Fallback) or Done(None, "[fallback error] ...")
//!                          └──────disabled──▶ Done(None, explanation)
//! ```
//!
//! No delegate failure escapes: every path ends in a [`QueryOutcome`] with
//! a non-empty answer. The two halves are exposed separately
//! ([`Orchestrator::resolve_grounded`], [`Orchestrator::resolve_fallback`])
//! so the session can track the fallback as its own task.

use crate::answer::{AnswerGenerator, FallbackService, Generated};
use crate::error::{IndexError, Stage, StageError};
use crate::index::IndexReader;
use crate::models::{ConversationTurn, Provenance, QueryOutcome, RetrievedMatch, SourceRef};
use crate::search::Retriever;

/// Substituted for an answer that came back empty.
pub const EMPTY_ANSWER: &str = "[no answer] the answering service returned an empty response";

/// Why the grounded half did not produce an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    /// No index has been built yet.
    IndexMissing,
    /// Nothing scored above the threshold.
    NoMatches,
    /// Matches were found but the model declined to answer from them.
    NotAnswered,
    /// Retrieval failed; the diagnostic is kept for the explanation.
    RetrievalFailed(String),
}

/// What the retriever has to work with.
pub enum IndexAccess<'a> {
    Ready(&'a IndexReader),
    Unavailable(&'a IndexError),
}

#[derive(Debug, Clone)]
pub struct QueryParams {
    pub k: usize,
    pub score_threshold: f32,
    pub temperature: f32,
}

/// Outcome of the grounded half.
#[derive(Debug, Clone)]
pub enum Grounded {
    Done(QueryOutcome),
    NeedFallback(MissReason),
}

enum State {
    Retrieve,
    Generate(Vec<RetrievedMatch>),
    NeedFallback(MissReason),
    Done(QueryOutcome),
}

pub struct Orchestrator<'a> {
    pub retriever: &'a Retriever,
    pub generator: &'a AnswerGenerator,
    pub fallback: &'a FallbackService,
}

impl Orchestrator<'_> {
    /// Run both halves.
    pub async fn answer(
        &self,
        index: IndexAccess<'_>,
        question: &str,
        history: &[ConversationTurn],
        params: &QueryParams,
        fallback_enabled: bool,
    ) -> QueryOutcome {
        match self.resolve_grounded(index, question, history, params).await {
            Grounded::Done(outcome) => outcome,
            Grounded::NeedFallback(reason) => {
                self.resolve_fallback(question, &reason, fallback_enabled)
                    .await
            }
        }
    }

    /// Retrieve and generate. Stops at `NeedFallback` or `Done`.
    pub async fn resolve_grounded(
        &self,
        index: IndexAccess<'_>,
        question: &str,
        history: &[ConversationTurn],
        params: &QueryParams,
    ) -> Grounded {
        let mut state = State::Retrieve;
        loop {
            state = match state {
                State::Retrieve => self.retrieve(&index, question, params).await,
                State::Generate(matches) => {
                    self.generate(question, matches, history, params.temperature)
                        .await
                }
                State::NeedFallback(reason) => return Grounded::NeedFallback(reason),
                State::Done(outcome) => return Grounded::Done(finish(outcome)),
            };
        }
    }

    async fn retrieve(&self, index: &IndexAccess<'_>, question: &str, params: &QueryParams) -> State {
        let reader = match index {
            IndexAccess::Ready(reader) => *reader,
            IndexAccess::Unavailable(IndexError::NotFound(path)) => {
                tracing::info!(index_dir = %path.display(), "no index; skipping retrieval");
                return State::NeedFallback(MissReason::IndexMissing);
            }
            IndexAccess::Unavailable(e) => {
                let err = StageError::new(Stage::Retrieval, e);
                tracing::warn!(error = %err, "index unavailable");
                return State::NeedFallback(MissReason::RetrievalFailed(err.diagnostic()));
            }
        };

        match self
            .retriever
            .retrieve(reader, question, params.k, params.score_threshold)
            .await
        {
            Ok(matches) if matches.is_empty() => State::NeedFallback(MissReason::NoMatches),
            Ok(matches) => State::Generate(matches),
            Err(e) => {
                let err = StageError::new(Stage::Retrieval, format!("{:#}", e));
                tracing::warn!(error = %err, "retrieval failed");
                State::NeedFallback(MissReason::RetrievalFailed(err.diagnostic()))
            }
        }
    }

    async fn generate(
        &self,
        question: &str,
        matches: Vec<RetrievedMatch>,
        history: &[ConversationTurn],
        temperature: f32,
    ) -> State {
        match self
            .generator
            .generate(question, &matches, history, temperature)
            .await
        {
            Ok(Generated::Answer(text)) => State::Done(QueryOutcome {
                answer: text,
                sources: distinct_sources(&matches),
                provenance: Provenance::Rag,
            }),
            Ok(Generated::NoAnswer) => State::NeedFallback(MissReason::NotAnswered),
            Err(e) => {
                let err = StageError::new(Stage::Generation, format!("{:#}", e));
                tracing::warn!(error = %err, "generation failed");
                State::Done(diagnostic(err.diagnostic()))
            }
        }
    }

    /// Resolve a miss: ask the general-knowledge service when enabled,
    /// otherwise explain why there is no answer.
    pub async fn resolve_fallback(
        &self,
        question: &str,
        reason: &MissReason,
        enabled: bool,
    ) -> QueryOutcome {
        if !enabled {
            return finish(diagnostic(explain_disabled(reason)));
        }

        let outcome = match self.fallback.answer(question).await {
            Ok(text) if text.trim().is_empty() => diagnostic(EMPTY_ANSWER.to_string()),
            Ok(text) => QueryOutcome {
                answer: text,
                sources: vec![SourceRef {
                    label: format!("general knowledge ({})", self.fallback.model_name()),
                    page: None,
                }],
                provenance: Provenance::Fallback,
            },
            Err(e) => {
                let err = StageError::new(Stage::Fallback, format!("{:#}", e));
                tracing::warn!(error = %err, "fallback failed");
                diagnostic(err.diagnostic())
            }
        };
        finish(outcome)
    }
}

/// Distinct `(source, page)` pairs in rank order.
pub fn distinct_sources(matches: &[RetrievedMatch]) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = Vec::new();
    for m in matches {
        let candidate = SourceRef {
            label: m.chunk.source.clone(),
            page: m.chunk.page,
        };
        if !sources.contains(&candidate) {
            sources.push(candidate);
        }
    }
    sources
}

fn explain_disabled(reason: &MissReason) -> String {
    let why = match reason {
        MissReason::IndexMissing => {
            "No documents have been indexed yet; run ingestion first.".to_string()
        }
        MissReason::NoMatches => {
            "I couldn't find anything in your documents that matches this question.".to_string()
        }
        MissReason::NotAnswered => {
            "Your documents don't contain an answer to this question.".to_string()
        }
        MissReason::RetrievalFailed(diag) => format!("Searching your documents failed: {}", diag),
    };
    format!(
        "{} General-knowledge fallback is disabled, so no answer is available.",
        why
    )
}

fn diagnostic(message: String) -> QueryOutcome {
    QueryOutcome {
        answer: message,
        sources: Vec::new(),
        provenance: Provenance::None,
    }
}

fn finish(outcome: QueryOutcome) -> QueryOutcome {
    if outcome.answer.trim().is_empty() {
        return diagnostic(EMPTY_ANSWER.to_string());
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn m(source: &str, page: Option<u32>) -> RetrievedMatch {
        RetrievedMatch {
            chunk: Chunk {
                id: String::new(),
                text: String::new(),
                source: source.to_string(),
                page,
                offset: 0,
                chunk_index: 0,
                hash: String::new(),
            },
            score: 1.0,
        }
    }

    #[test]
    fn sources_are_distinct_in_rank_order() {
        let matches = vec![m("b.pdf", Some(2)), m("a.txt", None), m("b.pdf", Some(2)), m("b.pdf", Some(3))];
        let labels: Vec<String> = distinct_sources(&matches).iter().map(|s| s.display()).collect();
        assert_eq!(labels, vec!["b.pdf (p. 2)", "a.txt", "b.pdf (p. 3)"]);
    }

    #[test]
    fn disabled_explanation_mentions_ingestion_when_index_missing() {
        let text = explain_disabled(&MissReason::IndexMissing);
        assert!(text.contains("run ingestion first"));
        assert!(text.contains("fallback is disabled"));
        assert!(!explain_disabled(&MissReason::NoMatches).contains("ingestion"));
    }

    #[test]
    fn empty_outcomes_become_diagnostics() {
        let out = finish(QueryOutcome {
            answer: "  ".to_string(),
            sources: Vec::new(),
            provenance: Provenance::Rag,
        });
        assert_eq!(out.answer, EMPTY_ANSWER);
        assert_eq!(out.provenance, Provenance::None);
    }
}
