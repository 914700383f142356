//! One user's question-answering session.
//!
//! A [`Session`] owns everything a conversation needs: the loaded config,
//! runtime tunables, the service clients, the conversation log, the task
//! queue, and a lazily opened [`IndexReader`]. Front ends (CLI, chat loop,
//! HTTP server, folder watcher) hold a session and call its operations;
//! there is no global state.
//!
//! # Lifecycle
//!
//! ```text
//! Session::new ─▶ ingest / query / set_* ... ─▶ reset ─▶ ... ─▶ close
//! ```

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

use crate::answer::{AnswerGenerator, FallbackService, NonAnswerDetector, Summarizer};
use crate::completion::{create_completion, CompletionService};
use crate::config::{validate_k, validate_temperature, validate_threshold, Config};
use crate::connector_web::{build_fetchers, PageFetcher};
use crate::conversation::{Conversation, ConversationSummary};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{IndexError, Stage, StageError};
use crate::fallback::{Grounded, IndexAccess, Orchestrator, QueryParams};
use crate::index::{self, IndexReader, Manifest, StagedGeneration};
use crate::ingest::{stage_from_sources, BuildSummary, IngestReport, LoadedSources};
use crate::models::{ConversationTurn, Provenance, QueryOutcome, Role};
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::search::Retriever;
use crate::tasks::{TaskQueue, TaskStatusSnapshot};

/// Longest question passed on to retrieval, in characters.
pub const MAX_QUESTION_CHARS: usize = 1000;

pub const INVALID_QUESTION: &str = "Please ask a valid question.";

/// External services a session talks to.
pub struct Services {
    pub embedder: Arc<dyn Embedder>,
    pub completion: Arc<dyn CompletionService>,
    pub fetchers: Vec<Box<dyn PageFetcher>>,
}

impl Services {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            embedder: create_embedder(&config.embedding)?,
            completion: create_completion(&config.completion)?,
            fetchers: build_fetchers(&config.web)?,
        })
    }
}

/// Outcome of [`Session::begin_ingest`].
pub enum IngestPlan {
    /// Nothing to build; the report is final.
    Finished(IngestReport),
    /// A new generation must be staged, then handed to
    /// [`Session::finish_ingest`].
    Stage(PendingIngest),
}

/// Handles needed to stage a generation without borrowing the session.
pub struct PendingIngest {
    config: Config,
    embedder: Arc<dyn Embedder>,
    fetchers: Arc<Vec<Box<dyn PageFetcher>>>,
}

impl PendingIngest {
    /// Load, chunk and embed every source into a staged generation. `None`
    /// when there was nothing to ingest.
    pub async fn stage(
        &self,
        progress: &dyn IngestProgressReporter,
    ) -> Result<Option<(StagedGeneration, LoadedSources)>> {
        stage_from_sources(
            &self.config,
            self.embedder.as_ref(),
            &self.fetchers,
            progress,
        )
        .await
    }
}

/// Ingest through a shared session, holding the lock only to begin and to
/// publish. Queries keep being answered from the live index while the new
/// generation is staged.
pub async fn ingest_shared(
    session: &Mutex<Session>,
    force_reload: bool,
    progress: &dyn IngestProgressReporter,
) -> Result<IngestReport> {
    let plan = session.lock().await.begin_ingest(force_reload)?;
    match plan {
        IngestPlan::Finished(report) => Ok(report),
        IngestPlan::Stage(pending) => {
            let staged = pending.stage(progress).await;
            session.lock().await.finish_ingest(staged, progress).await
        }
    }
}

/// Knobs that can change between queries without a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunables {
    pub k: usize,
    pub score_threshold: f32,
    pub temperature: f32,
    pub fallback_enabled: bool,
}

impl Tunables {
    pub fn from_config(config: &Config) -> Self {
        Self {
            k: config.retrieval.k,
            score_threshold: config.retrieval.score_threshold,
            temperature: config.completion.temperature,
            fallback_enabled: config.fallback.enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub index: Option<Manifest>,
    pub tunables: Tunables,
    pub conversation: ConversationSummary,
    pub tasks: TaskStatusSnapshot,
}

pub struct Session {
    config: Config,
    tunables: Tunables,
    embedder: Arc<dyn Embedder>,
    fetchers: Arc<Vec<Box<dyn PageFetcher>>>,
    retriever: Retriever,
    generator: AnswerGenerator,
    fallback: FallbackService,
    summarizer: Option<Summarizer>,
    conversation: Conversation,
    tasks: TaskQueue,
    reader: Option<IndexReader>,
}

impl Session {
    pub fn new(config: Config, services: Services) -> Self {
        let detector = NonAnswerDetector::new(&config.answer.non_answer_phrases);
        let generator = AnswerGenerator::new(
            services.completion.clone(),
            config.completion.chat_model.clone(),
            config.completion.max_tokens,
            detector,
        );
        let fallback = FallbackService::new(
            services.completion.clone(),
            config.completion.fallback_model.clone(),
            config.completion.fallback_temperature,
            config.completion.max_tokens,
        );
        let summarizer = config.answer.summarize.then(|| {
            Summarizer::new(
                services.completion.clone(),
                config.completion.summary_model.clone(),
                config.completion.summary_temperature,
                config.answer.summary_max_tokens,
            )
        });

        Self {
            tunables: Tunables::from_config(&config),
            conversation: Conversation::new(config.conversation.memory_length),
            retriever: Retriever::new(services.embedder.clone()),
            embedder: services.embedder,
            fetchers: Arc::new(services.fetchers),
            generator,
            fallback,
            summarizer,
            tasks: TaskQueue::new(),
            reader: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    // ============ Ingest ============

    /// Build the index from the configured sources.
    ///
    /// Without `force_reload` an existing index is kept as is. The new
    /// generation is written while the current one stays queryable; only
    /// once it is complete is the session's reader released and the new
    /// generation published.
    pub async fn ingest(
        &mut self,
        force_reload: bool,
        progress: &dyn IngestProgressReporter,
    ) -> Result<IngestReport> {
        match self.begin_ingest(force_reload)? {
            IngestPlan::Finished(report) => Ok(report),
            IngestPlan::Stage(pending) => {
                let staged = pending.stage(progress).await;
                self.finish_ingest(staged, progress).await
            }
        }
    }

    /// First phase of an ingest: record the task and decide whether a new
    /// generation has to be built at all.
    pub fn begin_ingest(&mut self, force_reload: bool) -> Result<IngestPlan> {
        self.tasks
            .enqueue("ingest", serde_json::json!({ "force": force_reload }));

        if !force_reload {
            let manifest = index::current_manifest(&self.config.paths.index_dir);
            let manifest = match manifest {
                Ok(manifest) => manifest,
                Err(e) => {
                    self.tasks.complete("ingest");
                    return Err(e.into());
                }
            };
            if let Some(manifest) = manifest {
                tracing::info!(generation = %manifest.generation, "index already present; skipping ingest");
                self.tasks.complete("ingest");
                return Ok(IngestPlan::Finished(IngestReport::AlreadyPresent {
                    generation: manifest.generation,
                    chunks: manifest.chunk_count,
                }));
            }
        }

        Ok(IngestPlan::Stage(PendingIngest {
            config: self.config.clone(),
            embedder: self.embedder.clone(),
            fetchers: self.fetchers.clone(),
        }))
    }

    /// Last phase of an ingest: publish what [`PendingIngest::stage`] built
    /// and retire the generations it replaces.
    pub async fn finish_ingest(
        &mut self,
        staged: Result<Option<(StagedGeneration, LoadedSources)>>,
        progress: &dyn IngestProgressReporter,
    ) -> Result<IngestReport> {
        let result = self.publish_staged(staged, progress).await;
        self.tasks.complete("ingest");
        result
    }

    async fn publish_staged(
        &mut self,
        staged: Result<Option<(StagedGeneration, LoadedSources)>>,
        progress: &dyn IngestProgressReporter,
    ) -> Result<IngestReport> {
        let index_dir = self.config.paths.index_dir.clone();
        let (staged, sources) = match staged? {
            Some(s) => s,
            None => {
                tracing::warn!(
                    documents_dir = %self.config.paths.documents_dir.display(),
                    "no documents or URLs to ingest"
                );
                return Ok(IngestReport::NoSources);
            }
        };

        progress.report(IngestProgressEvent::Swapping);
        self.release_reader().await;
        index::publish(&index_dir, &staged)?;
        let retired = index::retire_stale_generations(&index_dir).await?;

        Ok(IngestReport::Built(BuildSummary {
            generation: staged.name,
            documents: sources.documents.len(),
            chunks: staged.manifest.chunk_count,
            files_skipped: sources.files_skipped,
            urls_skipped: sources.urls_skipped,
            generations_retired: retired,
            fingerprint: staged.manifest.fingerprint,
        }))
    }

    async fn release_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.close().await;
        }
    }

    /// Make sure the cached reader is on the live generation. Returns the
    /// open error when there is no usable index.
    async fn refresh_reader(&mut self) -> Option<IndexError> {
        let index_dir = self.config.paths.index_dir.clone();
        let current = match index::resolve_current(&index_dir) {
            Ok(current) => current,
            Err(e) => return Some(e),
        };

        let stale = match (&self.reader, &current) {
            (Some(reader), Some(live)) => reader.generation() != live.as_path(),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if stale {
            self.release_reader().await;
        }
        if self.reader.is_some() {
            return None;
        }

        match IndexReader::open(&index_dir).await {
            Ok(reader) => {
                self.reader = Some(reader);
                None
            }
            Err(e) => Some(e),
        }
    }

    // ============ Query ============

    /// Answer a question. Never fails: every delegate error ends up as a
    /// diagnostic answer with provenance `None`.
    pub async fn query(&mut self, question: &str) -> QueryOutcome {
        let question = sanitize_question(question);
        if question.is_empty() {
            return QueryOutcome {
                answer: INVALID_QUESTION.to_string(),
                sources: Vec::new(),
                provenance: Provenance::None,
            };
        }

        self.tasks
            .enqueue("query", serde_json::json!({ "question": question }));
        let open_error = self.refresh_reader().await;

        let params = QueryParams {
            k: self.tunables.k,
            score_threshold: self.tunables.score_threshold,
            temperature: self.tunables.temperature,
        };
        let orchestrator = Orchestrator {
            retriever: &self.retriever,
            generator: &self.generator,
            fallback: &self.fallback,
        };
        let missing;
        let index_access = match (&self.reader, &open_error) {
            (Some(reader), _) => IndexAccess::Ready(reader),
            (None, Some(e)) => IndexAccess::Unavailable(e),
            (None, None) => {
                missing = IndexError::NotFound(self.config.paths.index_dir.clone());
                IndexAccess::Unavailable(&missing)
            }
        };

        let grounded = orchestrator
            .resolve_grounded(
                index_access,
                &question,
                self.conversation.recent_window(),
                &params,
            )
            .await;
        self.tasks.complete("query");

        let mut outcome = match grounded {
            Grounded::Done(outcome) => outcome,
            Grounded::NeedFallback(reason) => {
                self.tasks.enqueue(
                    "fallback",
                    serde_json::json!({ "question": question, "reason": format!("{:?}", reason) }),
                );
                let outcome = orchestrator
                    .resolve_fallback(&question, &reason, self.tunables.fallback_enabled)
                    .await;
                self.tasks.complete("fallback");
                outcome
            }
        };

        if let Some(summarizer) = &self.summarizer {
            if outcome.provenance != Provenance::None {
                match summarizer.summarize(&outcome.answer).await {
                    Ok(summary) if !summary.is_empty() => outcome.answer = summary,
                    Ok(_) => {}
                    Err(e) => {
                        let err = StageError::new(Stage::Summary, format!("{:#}", e));
                        tracing::warn!(error = %err, "keeping unsummarized answer");
                    }
                }
            }
        }

        tracing::info!(provenance = %outcome.provenance, sources = outcome.sources.len(), "query answered");
        self.conversation.add(Role::User, question);
        self.conversation.add(Role::Agent, outcome.answer.clone());
        outcome
    }

    // ============ Resets ============

    /// Delete the index. Returns whether one existed.
    pub async fn reset_index(&mut self) -> Result<bool> {
        self.release_reader().await;
        Ok(index::reset_index(&self.config.paths.index_dir).await?)
    }

    pub fn reset_conversation(&mut self) {
        self.conversation.reset();
    }

    /// Clear conversation and task state. The index is kept.
    pub fn reset(&mut self) {
        self.conversation.reset();
        self.tasks.reset();
    }

    // ============ Tunables ============

    pub fn set_k(&mut self, k: usize) -> Result<()> {
        validate_k(k)?;
        self.tunables.k = k;
        Ok(())
    }

    pub fn set_score_threshold(&mut self, threshold: f32) -> Result<()> {
        validate_threshold(threshold)?;
        self.tunables.score_threshold = threshold;
        Ok(())
    }

    pub fn set_temperature(&mut self, temperature: f32) -> Result<()> {
        validate_temperature(temperature)?;
        self.tunables.temperature = temperature;
        Ok(())
    }

    pub fn set_fallback_enabled(&mut self, enabled: bool) {
        self.tunables.fallback_enabled = enabled;
    }

    /// Apply a full set of tunables, validating all of them first.
    pub fn apply_tunables(&mut self, tunables: Tunables) -> Result<()> {
        validate_k(tunables.k)?;
        validate_threshold(tunables.score_threshold)?;
        validate_temperature(tunables.temperature)?;
        self.tunables = tunables;
        Ok(())
    }

    // ============ Introspection ============

    pub fn history(&self) -> &[ConversationTurn] {
        self.conversation.turns()
    }

    pub fn conversation_summary(&self) -> ConversationSummary {
        self.conversation.summary()
    }

    pub fn tasks(&self) -> TaskStatusSnapshot {
        self.tasks.status()
    }

    pub fn plan(&self, question: &str) -> Vec<String> {
        TaskQueue::plan(question)
    }

    pub fn status(&self) -> Result<SessionStatus> {
        Ok(SessionStatus {
            index: index::current_manifest(&self.config.paths.index_dir)?,
            tunables: self.tunables.clone(),
            conversation: self.conversation.summary(),
            tasks: self.tasks.status(),
        })
    }

    /// Release the index reader.
    pub async fn close(mut self) {
        self.release_reader().await;
    }
}

fn script_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script.*?</script>").expect("valid regex"))
}

fn javascript_scheme() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)javascript:").expect("valid regex"))
}

/// Collapse whitespace, strip script blocks and `javascript:` schemes, and
/// cap the length at [`MAX_QUESTION_CHARS`].
pub fn sanitize_question(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let without_scripts = script_block().replace_all(&collapsed, "");
    let cleaned = javascript_scheme().replace_all(&without_scripts, "");

    let mut text: String = cleaned.trim().to_string();
    if text.chars().count() > MAX_QUESTION_CHARS {
        text = text.chars().take(MAX_QUESTION_CHARS).collect();
        tracing::warn!("question truncated to {} characters", MAX_QUESTION_CHARS);
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_and_strips() {
        assert_eq!(sanitize_question("  What   is\n\tthis? "), "What is this?");
        assert_eq!(
            sanitize_question("Hi <SCRIPT>alert(1)</script> there"),
            "Hi  there"
        );
        assert_eq!(sanitize_question("click JavaScript:void(0)"), "click void(0)");
    }

    #[test]
    fn sanitize_truncates_by_chars() {
        let long = "é".repeat(1500);
        assert_eq!(sanitize_question(&long).chars().count(), MAX_QUESTION_CHARS);
    }

    #[test]
    fn sanitize_can_empty_a_question() {
        assert!(sanitize_question("   ").is_empty());
        assert!(sanitize_question("<script>x</script>").is_empty());
    }
}
