//! Grounded answer generation and the services built on completions.
//!
//! [`AnswerGenerator`] turns retrieved chunks plus a question into a
//! grounded answer. Its output passes through a [`NonAnswerDetector`]: a
//! model that politely declines ("the provided context does not include...")
//! has not answered, and the orchestrator must treat that as a retrieval
//! miss. The phrase list is configuration (`[answer] non_answer_phrases`);
//! it is a heuristic and will never catch every paraphrase.
//!
//! [`FallbackService`] answers from general knowledge and [`Summarizer`]
//! condenses an answer. Both are thin wrappers over a
//! [`CompletionService`].

use anyhow::Result;
use std::sync::Arc;

use crate::completion::{ChatMessage, CompletionRequest, CompletionService};
use crate::models::{ConversationTurn, RetrievedMatch, Role, SourceRef};

pub fn default_non_answer_phrases() -> Vec<String> {
    [
        "i'm sorry, but the provided context",
        "the text does not provide information",
        "the provided context does not include",
        "the context does not contain",
        "no relevant documents found",
        "no relevant context was found",
        "i don't have enough information",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Case-insensitive substring matcher over a fixed phrase list.
#[derive(Debug, Clone)]
pub struct NonAnswerDetector {
    phrases: Vec<String>,
}

impl NonAnswerDetector {
    pub fn new(phrases: &[String]) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_non_answer(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.phrases.iter().any(|p| lower.contains(p.as_str()))
    }
}

impl Default for NonAnswerDetector {
    fn default() -> Self {
        Self::new(&default_non_answer_phrases())
    }
}

/// Result of one grounded generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generated {
    Answer(String),
    /// The model produced no text or declined for lack of context.
    NoAnswer,
}

const GROUNDED_SYSTEM_PROMPT: &str = "You answer questions using the numbered document \
excerpts provided. Base your answer on those excerpts and use the conversation history \
only to understand what the question refers to. If the excerpts do not contain the \
answer, say that the provided context does not include the information.";

pub struct AnswerGenerator {
    service: Arc<dyn CompletionService>,
    model: String,
    max_tokens: u32,
    detector: NonAnswerDetector,
}

impl AnswerGenerator {
    pub fn new(
        service: Arc<dyn CompletionService>,
        model: impl Into<String>,
        max_tokens: u32,
        detector: NonAnswerDetector,
    ) -> Self {
        Self {
            service,
            model: model.into(),
            max_tokens,
            detector,
        }
    }

    pub async fn generate(
        &self,
        query: &str,
        matches: &[RetrievedMatch],
        history: &[ConversationTurn],
        temperature: f32,
    ) -> Result<Generated> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(GROUNDED_SYSTEM_PROMPT),
                ChatMessage::user(build_prompt(query, matches, history)),
            ],
            temperature,
            max_tokens: Some(self.max_tokens),
        };

        let completion = self.service.complete(request).await?;
        if !completion.usable {
            tracing::warn!("grounded completion carried no usable text");
            return Ok(Generated::NoAnswer);
        }
        let text = completion.text.trim();
        if text.is_empty() {
            return Ok(Generated::NoAnswer);
        }
        if self.detector.is_non_answer(text) {
            tracing::info!("generation declined for lack of context");
            return Ok(Generated::NoAnswer);
        }
        Ok(Generated::Answer(text.to_string()))
    }
}

/// Lay out history and context the way the grounded prompt expects.
pub fn build_prompt(query: &str, matches: &[RetrievedMatch], history: &[ConversationTurn]) -> String {
    let mut prompt = String::new();

    if !history.is_empty() {
        prompt.push_str("Conversation history:\n");
        for turn in history {
            let speaker = match turn.role {
                Role::User => "User",
                Role::Agent => "Assistant",
            };
            prompt.push_str(&format!("{}: {}\n", speaker, turn.message));
        }
        prompt.push('\n');
    }

    prompt.push_str("Context from documents:\n");
    for (i, m) in matches.iter().enumerate() {
        let source = SourceRef {
            label: m.chunk.source.clone(),
            page: m.chunk.page,
        };
        prompt.push_str(&format!("[{}] ({})\n{}\n\n", i + 1, source.display(), m.chunk.text));
    }

    prompt.push_str(&format!("Question: {}\n\nAnswer:", query));
    prompt
}

const FALLBACK_SYSTEM_PROMPT: &str = "You are a knowledgeable assistant. The user's question \
could not be answered from their documents, so answer using your own knowledge. Be concise \
and clear.";

/// General-knowledge answers for questions the documents cannot ground.
pub struct FallbackService {
    service: Arc<dyn CompletionService>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl FallbackService {
    pub fn new(
        service: Arc<dyn CompletionService>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            service,
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub async fn answer(&self, question: &str) -> Result<String> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(FALLBACK_SYSTEM_PROMPT),
                ChatMessage::user(question),
            ],
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
        };
        let completion = self.service.complete(request).await?;
        Ok(completion.text.trim().to_string())
    }
}

pub struct Summarizer {
    service: Arc<dyn CompletionService>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl Summarizer {
    pub fn new(
        service: Arc<dyn CompletionService>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            service,
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    pub async fn summarize(&self, text: &str) -> Result<String> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system("You are an expert summarizer."),
                ChatMessage::user(format!(
                    "Summarize the following text briefly and clearly:\n\n{}",
                    text
                )),
            ],
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
        };
        let completion = self.service.complete(request).await?;
        Ok(completion.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Completion;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns a fixed reply and records the last request.
    struct Canned {
        reply: String,
        last: Mutex<Option<CompletionRequest>>,
    }

    impl Canned {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                last: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl CompletionService for Canned {
        async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
            *self.last.lock().unwrap() = Some(request);
            Ok(Completion::text(self.reply.clone()))
        }
    }

    fn matched(text: &str, source: &str, page: Option<u32>) -> RetrievedMatch {
        RetrievedMatch {
            chunk: Chunk {
                id: "c".to_string(),
                text: text.to_string(),
                source: source.to_string(),
                page,
                offset: 0,
                chunk_index: 0,
                hash: String::new(),
            },
            score: 0.9,
        }
    }

    #[test]
    fn detector_is_case_insensitive_substring() {
        let d = NonAnswerDetector::default();
        assert!(d.is_non_answer(
            "The provided context does not include information about volcanoes."
        ));
        assert!(d.is_non_answer("Sorry. I DON'T HAVE ENOUGH INFORMATION to say."));
        assert!(!d.is_non_answer("The capital of France is Paris."));
    }

    #[test]
    fn detector_uses_configured_phrases() {
        let d = NonAnswerDetector::new(&["no idea".to_string(), "  ".to_string()]);
        assert!(d.is_non_answer("No idea, honestly."));
        assert!(!d.is_non_answer("The context does not contain it."));
    }

    #[tokio::test]
    async fn refusal_is_reported_as_no_answer() {
        let service = Canned::new("The provided context does not include information about X.");
        let generator =
            AnswerGenerator::new(service, "gpt-4", 100, NonAnswerDetector::default());
        let out = generator
            .generate("What is X?", &[matched("unrelated", "a.txt", None)], &[], 0.0)
            .await
            .unwrap();
        assert_eq!(out, Generated::NoAnswer);
    }

    #[tokio::test]
    async fn blank_completion_is_no_answer() {
        let generator =
            AnswerGenerator::new(Canned::new("  \n"), "gpt-4", 100, NonAnswerDetector::default());
        let out = generator.generate("q", &[], &[], 0.0).await.unwrap();
        assert_eq!(out, Generated::NoAnswer);
    }

    struct Textless;

    #[async_trait]
    impl CompletionService for Textless {
        async fn complete(&self, _request: CompletionRequest) -> Result<Completion> {
            Ok(crate::completion::normalize_completion(&serde_json::Value::Null))
        }
    }

    #[tokio::test]
    async fn textless_completion_is_no_answer() {
        let generator =
            AnswerGenerator::new(Arc::new(Textless), "gpt-4", 100, NonAnswerDetector::default());
        let out = generator
            .generate("q", &[matched("Paris.", "a.txt", None)], &[], 0.0)
            .await
            .unwrap();
        assert_eq!(out, Generated::NoAnswer);
    }

    #[tokio::test]
    async fn prompt_carries_context_and_temperature() {
        let service = Canned::new("Paris.");
        let generator = AnswerGenerator::new(
            service.clone(),
            "gpt-4",
            100,
            NonAnswerDetector::default(),
        );
        let out = generator
            .generate(
                "What is the capital of France?",
                &[matched("The capital of France is Paris.", "/d/facts.pdf", Some(2))],
                &[],
                0.7,
            )
            .await
            .unwrap();
        assert_eq!(out, Generated::Answer("Paris.".to_string()));

        let request = service.last.lock().unwrap().clone().unwrap();
        assert!((request.temperature - 0.7).abs() < f32::EPSILON);
        let user = &request.messages[1].content;
        assert!(user.contains("[1] (facts.pdf (p. 2))"));
        assert!(user.contains("The capital of France is Paris."));
        assert!(user.ends_with("Answer:"));
    }

    #[test]
    fn prompt_includes_history_when_present() {
        let history = vec![ConversationTurn {
            role: Role::User,
            message: "Tell me about France".to_string(),
            timestamp: chrono::Utc::now(),
        }];
        let prompt = build_prompt("And its capital?", &[], &history);
        assert!(prompt.starts_with("Conversation history:\nUser: Tell me about France"));
    }

    #[tokio::test]
    async fn fallback_uses_its_own_model() {
        let service = Canned::new(" 42 ");
        let fallback = FallbackService::new(service.clone(), "gpt-4o", 0.0, 200);
        assert_eq!(fallback.answer("meaning of life?").await.unwrap(), "42");
        let request = service.last.lock().unwrap().clone().unwrap();
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.max_tokens, Some(200));
    }
}
