//! TOML configuration parsing and validation.
//!
//! Everything is read from a single file (default `./config/askdocs.toml`).
//! The retrieval knobs can be overridden from the environment so a front end
//! can be tuned without editing the file; all of them stay changeable at
//! runtime through [`Session`](crate::session::Session) as well.
//!
//! Validation happens once, at load. A config that fails validation (or is
//! missing credentials, see [`Config::check_credentials`]) stops the process
//! before any conversation begins.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::answer::default_non_answer_phrases;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub documents_dir: PathBuf,
    /// Line-delimited URL list. Defaults to `<documents_dir>/urls.txt`.
    #[serde(default)]
    pub urls_file: Option<PathBuf>,
    /// Canonical index location.
    pub index_dir: PathBuf,
}

impl PathsConfig {
    pub fn urls_file(&self) -> PathBuf {
        self.urls_file
            .clone()
            .unwrap_or_else(|| self.documents_dir.join("urls.txt"))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            score_threshold: default_score_threshold(),
        }
    }
}

fn default_k() -> usize {
    3
}
fn default_score_threshold() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_model")]
    pub chat_model: String,
    #[serde(default = "default_model")]
    pub fallback_model: String,
    #[serde(default = "default_model")]
    pub summary_model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub fallback_temperature: f32,
    #[serde(default)]
    pub summary_temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            url: None,
            chat_model: default_model(),
            fallback_model: default_model(),
            summary_model: default_model(),
            temperature: 0.0,
            fallback_temperature: 0.0,
            summary_temperature: 0.0,
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

fn default_completion_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4".to_string()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_completion_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    #[serde(default = "default_non_answer_phrases")]
    pub non_answer_phrases: Vec<String>,
    #[serde(default)]
    pub summarize: bool,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            non_answer_phrases: default_non_answer_phrases(),
            summarize: false,
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

fn default_summary_max_tokens() -> u32 {
    300
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FallbackConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    /// Number of previous exchanges included in the generation prompt.
    #[serde(default = "default_memory_length")]
    pub memory_length: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            memory_length: default_memory_length(),
        }
    }
}

fn default_memory_length() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    /// DOM-rendering service used as the primary URL fetch tier. The URL to
    /// load is POSTed as `{"url": "..."}` and the rendered HTML is expected
    /// back. When unset, only plain HTTP fetching is used.
    #[serde(default)]
    pub render_endpoint: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_web_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            render_endpoint: None,
            user_agent: default_user_agent(),
            timeout_secs: default_web_timeout_secs(),
        }
    }
}

fn default_user_agent() -> String {
    format!("askdocs/{}", env!("CARGO_PKG_VERSION"))
}
fn default_web_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl EmbeddingConfig {
    pub fn needs_api_key(&self) -> bool {
        self.provider == "openai"
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn needs_api_key(&self) -> bool {
        self.provider == "openai"
    }
}

impl Config {
    /// A config rooted at `root` with the offline `hash` embedder and no
    /// completion provider. Used by tests and as a scaffold for new setups.
    pub fn minimal(root: &Path) -> Self {
        Self {
            paths: PathsConfig {
                documents_dir: root.join("documents"),
                urls_file: None,
                index_dir: root.join("vectorstore"),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig {
                provider: "hash".to_string(),
                dims: Some(512),
                ..EmbeddingConfig::default()
            },
            completion: CompletionConfig {
                provider: "disabled".to_string(),
                ..CompletionConfig::default()
            },
            answer: AnswerConfig::default(),
            fallback: FallbackConfig::default(),
            conversation: ConversationConfig::default(),
            web: WebConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Fails when a configured provider needs `OPENAI_API_KEY` and it is not
    /// set. Called at startup by every command that talks to a service.
    pub fn check_credentials(&self) -> Result<()> {
        let needs_key = self.embedding.needs_api_key() || self.completion.needs_api_key();
        if needs_key && std::env::var("OPENAI_API_KEY").map(|k| k.trim().is_empty()).unwrap_or(true) {
            bail!(
                "OPENAI_API_KEY environment variable not set (required by the openai provider)"
            );
        }
        Ok(())
    }

    /// Apply `ASKDOCS_*` environment overrides for the runtime knobs.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("ASKDOCS_RETRIEVER_K") {
            self.retrieval.k = v
                .trim()
                .parse()
                .with_context(|| format!("ASKDOCS_RETRIEVER_K is not an integer: {}", v))?;
        }
        if let Ok(v) = std::env::var("ASKDOCS_SIMILARITY_THRESHOLD") {
            self.retrieval.score_threshold = v
                .trim()
                .parse()
                .with_context(|| format!("ASKDOCS_SIMILARITY_THRESHOLD is not a number: {}", v))?;
        }
        if let Ok(v) = std::env::var("ASKDOCS_FALLBACK") {
            self.fallback.enabled = matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be less than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        validate_k(self.retrieval.k)?;
        validate_threshold(self.retrieval.score_threshold)?;

        for (name, t) in [
            ("completion.temperature", self.completion.temperature),
            ("completion.fallback_temperature", self.completion.fallback_temperature),
            ("completion.summary_temperature", self.completion.summary_temperature),
        ] {
            if !(0.0..=2.0).contains(&t) {
                bail!("{} must be in [0.0, 2.0]", name);
            }
        }

        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        match self.embedding.provider.as_str() {
            "openai" | "ollama" => {
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                    bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            "hash" => {
                if self.embedding.dims == Some(0) {
                    bail!("embedding.dims must be > 0");
                }
            }
            "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be openai, ollama, hash, or local.",
                other
            ),
        }

        match self.completion.provider.as_str() {
            "openai" | "ollama" | "disabled" => {}
            other => bail!(
                "Unknown completion provider: '{}'. Must be openai, ollama, or disabled.",
                other
            ),
        }

        Ok(())
    }
}

pub fn validate_k(k: usize) -> Result<()> {
    if k < 1 {
        bail!("retrieval.k must be >= 1");
    }
    Ok(())
}

pub fn validate_threshold(threshold: f32) -> Result<()> {
    if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
        bail!("retrieval.score_threshold must be in [-1.0, 1.0]");
    }
    Ok(())
}

pub fn validate_temperature(t: f32) -> Result<()> {
    if !(0.0..=2.0).contains(&t) {
        bail!("temperature must be in [0.0, 2.0]");
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.apply_env_overrides()?;
    config.validate()?;

    Ok(config)
}
