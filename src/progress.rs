//! Ingestion progress reporting.
//!
//! Reports what an ingest run is doing (loading sources, chunking,
//! embedding n of total, swapping the new index in) so a user watching a
//! large rebuild sees how much is left. Progress is emitted on **stderr**
//! so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for an ingest run.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestProgressEvent {
    /// Loaders are reading files and URLs. Total unknown.
    Loading,
    /// Documents are being split.
    Chunking { documents: u64 },
    /// `n` of `total` chunks embedded into the new generation.
    Embedding { n: u64, total: u64 },
    /// The new generation is being published and old ones retired.
    Swapping,
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Loading => "ingest  loading sources...\n".to_string(),
            IngestProgressEvent::Chunking { documents } => {
                format!("ingest  chunking  {} documents\n", format_number(*documents))
            }
            IngestProgressEvent::Embedding { n, total } => format!(
                "ingest  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            IngestProgressEvent::Swapping => "ingest  swapping in new index\n".to_string(),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Loading => serde_json::json!({
                "event": "progress",
                "phase": "loading"
            }),
            IngestProgressEvent::Chunking { documents } => serde_json::json!({
                "event": "progress",
                "phase": "chunking",
                "documents": documents
            }),
            IngestProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Swapping => serde_json::json!({
                "event": "progress",
                "phase": "swapping"
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
