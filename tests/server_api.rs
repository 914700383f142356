//! HTTP API tests against a live router on an ephemeral port.

use anyhow::Result;
use askdocs::completion::DisabledCompletion;
use askdocs::config::Config;
use askdocs::embedding::{Embedder, HashEmbedder};
use askdocs::server::router;
use askdocs::session::{Services, Session};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Mutex, Notify};

/// Hash embedder that, once armed, parks the next embed call until released.
struct GatedEmbedder {
    inner: HashEmbedder,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: HashEmbedder::new(512),
            armed: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }
}

#[async_trait]
impl Embedder for GatedEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.embed(texts).await
    }
}

async fn start() -> (TempDir, String) {
    start_with(Arc::new(HashEmbedder::new(512))).await
}

async fn start_with(embedder: Arc<dyn Embedder>) -> (TempDir, String) {
    let tmp = TempDir::new().unwrap();
    let config = Config::minimal(tmp.path());
    fs::create_dir_all(&config.paths.documents_dir).unwrap();
    fs::write(
        config.paths.documents_dir.join("france.txt"),
        "The capital of France is Paris.",
    )
    .unwrap();

    let services = Services {
        embedder,
        completion: Arc::new(DisabledCompletion),
        fetchers: Vec::new(),
    };
    let session = Arc::new(Mutex::new(Session::new(config, services)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(session)).await.unwrap();
    });
    (tmp, format!("http://{}", addr))
}

#[tokio::test]
async fn health_reports_version() {
    let (_tmp, base) = start().await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn ask_before_ingest_explains() {
    let (_tmp, base) = start().await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/ask", base))
        .json(&json!({ "question": "What is the capital of France?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["provenance"], "none");
    assert!(body["answer"].as_str().unwrap().contains("run ingestion first"));
    assert_eq!(body["sources"], json!([]));
}

#[tokio::test]
async fn empty_question_is_a_bad_request() {
    let (_tmp, base) = start().await;
    let response = reqwest::Client::new()
        .post(format!("{}/ask", base))
        .json(&json!({ "question": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn ingest_then_status_and_reset() {
    let (_tmp, base) = start().await;
    let client = reqwest::Client::new();

    let report: Value = client
        .post(format!("{}/ingest", base))
        .json(&json!({ "force": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["status"], "built");
    assert_eq!(report["chunks"], 1);

    // No body: defaults to force = false.
    let report: Value = client
        .post(format!("{}/ingest", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["status"], "already_present");

    let status: Value = client
        .get(format!("{}/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["index"]["chunk_count"], 1);
    assert_eq!(status["index"]["model"], "hash");

    let reset: Value = client
        .post(format!("{}/reset/index", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset["removed"], true);

    let status: Value = client
        .get(format!("{}/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(status["index"].is_null());
}

#[tokio::test]
async fn settings_update_partially_and_validate() {
    let (_tmp, base) = start().await;
    let client = reqwest::Client::new();

    let settings: Value = client
        .put(format!("{}/settings", base))
        .json(&json!({ "k": 5, "fallback_enabled": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(settings["k"], 5);
    assert_eq!(settings["fallback_enabled"], true);
    assert_eq!(settings["temperature"], 0.0);

    let response = client
        .put(format!("{}/settings", base))
        .json(&json!({ "k": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let settings: Value = client
        .get(format!("{}/settings", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(settings["k"], 5, "rejected update must not apply");
}

#[tokio::test]
async fn history_records_exchanges_until_reset() {
    let (_tmp, base) = start().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/ask", base))
        .json(&json!({ "question": "Hello?" }))
        .send()
        .await
        .unwrap();

    let history: Value = client
        .get(format!("{}/history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let turns = history["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0]["role"], "user");
    assert_eq!(turns[0]["message"], "Hello?");
    assert_eq!(turns[1]["role"], "agent");
    assert_eq!(history["summary"]["total_messages"], 2);

    client
        .post(format!("{}/reset/conversation", base))
        .send()
        .await
        .unwrap();
    let history: Value = client
        .get(format!("{}/history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["turns"], json!([]));
}

#[tokio::test]
async fn queries_are_served_while_a_rebuild_is_staging() {
    let embedder = GatedEmbedder::new();
    let (_tmp, base) = start_with(embedder.clone()).await;
    let client = reqwest::Client::new();

    let first: Value = client
        .post(format!("{}/ingest", base))
        .json(&json!({ "force": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let first_generation = first["generation"].as_str().unwrap().to_string();

    embedder.armed.store(true, Ordering::SeqCst);
    let rebuild = tokio::spawn({
        let client = client.clone();
        let url = format!("{}/ingest", base);
        async move {
            client
                .post(url)
                .json(&json!({ "force": true }))
                .send()
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        }
    });
    embedder.entered.notified().await;

    let during = tokio::time::timeout(Duration::from_secs(10), async {
        let answer: Value = client
            .post(format!("{}/ask", base))
            .json(&json!({ "question": "What is the capital of France?" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let status: Value = client
            .get(format!("{}/status", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        (answer, status)
    })
    .await
    .expect("ask and status must not wait for the rebuild");
    assert!(during.0["answer"].is_string());
    assert_eq!(during.1["index"]["generation"], first_generation.as_str());

    embedder.release.notify_one();
    let second = rebuild.await.unwrap();
    assert_eq!(second["status"], "built");
    assert_ne!(second["generation"], first_generation.as_str());
}
