//! Web page loader.
//!
//! Each URL is fetched independently through an ordered list of
//! [`PageFetcher`] tiers. The primary tier is a DOM-rendering service
//! ([`RenderedFetcher`]) so script-built pages yield their real text; the
//! fallback is a plain HTTP GET ([`HttpFetcher`]). A tier that errors or
//! produces no text hands the URL to the next tier. When every tier fails
//! the URL is logged and skipped.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::WebConfig;
use crate::error::SourceLoadError;
use crate::extract::html_to_text;
use crate::models::SourceDocument;

/// One way of turning a URL into visible text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// POSTs `{"url": ...}` to a rendering service and converts the HTML it
/// returns.
pub struct RenderedFetcher {
    endpoint: String,
    client: reqwest::Client,
}

impl RenderedFetcher {
    pub fn new(endpoint: &str, config: &WebConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

#[async_trait]
impl PageFetcher for RenderedFetcher {
    fn name(&self) -> &str {
        "rendered"
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            bail!("rendering service returned {}", status);
        }
        let html = response.text().await?;
        Ok(html_to_text(&html))
    }
}

/// Plain GET. HTML is converted to text; `text/plain` is kept as is.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &WebConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {}", status);
        }
        let is_plain = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/plain"))
            .unwrap_or(false);
        let body = response.text().await?;
        if is_plain {
            Ok(body)
        } else {
            Ok(html_to_text(&body))
        }
    }
}

/// Tiers in the order they are tried.
pub fn build_fetchers(config: &WebConfig) -> Result<Vec<Box<dyn PageFetcher>>> {
    let mut fetchers: Vec<Box<dyn PageFetcher>> = Vec::new();
    if let Some(endpoint) = &config.render_endpoint {
        fetchers.push(Box::new(RenderedFetcher::new(endpoint, config)?));
    }
    fetchers.push(Box::new(HttpFetcher::new(config)?));
    Ok(fetchers)
}

#[derive(Debug, Default)]
pub struct UrlLoad {
    pub documents: Vec<SourceDocument>,
    pub failures: Vec<SourceLoadError>,
}

pub async fn load_url_sources(urls: &[String], fetchers: &[Box<dyn PageFetcher>]) -> UrlLoad {
    let mut load = UrlLoad::default();
    for url in urls {
        match fetch_with_tiers(url, fetchers).await {
            Ok(text) => load.documents.push(SourceDocument {
                text,
                source: url.clone(),
                page: None,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "skipping URL");
                load.failures.push(e);
            }
        }
    }
    load
}

async fn fetch_with_tiers(
    url: &str,
    fetchers: &[Box<dyn PageFetcher>],
) -> Result<String, SourceLoadError> {
    let mut attempts = Vec::new();
    for fetcher in fetchers {
        match fetcher.fetch_text(url).await {
            Ok(text) if !text.trim().is_empty() => {
                tracing::debug!(url, tier = fetcher.name(), chars = text.len(), "fetched page");
                return Ok(text);
            }
            Ok(_) => {
                tracing::debug!(url, tier = fetcher.name(), "tier returned no text");
                attempts.push(format!("{}: no text", fetcher.name()));
            }
            Err(e) => {
                tracing::debug!(url, tier = fetcher.name(), error = %e, "tier failed");
                attempts.push(format!("{}: {}", fetcher.name(), e));
            }
        }
    }
    Err(SourceLoadError::Fetch {
        url: url.to_string(),
        message: if attempts.is_empty() {
            "no fetchers configured".to_string()
        } else {
            attempts.join("; ")
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Scripted {
        name: &'static str,
        reply: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PageFetcher for Scripted {
        fn name(&self) -> &str {
            self.name
        }
        async fn fetch_text(&self, _url: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Some(text) => Ok(text.to_string()),
                None => bail!("unreachable"),
            }
        }
    }

    fn tier(name: &'static str, reply: Option<&'static str>) -> (Box<dyn PageFetcher>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Scripted {
                name,
                reply,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    #[tokio::test]
    async fn empty_primary_falls_through_to_secondary() {
        let (primary, primary_calls) = tier("rendered", Some("   "));
        let (secondary, secondary_calls) = tier("http", Some("Hello from the page"));
        let load = load_url_sources(&["https://example.com".to_string()], &[primary, secondary]).await;

        assert_eq!(load.documents.len(), 1);
        assert_eq!(load.documents[0].text, "Hello from the page");
        assert_eq!(load.documents[0].source, "https://example.com");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn successful_primary_skips_secondary() {
        let (primary, _) = tier("rendered", Some("Rendered text"));
        let (secondary, secondary_calls) = tier("http", Some("raw"));
        let load = load_url_sources(&["https://example.com".to_string()], &[primary, secondary]).await;
        assert_eq!(load.documents[0].text, "Rendered text");
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn url_is_skipped_when_every_tier_fails() {
        let (primary, _) = tier("rendered", None);
        let (secondary, _) = tier("http", None);
        let urls = vec!["https://down.example".to_string()];
        let load = load_url_sources(&urls, &[primary, secondary]).await;
        assert!(load.documents.is_empty());
        assert_eq!(load.failures.len(), 1);
        let message = load.failures[0].to_string();
        assert!(message.contains("rendered: unreachable"));
        assert!(message.contains("http: unreachable"));
    }

    #[test]
    fn http_tier_always_present() {
        let fetchers = build_fetchers(&WebConfig::default()).unwrap();
        let names: Vec<&str> = fetchers.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["http"]);

        let config = WebConfig {
            render_endpoint: Some("http://127.0.0.1:9/render".to_string()),
            ..WebConfig::default()
        };
        let names: Vec<String> = build_fetchers(&config)
            .unwrap()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["rendered", "http"]);
    }
}
