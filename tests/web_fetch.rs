//! URL loading against a local HTTP server.

use askdocs::config::WebConfig;
use askdocs::connector_web::{load_url_sources, HttpFetcher, PageFetcher, RenderedFetcher};
use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn site() -> Router {
    Router::new()
        .route(
            "/page",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                    "<html><head><title>T</title><script>var x = 1;</script></head>\
                     <body><h1>Refund policy</h1><p>Refunds within 30&nbsp;days.</p></body></html>",
                )
            }),
        )
        .route(
            "/plain",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "text/plain")],
                    "<b>not markup</b>",
                )
            }),
        )
        .route(
            "/empty",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "text/html")],
                    "<html><body><script>render()</script></body></html>",
                )
            }),
        )
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "gone").into_response() }),
        )
}

#[tokio::test]
async fn http_fetcher_extracts_visible_text() {
    let base = spawn(site()).await;
    let fetcher = HttpFetcher::new(&WebConfig::default()).unwrap();

    let text = fetcher.fetch_text(&format!("{}/page", base)).await.unwrap();
    assert!(text.contains("Refund policy"));
    assert!(text.contains("Refunds within 30 days."));
    assert!(!text.contains("var x"));
    assert!(!text.contains('<'));
}

#[tokio::test]
async fn http_fetcher_keeps_plain_text() {
    let base = spawn(site()).await;
    let fetcher = HttpFetcher::new(&WebConfig::default()).unwrap();

    let text = fetcher.fetch_text(&format!("{}/plain", base)).await.unwrap();
    assert_eq!(text, "<b>not markup</b>");
}

#[tokio::test]
async fn http_errors_fail_the_tier() {
    let base = spawn(site()).await;
    let fetcher = HttpFetcher::new(&WebConfig::default()).unwrap();

    let err = fetcher
        .fetch_text(&format!("{}/missing", base))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn rendered_tier_is_tried_first() {
    let renderer = Router::new().route(
        "/render",
        post(|Json(body): Json<serde_json::Value>| async move {
            let url = body["url"].as_str().unwrap_or_default().to_string();
            format!("<div>Rendered copy of {}</div>", url)
        }),
    );
    let render_base = spawn(renderer).await;
    let site_base = spawn(site()).await;

    let config = WebConfig::default();
    let fetchers: Vec<Box<dyn PageFetcher>> = vec![
        Box::new(RenderedFetcher::new(&format!("{}/render", render_base), &config).unwrap()),
        Box::new(HttpFetcher::new(&config).unwrap()),
    ];

    let url = format!("{}/page", site_base);
    let load = load_url_sources(std::slice::from_ref(&url), &fetchers).await;
    assert_eq!(load.documents.len(), 1);
    assert_eq!(load.documents[0].text, format!("Rendered copy of {}", url));
    assert_eq!(load.documents[0].source, url);
    assert_eq!(load.documents[0].page, None);
}

#[tokio::test]
async fn failing_urls_are_skipped_and_the_rest_load() {
    let base = spawn(site()).await;
    let fetchers: Vec<Box<dyn PageFetcher>> =
        vec![Box::new(HttpFetcher::new(&WebConfig::default()).unwrap())];

    let urls = vec![
        format!("{}/missing", base),
        format!("{}/empty", base),
        format!("{}/page", base),
    ];
    let load = load_url_sources(&urls, &fetchers).await;
    assert_eq!(load.documents.len(), 1);
    assert!(load.documents[0].source.ends_with("/page"));
    assert_eq!(load.failures.len(), 2);
}
