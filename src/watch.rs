//! Folder watcher: rebuild the index when a new PDF lands in the documents
//! directory.
//!
//! Filesystem events arrive on notify's own thread and are forwarded over a
//! channel into the async side. Bursts of events (a copy in progress, several
//! files dropped at once) are collapsed by waiting for [`DEBOUNCE`] of quiet
//! before a single forced ingest runs against the shared session.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::progress::NoProgress;
use crate::server::SharedSession;
use crate::session::ingest_shared;

/// Quiet period after the last relevant event before ingest starts.
pub const DEBOUNCE: Duration = Duration::from_secs(2);

/// True when `event` reports a newly created `.pdf` file.
pub fn is_new_pdf(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_))
        && event.paths.iter().any(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
}

/// Watch `session`'s documents directory until the process is terminated.
pub async fn watch_documents(session: SharedSession) -> Result<()> {
    let documents_dir = session.lock().await.config().paths.documents_dir.clone();
    std::fs::create_dir_all(&documents_dir).with_context(|| {
        format!(
            "Failed to create documents directory: {}",
            documents_dir.display()
        )
    })?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let _ = tx.send(event);
        }
        Err(e) => tracing::warn!(error = %e, "watch error"),
    })?;
    watcher
        .watch(&documents_dir, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {}", documents_dir.display()))?;

    tracing::info!(dir = %documents_dir.display(), "watching for new PDFs");
    println!("Watching {} for new PDFs (Ctrl-C to stop)", documents_dir.display());

    while let Some(event) = rx.recv().await {
        if !is_new_pdf(&event) {
            continue;
        }
        log_paths(&event);
        debounce(&mut rx).await;

        let report = ingest_shared(&session, true, &NoProgress).await;
        match report {
            Ok(report) => tracing::info!(?report, "re-ingested after new PDF"),
            Err(e) => tracing::error!(error = %format!("{:#}", e), "re-ingest failed"),
        }
    }

    Ok(())
}

/// Drain events until the channel has been quiet for [`DEBOUNCE`].
async fn debounce(rx: &mut mpsc::UnboundedReceiver<Event>) {
    loop {
        match tokio::time::timeout(DEBOUNCE, rx.recv()).await {
            Ok(Some(event)) => {
                if is_new_pdf(&event) {
                    log_paths(&event);
                }
            }
            Ok(None) | Err(_) => return,
        }
    }
}

fn log_paths(event: &Event) {
    for path in &event.paths {
        tracing::info!(path = %display_name(path), "new PDF detected");
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use std::path::PathBuf;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn created_pdf_triggers() {
        assert!(is_new_pdf(&event(EventKind::Create(CreateKind::File), "/docs/a.pdf")));
        assert!(is_new_pdf(&event(EventKind::Create(CreateKind::Any), "/docs/B.PDF")));
    }

    #[test]
    fn other_files_and_kinds_are_ignored() {
        assert!(!is_new_pdf(&event(EventKind::Create(CreateKind::File), "/docs/a.txt")));
        assert!(!is_new_pdf(&event(EventKind::Modify(ModifyKind::Any), "/docs/a.pdf")));
        assert!(!is_new_pdf(&event(EventKind::Remove(RemoveKind::File), "/docs/a.pdf")));
        assert!(!is_new_pdf(&event(EventKind::Create(CreateKind::Folder), "/docs/pdf")));
    }
}
