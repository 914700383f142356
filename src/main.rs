//! # askdocs CLI
//!
//! The `askdocs` binary answers questions from a local document collection.
//! It indexes files and web pages, answers from the retrieved chunks, and
//! (when enabled) falls back to a general-knowledge model when the
//! documents do not cover a question.
//!
//! ## Usage
//!
//! ```bash
//! askdocs --config ./config/askdocs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdocs ingest` | Build the index from documents and URLs |
//! | `askdocs ask "<question>"` | Answer one question |
//! | `askdocs chat` | Interactive question loop |
//! | `askdocs reset-index` | Delete the index |
//! | `askdocs status` | Show the live index and runtime settings |
//! | `askdocs serve` | Start the HTTP server |
//! | `askdocs watch` | Re-ingest when new PDFs appear |
//!
//! ## Examples
//!
//! ```bash
//! # Build (or rebuild) the index
//! askdocs ingest --force
//!
//! # Ask with a wider net and general-knowledge fallback
//! askdocs ask "What is the refund policy?" --k 5 --threshold 0.1 --fallback
//!
//! # Serve the JSON API on the configured address
//! askdocs serve
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use askdocs::config::{self, Config};
use askdocs::index;
use askdocs::ingest::IngestReport;
use askdocs::logging;
use askdocs::models::QueryOutcome;
use askdocs::progress::{NoProgress, ProgressMode};
use askdocs::server;
use askdocs::session::{Services, Session, Tunables};
use askdocs::watch;

/// askdocs: grounded answers from your own documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/askdocs.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "askdocs",
    about = "askdocs: grounded question answering over a local document index",
    version,
    long_about = "askdocs indexes PDFs, text files and web pages into a local vector index, \
    answers questions from the most similar chunks, and can fall back to a general-knowledge \
    model when the documents do not cover a question."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askdocs.toml")]
    config: PathBuf,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from the documents directory and URL list.
    ///
    /// Does nothing when an index already exists, unless `--force` is given.
    /// The new index is built next to the old one and swapped in only once
    /// it is complete.
    Ingest {
        /// Rebuild even when an index exists.
        #[arg(long)]
        force: bool,

        /// Progress output on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` on a terminal, otherwise `off`.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Answer a single question.
    Ask {
        question: String,

        /// Number of chunks to retrieve.
        #[arg(long)]
        k: Option<usize>,

        /// Minimum cosine similarity for a chunk to count as a match.
        #[arg(long)]
        threshold: Option<f32>,

        /// Use the general-knowledge fallback when the documents miss.
        #[arg(long)]
        fallback: bool,
    },

    /// Interactive question loop. Type `:help` for commands.
    Chat,

    /// Delete the index.
    ResetIndex,

    /// Show the live index generation and runtime settings.
    Status,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Watch the documents directory and re-ingest when a PDF is added.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    // Commands that never call an external service
    match &cli.command {
        Commands::ResetIndex => {
            if index::reset_index(&cfg.paths.index_dir).await? {
                println!("Index deleted: {}", cfg.paths.index_dir.display());
            } else {
                println!("No index at {}", cfg.paths.index_dir.display());
            }
            return Ok(());
        }
        Commands::Status => {
            print_status(&cfg)?;
            return Ok(());
        }
        _ => {}
    }

    cfg.check_credentials()?;
    let services = Services::from_config(&cfg)?;
    let mut session = Session::new(cfg, services);

    match cli.command {
        Commands::Ingest { force, progress } => {
            let mode = match progress.as_deref() {
                Some(value) => match ProgressMode::parse(value) {
                    Some(mode) => mode,
                    None => bail!("--progress must be one of: off, human, json"),
                },
                None => ProgressMode::default_for_tty(),
            };
            let report = session.ingest(force, mode.reporter().as_ref()).await?;
            print_ingest_report(&report);
            session.close().await;
        }
        Commands::Ask {
            question,
            k,
            threshold,
            fallback,
        } => {
            if let Some(k) = k {
                session.set_k(k)?;
            }
            if let Some(t) = threshold {
                session.set_score_threshold(t)?;
            }
            if fallback {
                session.set_fallback_enabled(true);
            }
            let outcome = session.query(&question).await;
            print_outcome(&outcome);
            session.close().await;
        }
        Commands::Chat => {
            run_chat(&mut session).await?;
            session.close().await;
        }
        Commands::Serve => {
            let bind = session.config().server.bind.clone();
            server::run_server(&bind, Arc::new(Mutex::new(session))).await?;
        }
        Commands::Watch => {
            watch::watch_documents(Arc::new(Mutex::new(session))).await?;
        }
        Commands::ResetIndex | Commands::Status => {}
    }

    Ok(())
}

fn print_status(cfg: &Config) -> Result<()> {
    match index::current_manifest(&cfg.paths.index_dir)? {
        Some(m) => {
            println!("Index:       {}", cfg.paths.index_dir.display());
            println!("Generation:  {}", m.generation);
            println!("Chunks:      {}", m.chunk_count);
            println!("Model:       {} ({} dims)", m.model, m.dims);
            println!("Chunking:    size {} / overlap {}", m.chunk_size, m.chunk_overlap);
            println!("Built:       {}", m.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        None => println!("Index:       none (run `askdocs ingest`)"),
    }
    print_tunables(&Tunables::from_config(cfg));
    Ok(())
}

fn print_tunables(t: &Tunables) {
    println!("k:           {}", t.k);
    println!("threshold:   {}", t.score_threshold);
    println!("temperature: {}", t.temperature);
    println!("fallback:    {}", if t.fallback_enabled { "on" } else { "off" });
}

fn print_ingest_report(report: &IngestReport) {
    match report {
        IngestReport::AlreadyPresent { generation, chunks } => {
            println!(
                "Index already present ({} chunks, generation {}). Use --force to rebuild.",
                chunks, generation
            );
        }
        IngestReport::NoSources => {
            println!("No documents or URLs found; index left unchanged.");
        }
        IngestReport::Built(summary) => {
            println!("Ingest complete:");
            println!("  documents:   {}", summary.documents);
            println!("  chunks:      {}", summary.chunks);
            println!("  generation:  {}", summary.generation);
            if summary.files_skipped > 0 || summary.urls_skipped > 0 {
                println!(
                    "  skipped:     {} files, {} URLs",
                    summary.files_skipped, summary.urls_skipped
                );
            }
            if summary.generations_retired > 0 {
                println!("  retired:     {} old generation(s)", summary.generations_retired);
            }
        }
    }
}

fn print_outcome(outcome: &QueryOutcome) {
    println!("{}", outcome.answer);
    println!();
    println!("[{}]", outcome.provenance);
    for source in &outcome.sources {
        println!("  - {}", source.display());
    }
}

const CHAT_HELP: &str = "\
Commands:
  :k <n>              number of chunks to retrieve
  :threshold <x>      similarity threshold in [-1, 1]
  :temp <x>           answer temperature in [0, 2]
  :fallback on|off    general-knowledge fallback
  :ingest [force]     build the index
  :history            show the conversation
  :tasks              show the task queue
  :reset              clear conversation and tasks
  exit                quit";

async fn run_chat(session: &mut Session) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("askdocs chat. Type a question, `:help` for commands, `exit` to quit.");
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit" | ":q") {
            break;
        }

        if let Some(command) = line.strip_prefix(':') {
            if let Err(e) = chat_command(session, command).await {
                println!("error: {:#}", e);
            }
            continue;
        }

        let outcome = session.query(line).await;
        print_outcome(&outcome);
        println!();
    }
    Ok(())
}

async fn chat_command(session: &mut Session, command: &str) -> Result<()> {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();

    match (name, arg) {
        ("help", _) => println!("{}", CHAT_HELP),
        ("k", Some(v)) => {
            session.set_k(v.parse()?)?;
            println!("k = {}", session.tunables().k);
        }
        ("threshold", Some(v)) => {
            session.set_score_threshold(v.parse()?)?;
            println!("threshold = {}", session.tunables().score_threshold);
        }
        ("temp", Some(v)) => {
            session.set_temperature(v.parse()?)?;
            println!("temperature = {}", session.tunables().temperature);
        }
        ("fallback", Some("on")) => {
            session.set_fallback_enabled(true);
            println!("fallback on");
        }
        ("fallback", Some("off")) => {
            session.set_fallback_enabled(false);
            println!("fallback off");
        }
        ("ingest", force) => {
            let report = session
                .ingest(force == Some("force"), &NoProgress)
                .await?;
            print_ingest_report(&report);
        }
        ("history", _) => {
            for turn in session.history() {
                println!(
                    "[{}] {}: {}",
                    turn.timestamp.format("%H:%M:%S"),
                    turn.role,
                    turn.message
                );
            }
        }
        ("tasks", _) => {
            let status = session.tasks();
            println!("pending:   {}", status.pending.len());
            for task in &status.pending {
                println!("  #{} {}", task.id, task.name);
            }
            println!("completed: {}", status.completed.len());
        }
        ("settings", _) => print_tunables(session.tunables()),
        ("reset", _) => {
            session.reset();
            println!("conversation cleared");
        }
        _ => bail!("unknown command `:{}` (try :help)", command),
    }
    Ok(())
}
