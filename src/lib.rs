//! # askdocs
//!
//! Grounded question answering over a locally indexed document collection.
//!
//! askdocs loads PDFs, text files and web pages, splits them into
//! overlapping chunks, embeds the chunks into a versioned on-disk index, and
//! answers questions from the most similar chunks. When nothing relevant is
//! found (or the model declines to answer from what was found) it can fall
//! back to a general-knowledge model, and every answer says which of the two
//! it came from.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Loaders    │──▶│   Chunker   │──▶│ Index builder │
//! │ files / web │   │ size+overlap│   │ gen-<id>/     │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │ CURRENT
//!                                            ▼
//!  question ─▶ Retriever ─▶ Answer generator ─▶ (answer, sources, provenance)
//!                 │ miss            │ no answer
//!                 └──────▶ Fallback ◀┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! askdocs ingest                           # build the index
//! askdocs ask "What does chapter 2 cover?"
//! askdocs chat                             # interactive loop
//! askdocs serve                            # HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`error`] | Typed stage errors |
//! | [`connector_fs`] | File loader (PDF pages, text, markdown) |
//! | [`connector_web`] | URL loader with tiered fetchers |
//! | [`extract`] | PDF and HTML text extraction |
//! | [`chunk`] | Fixed-size overlapping chunker |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Versioned index generations, atomic publish |
//! | [`search`] | Cosine retrieval |
//! | [`completion`] | Chat-completion provider abstraction |
//! | [`answer`] | Grounded answers, fallback, summaries |
//! | [`fallback`] | Per-query orchestration |
//! | [`conversation`] | Conversation log |
//! | [`tasks`] | Workflow task queue |
//! | [`ingest`] | Ingestion pipeline |
//! | [`session`] | Session object and front-end operations |
//! | [`server`] | HTTP server |
//! | [`watch`] | Documents folder watcher |
//! | [`progress`] | Ingest progress reporting |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | SQLite connections |
//! | [`migrate`] | Generation schema |

pub mod answer;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod connector_fs;
pub mod connector_web;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod search;
pub mod server;
pub mod session;
pub mod tasks;
pub mod watch;
