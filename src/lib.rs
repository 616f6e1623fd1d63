//! # docqa
//!
//! Question answering over a private document collection.
//!
//! Documents are split into overlapping passages, embedded and persisted as
//! an index. At query time a relevant and diverse passage set is selected
//! with Maximal Marginal Relevance, assembled into a grounded prompt together
//! with the conversation so far, and the answer is streamed back.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌────────────┐
//! │  Loader   │──▶│ Chunk+Embed  │──▶│   Index    │
//! │ PDF/MD/TXT│   │  (ingest)    │   │  (SQLite)  │
//! └───────────┘   └──────────────┘   └─────┬──────┘
//!                                          │ load
//!                                          ▼
//!                 ┌──────────┐       ┌──────────────┐
//!  question ─────▶│   MMR    │──────▶│ Orchestrator │──▶ streamed answer
//!                 │ retrieve │       │ prompt + LLM │
//!                 └──────────┘       └──────────────┘
//! ```
//!
//! The pure pipeline stages (chunking, MMR, context assembly, prompt,
//! session) live in `docqa-core`; this crate adds configuration, document
//! loading, HTTP providers, persistence, the orchestrator, the CLI and the
//! HTTP server.
//!
//! ## Quick Start
//!
//! ```bash
//! docqa build                   # index ./docs
//! docqa ask "What is the refund policy?"
//! docqa chat                    # interactive, streamed
//! docqa serve                   # HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`loader`] | PDF, Markdown and text loading |
//! | [`embedding`] | Ollama, OpenAI and local embedding providers |
//! | [`generation`] | Ollama and OpenAI generation providers |
//! | [`ingest`] | Index build |
//! | [`index_store`] | Index persistence |
//! | [`conversation`] | Exchange orchestration |
//! | [`server`] | HTTP API |
//! | [`info`] | Index overview |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Index schema |

pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod index_store;
pub mod info;
pub mod ingest;
pub mod loader;
pub mod migrate;
pub mod server;
