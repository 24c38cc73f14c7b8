//! # chat-context
//!
//! The context layer of a realtime chat client: turns free-text input into
//! ranked references to people, threads, topics, files, and links.
//!
//! ## Architecture
//!
//! ```text
//! keystrokes ─▶ ReferenceFeed ─▶ SuggestionOrchestrator ─┬─▶ EmbeddingGateway ─▶ provider
//!                                  (debounce, cancel)     │        │
//!                                                         │        ▼
//!                                                         │   embedding_cache
//!                                                         ├─▶ SimilaritySearch ─▶ contexts
//!                                                         └─▶ MediaSearch ─▶ find-references
//!
//! ContextService ─▶ contexts / message_contexts      JobQueue ─▶ embedding_queue
//! ```
//!
//! Pure logic (models, trigger parsing, ranking, display fallbacks, the
//! [`Store`](chat_context_core::store::Store) trait) lives in
//! `chat-context-core`. This crate adds I/O: SQLite, HTTP providers,
//! timers, the CLI, and the HTTP server.
//!
//! ## Quick Start
//!
//! ```bash
//! cctx init
//! cctx context create "Q3 launch plan" --type file --metadata '{"name":"plan.md"}'
//! cctx suggest "launch"
//! cctx serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding provider implementations |
//! | [`gateway`] | Cached embedding generation |
//! | [`similarity`] | Nearest-neighbor context lookup |
//! | [`media`] | Secondary media reference search |
//! | [`suggest`] | Debounced, cancellable suggestions |
//! | [`feed`] | Live reference state per input box |
//! | [`links`] | Contexts and message links |
//! | [`jobs`] | Background embedding job queue |
//! | [`pipeline`] | Service wiring |
//! | [`server`] | HTTP API |
//! | [`db`] / [`migrate`] / [`sqlite_store`] | SQLite persistence |

pub mod cancel;
pub mod config;
pub mod db;
pub mod embedding;
pub mod feed;
pub mod gateway;
pub mod jobs;
pub mod links;
pub mod media;
pub mod migrate;
pub mod pipeline;
pub mod server;
pub mod similarity;
pub mod sqlite_store;
pub mod stats;
pub mod suggest;

pub use chat_context_core::models;
pub use chat_context_core::PipelineError;
