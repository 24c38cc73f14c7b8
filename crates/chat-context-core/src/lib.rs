//! # chat-context core
//!
//! Runtime-free logic for the chat context pipeline: data models, trigger
//! parsing, display fallbacks, content hashing, similarity ranking, and the
//! store and embedding-provider abstractions.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Anything that performs I/O lives in the `chat-context` app crate.

pub mod display;
pub mod embedding;
pub mod error;
pub mod models;
pub mod search;
pub mod store;
pub mod trigger;

pub use error::PipelineError;
