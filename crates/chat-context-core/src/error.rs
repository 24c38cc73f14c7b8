//! Typed pipeline failures that callers may want to match on.
//!
//! Most operations return `anyhow::Result`; these variants are attached to
//! the error chain so the HTTP layer can map them to status codes via
//! `downcast_ref`.

use crate::models::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A remote call (embedding model, similarity index, media search) failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Writing to the embedding cache failed. Logged, never propagated.
    #[error("cache write failed for {content_hash}: {message}")]
    CacheWrite {
        content_hash: String,
        message: String,
    },

    #[error("unknown embedding job: {0}")]
    UnknownJob(String),

    #[error("unknown context: {0}")]
    UnknownContext(String),

    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}
