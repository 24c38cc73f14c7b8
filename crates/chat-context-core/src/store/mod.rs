//! Storage abstraction for the context pipeline.
//!
//! The [`Store`] trait covers the four externally-owned tables the pipeline
//! reads and writes: the embedding cache, contexts, context-to-message links,
//! and the embedding job queue. Backends are multi-writer; the pipeline never
//! assumes exclusive access and relies on idempotent upserts instead of locks.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Context, ContextKind, ContextLink, EmbeddingJob, JobStatus, LinkedContext};

/// A context scored against a query vector by [`Store::match_contexts`].
#[derive(Debug, Clone)]
pub struct ContextCandidate {
    pub id: String,
    /// Raw stored type string.
    pub kind: String,
    pub metadata: serde_json::Value,
    /// Cosine similarity against the query vector.
    pub similarity: f64,
    /// Unix seconds; used as the recency tie-break.
    pub updated_at: i64,
}

/// Inputs for a nearest-neighbor lookup.
#[derive(Debug, Clone)]
pub struct MatchQuery<'a> {
    pub embedding: &'a [f32],
    /// Candidates below this similarity may be dropped by the backend.
    pub threshold: f64,
    /// Restrict to these kinds; empty means all kinds.
    pub kinds: &'a [ContextKind],
    /// Restrict to contexts scoped to this chat.
    pub chat_id: Option<&'a str>,
}

/// Inputs for a trigger lookup by name.
#[derive(Debug, Clone)]
pub struct NameQuery<'a> {
    /// Case-insensitive substring of a title field; empty matches all.
    pub needle: &'a str,
    /// Restrict to these kinds; empty means all kinds.
    pub kinds: &'a [ContextKind],
    /// Restrict to contexts scoped to this chat (global contexts included).
    pub chat_id: Option<&'a str>,
}

/// Abstract storage backend.
///
/// | Method | Table |
/// |--------|-------|
/// | [`get_cached_embedding`](Store::get_cached_embedding) / [`put_cached_embedding`](Store::put_cached_embedding) | `embedding_cache` |
/// | [`insert_context`](Store::insert_context) / [`context_exists`](Store::context_exists) / [`match_contexts`](Store::match_contexts) / [`find_contexts_by_name`](Store::find_contexts_by_name) | `contexts` |
/// | [`insert_link`](Store::insert_link) / [`linked_contexts`](Store::linked_contexts) | `message_contexts` |
/// | [`enqueue_job`](Store::enqueue_job) / [`get_job`](Store::get_job) / [`update_job_status`](Store::update_job_status) / [`pending_jobs`](Store::pending_jobs) | `embedding_queue` |
#[async_trait]
pub trait Store: Send + Sync {
    /// Look up a cached vector by content hash.
    async fn get_cached_embedding(&self, content_hash: &str) -> Result<Option<Vec<f32>>>;

    /// Write a vector for a content hash. Must be an idempotent upsert:
    /// an existing entry for the same hash is left as is.
    async fn put_cached_embedding(&self, content_hash: &str, embedding: &[f32]) -> Result<()>;

    /// Persist a new context row.
    async fn insert_context(&self, context: &Context) -> Result<()>;

    async fn context_exists(&self, id: &str) -> Result<bool>;

    /// Insert a link. Returns `false` if the `(context_id, message_id)` pair
    /// was already linked; no second row is created.
    async fn insert_link(&self, link: &ContextLink) -> Result<bool>;

    /// All contexts linked to a message, oldest link first.
    async fn linked_contexts(&self, message_id: &str) -> Result<Vec<LinkedContext>>;

    /// Score every context with an embedding against the query vector,
    /// applying the kind and chat filters. Ordering and truncation are left
    /// to [`rank_candidates`](crate::search::rank_candidates).
    async fn match_contexts(&self, query: &MatchQuery<'_>) -> Result<Vec<ContextCandidate>>;

    /// Contexts whose title fields match [`NameQuery::needle`], embedded or
    /// not. `similarity` is unused and ordering is left to
    /// [`rank_name_matches`](crate::search::rank_name_matches).
    async fn find_contexts_by_name(&self, query: &NameQuery<'_>) -> Result<Vec<ContextCandidate>>;

    async fn enqueue_job(&self, job: &EmbeddingJob) -> Result<()>;

    async fn get_job(&self, id: &str) -> Result<Option<EmbeddingJob>>;

    /// Move a job from `expected` to `status`, only if it is still in
    /// `expected`. Returns `false` when the job is missing or another writer
    /// changed it first. Transition rules are enforced by the caller.
    async fn update_job_status(
        &self,
        id: &str,
        expected: JobStatus,
        status: JobStatus,
        last_error: Option<&str>,
        updated_at: i64,
    ) -> Result<bool>;

    /// Pending jobs, oldest first.
    async fn pending_jobs(&self, limit: usize) -> Result<Vec<EmbeddingJob>>;
}
