//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Vector matching is
//! brute-force cosine similarity over all stored contexts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Context, ContextLink, EmbeddingJob, JobStatus, LinkedContext};
use crate::search::name_matches;

use super::{ContextCandidate, MatchQuery, NameQuery, Store};

struct StoredContext {
    context: Context,
    metadata_json: serde_json::Value,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    cache: RwLock<HashMap<String, Vec<f32>>>,
    contexts: RwLock<Vec<StoredContext>>,
    links: RwLock<Vec<ContextLink>>,
    jobs: RwLock<Vec<EmbeddingJob>>,
    match_calls: AtomicUsize,
    fail_cache_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of [`Store::match_contexts`] calls served so far.
    #[cfg(any(test, feature = "test-util"))]
    pub fn match_calls(&self) -> usize {
        self.match_calls.load(Ordering::SeqCst)
    }

    /// Number of entries in the embedding cache.
    pub fn cached_entries(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Make every subsequent cache write fail, to exercise best-effort paths.
    #[cfg(any(test, feature = "test-util"))]
    pub fn set_fail_cache_writes(&self, fail: bool) {
        self.fail_cache_writes.store(fail, Ordering::SeqCst);
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

/// Global contexts are visible from every chat.
fn in_chat(stored: &StoredContext, chat_id: Option<&str>) -> bool {
    match (chat_id, stored.context.chat_id.as_deref()) {
        (Some(wanted), Some(scoped)) => wanted == scoped,
        _ => true,
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_cached_embedding(&self, content_hash: &str) -> Result<Option<Vec<f32>>> {
        Ok(read(&self.cache)?.get(content_hash).cloned())
    }

    async fn put_cached_embedding(&self, content_hash: &str, embedding: &[f32]) -> Result<()> {
        if self.fail_cache_writes.load(Ordering::SeqCst) {
            anyhow::bail!("cache writes disabled");
        }
        write(&self.cache)?
            .entry(content_hash.to_string())
            .or_insert_with(|| embedding.to_vec());
        Ok(())
    }

    async fn insert_context(&self, context: &Context) -> Result<()> {
        let metadata_json = context.metadata.to_value()?;
        write(&self.contexts)?.push(StoredContext {
            context: context.clone(),
            metadata_json,
        });
        Ok(())
    }

    async fn context_exists(&self, id: &str) -> Result<bool> {
        Ok(read(&self.contexts)?.iter().any(|s| s.context.id == id))
    }

    async fn insert_link(&self, link: &ContextLink) -> Result<bool> {
        let mut links = write(&self.links)?;
        if links
            .iter()
            .any(|l| l.context_id == link.context_id && l.message_id == link.message_id)
        {
            return Ok(false);
        }
        links.push(link.clone());
        Ok(true)
    }

    async fn linked_contexts(&self, message_id: &str) -> Result<Vec<LinkedContext>> {
        let links = read(&self.links)?;
        let contexts = read(&self.contexts)?;
        let mut linked: Vec<LinkedContext> = links
            .iter()
            .filter(|l| l.message_id == message_id)
            .filter_map(|l| {
                contexts
                    .iter()
                    .find(|s| s.context.id == l.context_id)
                    .map(|s| LinkedContext {
                        id: s.context.id.clone(),
                        kind: s.context.kind.as_str().to_string(),
                        metadata: s.metadata_json.clone(),
                        link_metadata: l.metadata.clone(),
                        linked_at: l.created_at,
                    })
            })
            .collect();
        linked.sort_by_key(|l| l.linked_at);
        Ok(linked)
    }

    async fn match_contexts(&self, query: &MatchQuery<'_>) -> Result<Vec<ContextCandidate>> {
        self.match_calls.fetch_add(1, Ordering::SeqCst);
        let contexts = read(&self.contexts)?;
        let candidates = contexts
            .iter()
            .filter(|s| query.kinds.is_empty() || query.kinds.contains(&s.context.kind))
            .filter(|s| in_chat(s, query.chat_id))
            .filter_map(|s| {
                let embedding = s.context.embedding.as_ref()?;
                let similarity = cosine_similarity(query.embedding, embedding) as f64;
                (similarity >= query.threshold).then(|| ContextCandidate {
                    id: s.context.id.clone(),
                    kind: s.context.kind.as_str().to_string(),
                    metadata: s.metadata_json.clone(),
                    similarity,
                    updated_at: s.context.created_at,
                })
            })
            .collect();
        Ok(candidates)
    }

    async fn find_contexts_by_name(&self, query: &NameQuery<'_>) -> Result<Vec<ContextCandidate>> {
        let contexts = read(&self.contexts)?;
        Ok(contexts
            .iter()
            .filter(|s| query.kinds.is_empty() || query.kinds.contains(&s.context.kind))
            .filter(|s| in_chat(s, query.chat_id))
            .filter(|s| name_matches(&s.metadata_json, query.needle))
            .map(|s| ContextCandidate {
                id: s.context.id.clone(),
                kind: s.context.kind.as_str().to_string(),
                metadata: s.metadata_json.clone(),
                similarity: 0.0,
                updated_at: s.context.created_at,
            })
            .collect())
    }

    async fn enqueue_job(&self, job: &EmbeddingJob) -> Result<()> {
        write(&self.jobs)?.push(job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<EmbeddingJob>> {
        Ok(read(&self.jobs)?.iter().find(|j| j.id == id).cloned())
    }

    async fn update_job_status(
        &self,
        id: &str,
        expected: JobStatus,
        status: JobStatus,
        last_error: Option<&str>,
        updated_at: i64,
    ) -> Result<bool> {
        let mut jobs = write(&self.jobs)?;
        let Some(job) = jobs
            .iter_mut()
            .find(|j| j.id == id && j.status == expected)
        else {
            return Ok(false);
        };
        job.status = status;
        job.last_error = last_error.map(str::to_string);
        job.updated_at = updated_at;
        Ok(true)
    }

    async fn pending_jobs(&self, limit: usize) -> Result<Vec<EmbeddingJob>> {
        let jobs = read(&self.jobs)?;
        // Insertion order is creation order.
        Ok(jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }
}
