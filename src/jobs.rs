//! Background embedding job queue.
//!
//! Jobs move `pending → processing → completed | failed`. Producers call
//! [`JobQueue::queue_for_embedding`] and poll
//! [`JobQueue::check_embedding_status`]; workers claim work with
//! [`JobQueue::pending_jobs`] and report progress through
//! [`JobQueue::advance`]. Failed jobs are never retried automatically.

use std::sync::Arc;

use anyhow::Result;

use chat_context_core::models::{ContentType, EmbeddingJob, JobStatus, JobStatusReport};
use chat_context_core::store::Store;
use chat_context_core::PipelineError;

pub struct JobQueue {
    store: Arc<dyn Store>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a `pending` job and return its id.
    pub async fn queue_for_embedding(
        &self,
        content_id: &str,
        content_type: ContentType,
    ) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let job = EmbeddingJob {
            id: uuid::Uuid::new_v4().to_string(),
            content_id: content_id.to_string(),
            content_type,
            status: JobStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.store.enqueue_job(&job).await?;
        tracing::debug!(job_id = %job.id, content_id, %content_type, "queued embedding job");
        Ok(job.id)
    }

    /// Current status of a job. Unknown ids and store failures read as `failed`.
    pub async fn check_embedding_status(&self, job_id: &str) -> JobStatusReport {
        match self.store.get_job(job_id).await {
            Ok(Some(job)) => JobStatusReport {
                status: job.status,
                error: job.last_error,
            },
            Ok(None) => JobStatusReport {
                status: JobStatus::Failed,
                error: Some(PipelineError::UnknownJob(job_id.to_string()).to_string()),
            },
            Err(e) => JobStatusReport {
                status: JobStatus::Failed,
                error: Some(format!("{:#}", e)),
            },
        }
    }

    /// Move a job to `next`. Only forward transitions are accepted.
    ///
    /// The write only lands if the job is still in the status that was read,
    /// so of two workers racing on the same job at most one succeeds.
    pub async fn advance(
        &self,
        job_id: &str,
        next: JobStatus,
        error: Option<&str>,
    ) -> Result<EmbeddingJob> {
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::UnknownJob(job_id.to_string()))?;

        if !job.status.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: job.status,
                to: next,
            }
            .into());
        }

        let last_error = if next == JobStatus::Failed {
            error.map(str::to_string)
        } else {
            None
        };
        let now = chrono::Utc::now().timestamp();
        let written = self
            .store
            .update_job_status(job_id, job.status, next, last_error.as_deref(), now)
            .await?;
        if !written {
            // Another writer moved the job after we read it.
            let current = self
                .store
                .get_job(job_id)
                .await?
                .ok_or_else(|| PipelineError::UnknownJob(job_id.to_string()))?;
            return Err(PipelineError::InvalidTransition {
                from: current.status,
                to: next,
            }
            .into());
        }

        tracing::debug!(job_id, from = %job.status, to = %next, "embedding job advanced");
        job.status = next;
        job.last_error = last_error;
        job.updated_at = now;
        Ok(job)
    }

    /// Oldest pending jobs first.
    pub async fn pending_jobs(&self, limit: usize) -> Result<Vec<EmbeddingJob>> {
        self.store.pending_jobs(limit).await
    }
}
