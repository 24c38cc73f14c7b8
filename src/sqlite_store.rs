//! SQLite-backed [`Store`] implementation.
//!
//! Vectors are stored as little-endian f32 BLOBs and matched by brute-force
//! cosine similarity, which is adequate for per-workspace context counts.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use chat_context_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use chat_context_core::models::{
    ContentType, Context, ContextKind, ContextLink, EmbeddingJob, JobStatus, LinkedContext,
};
use chat_context_core::search::name_matches;
use chat_context_core::store::{ContextCandidate, MatchQuery, NameQuery, Store};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_json(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or(serde_json::json!({}))
}

/// Kind filter over the raw `type` column. Aliases such as `url` resolve
/// through [`ContextKind`]'s parser; unknown types never match a filter.
fn kind_allowed(row: &sqlx::sqlite::SqliteRow, kinds: &[ContextKind]) -> bool {
    if kinds.is_empty() {
        return true;
    }
    let raw: String = row.get("type");
    raw.parse::<ContextKind>()
        .is_ok_and(|kind| kinds.contains(&kind))
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<EmbeddingJob> {
    let content_type: String = row.get("content_type");
    let status: String = row.get("status");
    Ok(EmbeddingJob {
        id: row.get("id"),
        content_id: row.get("content_id"),
        content_type: content_type.parse::<ContentType>()?,
        status: status.parse::<JobStatus>()?,
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_cached_embedding(&self, content_hash: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT embedding FROM embedding_cache WHERE content_hash = ?")
                .bind(content_hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(blob.map(|b| blob_to_vec(&b)))
    }

    async fn put_cached_embedding(&self, content_hash: &str, embedding: &[f32]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO embedding_cache (content_hash, embedding, dims, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(content_hash) DO NOTHING
            "#,
        )
        .bind(content_hash)
        .bind(vec_to_blob(embedding))
        .bind(embedding.len() as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_context(&self, context: &Context) -> Result<()> {
        let metadata_json = context.metadata.to_value()?.to_string();
        let blob = context.embedding.as_deref().map(vec_to_blob);

        sqlx::query(
            r#"
            INSERT INTO contexts (id, type, metadata_json, embedding, chat_id, message_id,
                                  created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&context.id)
        .bind(context.kind.as_str())
        .bind(&metadata_json)
        .bind(blob)
        .bind(&context.chat_id)
        .bind(&context.message_id)
        .bind(context.created_at)
        .bind(context.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert context {}", context.id))?;

        Ok(())
    }

    async fn context_exists(&self, id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM contexts WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn insert_link(&self, link: &ContextLink) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_contexts (context_id, message_id, metadata_json, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(context_id, message_id) DO NOTHING
            "#,
        )
        .bind(&link.context_id)
        .bind(&link.message_id)
        .bind(link.metadata.to_string())
        .bind(link.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn linked_contexts(&self, message_id: &str) -> Result<Vec<LinkedContext>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.type, c.metadata_json,
                   mc.metadata_json AS link_metadata_json, mc.created_at AS linked_at
            FROM message_contexts mc
            JOIN contexts c ON c.id = mc.context_id
            WHERE mc.message_id = ?
            ORDER BY mc.created_at ASC, mc.rowid ASC
            "#,
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let metadata_json: String = row.get("metadata_json");
                let link_metadata_json: String = row.get("link_metadata_json");
                LinkedContext {
                    id: row.get("id"),
                    kind: row.get("type"),
                    metadata: parse_json(&metadata_json),
                    link_metadata: parse_json(&link_metadata_json),
                    linked_at: row.get("linked_at"),
                }
            })
            .collect())
    }

    async fn match_contexts(&self, query: &MatchQuery<'_>) -> Result<Vec<ContextCandidate>> {
        // Chat-scoped queries still see global (unscoped) contexts.
        let rows = sqlx::query(
            r#"
            SELECT id, type, metadata_json, embedding, updated_at
            FROM contexts
            WHERE embedding IS NOT NULL
              AND (?1 IS NULL OR chat_id IS NULL OR chat_id = ?1)
            "#,
        )
        .bind(query.chat_id)
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows
            .iter()
            .filter(|row| kind_allowed(row, query.kinds))
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query.embedding, &blob_to_vec(&blob)) as f64;
                if similarity < query.threshold {
                    return None;
                }
                let metadata_json: String = row.get("metadata_json");
                Some(ContextCandidate {
                    id: row.get("id"),
                    kind: row.get("type"),
                    metadata: parse_json(&metadata_json),
                    similarity,
                    updated_at: row.get("updated_at"),
                })
            })
            .collect();

        Ok(candidates)
    }

    async fn find_contexts_by_name(&self, query: &NameQuery<'_>) -> Result<Vec<ContextCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT id, type, metadata_json, updated_at
            FROM contexts
            WHERE ?1 IS NULL OR chat_id IS NULL OR chat_id = ?1
            "#,
        )
        .bind(query.chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter(|row| kind_allowed(row, query.kinds))
            .filter_map(|row| {
                let metadata_json: String = row.get("metadata_json");
                let metadata = parse_json(&metadata_json);
                name_matches(&metadata, query.needle).then(|| ContextCandidate {
                    id: row.get("id"),
                    kind: row.get("type"),
                    metadata,
                    similarity: 0.0,
                    updated_at: row.get("updated_at"),
                })
            })
            .collect())
    }

    async fn enqueue_job(&self, job: &EmbeddingJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embedding_queue (id, content_id, content_type, status, last_error,
                                         created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.content_id)
        .bind(job.content_type.as_str())
        .bind(job.status.as_str())
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<EmbeddingJob>> {
        let row = sqlx::query(
            "SELECT id, content_id, content_type, status, last_error, created_at, updated_at FROM embedding_queue WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn update_job_status(
        &self,
        id: &str,
        expected: JobStatus,
        status: JobStatus,
        last_error: Option<&str>,
        updated_at: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE embedding_queue SET status = ?, last_error = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(status.as_str())
        .bind(last_error)
        .bind(updated_at)
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn pending_jobs(&self, limit: usize) -> Result<Vec<EmbeddingJob>> {
        let rows = sqlx::query(
            r#"
            SELECT id, content_id, content_type, status, last_error, created_at, updated_at
            FROM embedding_queue
            WHERE status = 'pending'
            ORDER BY created_at ASC, rowid ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_job).collect()
    }
}
