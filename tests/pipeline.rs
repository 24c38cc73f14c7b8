//! End-to-end pipeline tests against a temporary SQLite database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use chat_context::config::Config;
use chat_context::embedding::EmbeddingProvider;
use chat_context::media::DisabledMediaSearch;
use chat_context::pipeline::Pipeline;
use chat_context::similarity::SimilarityOptions;
use chat_context::sqlite_store::SqliteStore;
use chat_context::{db, migrate, stats};
use chat_context_core::embedding::{content_hash, vec_to_blob};
use chat_context_core::models::{ContentType, ContextKind, JobStatus, ReferenceSource};
use chat_context_core::error::PipelineError;
use chat_context_core::store::Store;

/// Maps text to a fixed 3-d vector by keyword so similarity is predictable.
#[derive(Default)]
struct KeywordProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                if t.contains("launch") {
                    vec![1.0, 0.1, 0.0]
                } else if t.contains("budget") {
                    vec![0.0, 1.0, 0.1]
                } else {
                    vec![0.0, 0.0, 1.0]
                }
            })
            .collect())
    }
}

fn test_config(tmp: &TempDir) -> Config {
    let toml_src = format!(
        "[db]\npath = \"{}\"\n[suggestions]\ndebounce_ms = 5\n",
        tmp.path().join("data/cctx.sqlite").display()
    );
    toml::from_str(&toml_src).unwrap()
}

async fn setup() -> (TempDir, Pipeline, Arc<KeywordProvider>) {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();

    let provider = Arc::new(KeywordProvider::default());
    let pipeline = Pipeline::new(
        config,
        Arc::new(SqliteStore::new(pool)),
        provider.clone(),
        Arc::new(DisabledMediaSearch),
    );
    (tmp, pipeline, provider)
}

#[tokio::test]
async fn test_create_link_and_list_contexts() {
    let (_tmp, pipeline, _) = setup().await;

    let ctx = pipeline
        .contexts
        .create_context("hello", ContextKind::File, json!({"name": "a.txt"}), None)
        .await
        .unwrap();

    let created = pipeline
        .contexts
        .link_context_to_message(&ctx.id, "m1", json!({}))
        .await
        .unwrap();
    assert!(created);

    let shown = pipeline.contexts.get_message_contexts("m1").await.unwrap();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "a.txt");
    assert_eq!(shown[0].kind, ContextKind::File);
    assert_eq!(shown[0].id, ctx.id);
}

#[tokio::test]
async fn test_duplicate_link_creates_one_row() {
    let (_tmp, pipeline, _) = setup().await;
    let ctx = pipeline
        .contexts
        .create_context("budget review", ContextKind::Thread, json!({"title": "Budget"}), None)
        .await
        .unwrap();

    assert!(pipeline
        .contexts
        .link_context_to_message(&ctx.id, "m1", json!({}))
        .await
        .unwrap());
    assert!(!pipeline
        .contexts
        .link_context_to_message(&ctx.id, "m1", json!({"again": true}))
        .await
        .unwrap());

    let shown = pipeline.contexts.get_message_contexts("m1").await.unwrap();
    assert_eq!(shown.len(), 1);
    assert!(shown[0].link_metadata.get("again").is_none());
}

#[tokio::test]
async fn test_message_contexts_keep_link_order() {
    let (_tmp, pipeline, _) = setup().await;
    let first = pipeline
        .contexts
        .create_context("launch", ContextKind::User, json!({"full_name": "Ada Lovelace", "email": "ada@example.com"}), None)
        .await
        .unwrap();
    let second = pipeline
        .contexts
        .create_context("budget", ContextKind::Link, json!({"url": "https://example.com"}), None)
        .await
        .unwrap();

    for ctx in [&first, &second] {
        pipeline
            .contexts
            .link_context_to_message(&ctx.id, "m9", json!({}))
            .await
            .unwrap();
    }

    let shown = pipeline.contexts.get_message_contexts("m9").await.unwrap();
    assert_eq!(shown.len(), 2);
    assert_eq!(shown[0].title, "Ada Lovelace");
    assert_eq!(shown[0].subtitle.as_deref(), Some("ada@example.com"));
    assert_eq!(shown[1].kind, ContextKind::Topic);
    assert_eq!(shown[1].title, "Untitled");
}

#[tokio::test]
async fn test_embedding_cache_persists() {
    let (_tmp, pipeline, provider) = setup().await;

    pipeline.gateway.generate_embedding("launch plan").await.unwrap();
    pipeline.gateway.generate_embedding("launch plan").await.unwrap();
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    let cached = pipeline
        .store
        .get_cached_embedding(&content_hash("launch plan", None))
        .await
        .unwrap();
    assert_eq!(cached, Some(vec![1.0, 0.1, 0.0]));
}

#[tokio::test]
async fn test_similar_contexts_ranked_and_scoped() {
    let (_tmp, pipeline, _) = setup().await;
    pipeline
        .contexts
        .create_context("launch checklist", ContextKind::File, json!({"name": "checklist.md"}), None)
        .await
        .unwrap();
    pipeline
        .contexts
        .create_context("launch retro", ContextKind::Topic, json!({"title": "Retro"}), Some("chat-b".into()))
        .await
        .unwrap();
    pipeline
        .contexts
        .create_context("budget", ContextKind::Topic, json!({"title": "Budget"}), None)
        .await
        .unwrap();

    let all = pipeline
        .contexts
        .find_similar_contexts("launch", &SimilarityOptions::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|r| r.similarity >= 0.7));

    let scoped = pipeline
        .contexts
        .find_similar_contexts(
            "launch",
            &SimilarityOptions {
                chat_id: Some("chat-a".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].title, "checklist.md");
}

#[tokio::test]
async fn test_suggestions_end_to_end() {
    let (_tmp, pipeline, _) = setup().await;
    pipeline
        .contexts
        .create_context("launch plan", ContextKind::File, json!({"name": "plan.md", "preview": "Q3 goals"}), None)
        .await
        .unwrap();

    let result = pipeline
        .suggestions
        .get_suggestions("launch", &pipeline.suggestion_options())
        .await
        .unwrap();

    assert!(result.error.is_none());
    assert_eq!(result.contexts.len(), 1);
    assert_eq!(result.contexts[0].title, "plan.md");
    assert_eq!(result.contexts[0].preview.as_deref(), Some("Q3 goals"));
    assert_eq!(result.contexts[0].source, ReferenceSource::Index);
}

#[tokio::test]
async fn test_reference_feed_over_sqlite() {
    let (_tmp, pipeline, _) = setup().await;
    pipeline
        .contexts
        .create_context("budget sheet", ContextKind::File, json!({"name": "budget.xlsx"}), None)
        .await
        .unwrap();

    let mut feed = pipeline.reference_feed(Some("chat-1".into()));
    let mut rx = feed.subscribe();
    feed.set_text("budget");

    let state = rx.wait_for(|s| !s.is_loading).await.unwrap().clone();
    assert_eq!(state.references.len(), 1);
    assert_eq!(state.references[0].title, "budget.xlsx");
}

#[tokio::test]
async fn test_job_queue_over_sqlite() {
    let (_tmp, pipeline, _) = setup().await;

    let a = pipeline
        .jobs
        .queue_for_embedding("file-1", ContentType::File)
        .await
        .unwrap();
    let b = pipeline
        .jobs
        .queue_for_embedding("ctx-1", ContentType::Context)
        .await
        .unwrap();

    let pending = pipeline.jobs.pending_jobs(10).await.unwrap();
    let ids: Vec<&str> = pending.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec![a.as_str(), b.as_str()]);

    pipeline
        .jobs
        .advance(&a, JobStatus::Processing, None)
        .await
        .unwrap();
    pipeline
        .jobs
        .advance(&a, JobStatus::Completed, None)
        .await
        .unwrap();

    let report = pipeline.jobs.check_embedding_status(&a).await;
    assert_eq!(report.status, JobStatus::Completed);
    assert!(pipeline
        .jobs
        .advance(&a, JobStatus::Failed, Some("late"))
        .await
        .is_err());
    assert_eq!(pipeline.jobs.pending_jobs(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_legacy_url_rows_match_link_filter() {
    let (tmp, pipeline, _) = setup().await;
    let pool = db::connect(&test_config(&tmp)).await.unwrap();
    sqlx::query(
        "INSERT INTO contexts (id, type, metadata_json, embedding, chat_id, message_id, created_at, updated_at) \
         VALUES ('old-link', 'url', ?, ?, NULL, NULL, 1, 1)",
    )
    .bind(json!({"title": "Launch doc", "url": "https://a.dev/launch"}).to_string())
    .bind(vec_to_blob(&[1.0, 0.1, 0.0]))
    .execute(&pool)
    .await
    .unwrap();

    let links = pipeline
        .contexts
        .find_similar_contexts(
            "launch",
            &SimilarityOptions {
                kinds: vec![ContextKind::Link],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].id, "old-link");

    let users = pipeline
        .contexts
        .find_similar_contexts(
            "launch",
            &SimilarityOptions {
                kinds: vec![ContextKind::User],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(users.is_empty());
}

#[tokio::test]
async fn test_concurrent_advance_over_sqlite_has_one_winner() {
    let (_tmp, pipeline, _) = setup().await;
    let id = pipeline
        .jobs
        .queue_for_embedding("file-1", ContentType::File)
        .await
        .unwrap();
    pipeline
        .jobs
        .advance(&id, JobStatus::Processing, None)
        .await
        .unwrap();

    let (done, failed) = tokio::join!(
        pipeline.jobs.advance(&id, JobStatus::Completed, None),
        pipeline.jobs.advance(&id, JobStatus::Failed, Some("timeout")),
    );
    let winners = [done.is_ok(), failed.is_ok()]
        .iter()
        .filter(|ok| **ok)
        .count();
    assert_eq!(winners, 1);

    let loser = done.err().or(failed.err()).unwrap();
    let stored = pipeline.store.get_job(&id).await.unwrap().unwrap();
    match loser.downcast_ref::<PipelineError>() {
        Some(PipelineError::InvalidTransition { from, .. }) => assert_eq!(*from, stored.status),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_reference_feed_resolves_mentions_without_embedding() {
    let (_tmp, pipeline, provider) = setup().await;
    pipeline
        .contexts
        .create_context("ada", ContextKind::User, json!({"full_name": "Ada Lovelace"}), None)
        .await
        .unwrap();
    let calls_after_create = provider.calls.load(Ordering::SeqCst);

    let mut feed = pipeline.reference_feed(None);
    let mut rx = feed.subscribe();
    feed.set_text("@ada");

    let state = rx.wait_for(|s| !s.is_loading).await.unwrap().clone();
    assert_eq!(state.references.len(), 1);
    assert_eq!(state.references[0].title, "Ada Lovelace");
    assert_eq!(state.references[0].source, ReferenceSource::Trigger);
    assert_eq!(provider.calls.load(Ordering::SeqCst), calls_after_create);
}

#[tokio::test]
async fn test_stats_counts() {
    let (tmp, pipeline, _) = setup().await;
    let ctx = pipeline
        .contexts
        .create_context("launch", ContextKind::Topic, json!({"title": "Launch"}), None)
        .await
        .unwrap();
    pipeline
        .contexts
        .link_context_to_message(&ctx.id, "m1", json!({}))
        .await
        .unwrap();
    pipeline
        .jobs
        .queue_for_embedding("m1", ContentType::Message)
        .await
        .unwrap();

    let pool = db::connect(&test_config(&tmp)).await.unwrap();
    let s = stats::collect_stats(&pool).await.unwrap();
    assert_eq!(s.contexts, 1);
    assert_eq!(s.links, 1);
    assert_eq!(s.cached_embeddings, 1);
    assert_eq!(s.by_kind[0].kind, "topic");
    assert_eq!(s.by_kind[0].embedded, 1);
    assert_eq!(s.jobs, vec![("pending".to_string(), 1)]);
}
