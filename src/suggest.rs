//! Debounced, cancellable suggestion lookups.
//!
//! [`SuggestionOrchestrator::get_suggestions`] is called on every keystroke.
//! Each call arms a debounce delay and supersedes whatever call was pending
//! before it, so only the most recent input ever produces a result. A
//! superseded call resolves to `None` and stops at its next await.
//!
//! ```text
//! get_suggestions("hel")  ──arm──► sleep ✗ (superseded → None)
//! get_suggestions("hello") ─arm──► sleep ─► embed ─► index ∥ media ─► merge ─► Some(result)
//! get_suggestions("@ada")  ─arm──► name lookup ─► Some(result)
//! ```
//!
//! Explicit triggers (`@`, `#`, `>`, URLs) skip the debounce and the
//! embedding and resolve through a name lookup, but still take part in
//! last-call-wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use chat_context_core::models::{ContextKind, Reference};
use chat_context_core::search::merge_suggestions;
use chat_context_core::trigger::{classify, lookup_for, TriggerLookup};

use crate::cancel::{cancel_pair, CancelHandle, CancelToken, Clock, TokioClock};
use crate::config::SuggestionsConfig;
use crate::gateway::EmbeddingGateway;
use crate::media::MediaSearch;
use crate::similarity::{SimilarityOptions, SimilaritySearch};

#[derive(Debug, Clone)]
pub struct SuggestionOptions {
    /// Restrict index results to these kinds; empty means all.
    pub kinds: Vec<ContextKind>,
    pub limit: usize,
    pub debounce: Duration,
    pub chat_id: Option<String>,
}

impl Default for SuggestionOptions {
    fn default() -> Self {
        Self::from_config(&SuggestionsConfig::default())
    }
}

impl SuggestionOptions {
    pub fn from_config(config: &SuggestionsConfig) -> Self {
        Self {
            kinds: Vec::new(),
            limit: config.limit,
            debounce: config.debounce(),
            chat_id: None,
        }
    }
}

/// Outcome of a debounce cycle that was not superseded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuggestionResult {
    pub contexts: Vec<Reference>,
    pub loading: bool,
    pub error: Option<String>,
}

impl SuggestionResult {
    fn failed(err: &anyhow::Error) -> Self {
        Self {
            contexts: Vec::new(),
            loading: false,
            error: Some(format!("{:#}", err)),
        }
    }
}

struct PendingQuery {
    generation: u64,
    query: String,
    cancel: CancelHandle,
}

pub struct SuggestionOrchestrator {
    gateway: Arc<EmbeddingGateway>,
    similarity: Arc<SimilaritySearch>,
    media: Arc<dyn MediaSearch>,
    clock: Arc<dyn Clock>,
    threshold: f64,
    min_query_chars: usize,
    generation: AtomicU64,
    pending: Mutex<Option<PendingQuery>>,
}

impl SuggestionOrchestrator {
    pub fn new(
        gateway: Arc<EmbeddingGateway>,
        similarity: Arc<SimilaritySearch>,
        media: Arc<dyn MediaSearch>,
        config: &SuggestionsConfig,
    ) -> Self {
        Self {
            gateway,
            similarity,
            media,
            clock: Arc::new(TokioClock),
            threshold: config.threshold,
            min_query_chars: config.min_query_chars,
            generation: AtomicU64::new(0),
            pending: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn media(&self) -> Arc<dyn MediaSearch> {
        self.media.clone()
    }

    /// Debounced suggestions for `text`.
    ///
    /// Returns an empty result immediately for short input, `None` if a later
    /// call superseded this one, and otherwise the merged index and media
    /// references. Failures are reported in [`SuggestionResult::error`].
    pub async fn get_suggestions(
        &self,
        text: &str,
        options: &SuggestionOptions,
    ) -> Option<SuggestionResult> {
        if text.chars().count() < self.min_query_chars {
            return Some(SuggestionResult::default());
        }

        let lookup = lookup_for(&classify(text));
        let (generation, token) = self.arm(text);
        let result = match &lookup {
            Some(lookup) => self.fire_trigger(lookup, options, &token).await,
            None => self.fire(text, options, &token).await,
        };
        self.disarm(generation);

        if token.is_cancelled() {
            tracing::debug!(query = text, "suggestion superseded");
            return None;
        }
        result
    }

    /// Cancel the pending call, if any. Idempotent.
    pub fn cancel_pending(&self) {
        if let Some(pending) = self.slot().take() {
            tracing::debug!(query = %pending.query, "suggestion cancelled");
            pending.cancel.cancel();
        }
    }

    /// The query of the call currently waiting or running, if any.
    pub fn pending_query(&self) -> Option<String> {
        self.slot().as_ref().map(|p| p.query.clone())
    }

    fn slot(&self) -> MutexGuard<'_, Option<PendingQuery>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(&self, text: &str) -> (u64, CancelToken) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (handle, token) = cancel_pair();
        let previous = self.slot().replace(PendingQuery {
            generation,
            query: text.to_string(),
            cancel: handle,
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        (generation, token)
    }

    fn disarm(&self, generation: u64) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|p| p.generation == generation) {
            slot.take();
        }
    }

    async fn fire(
        &self,
        text: &str,
        options: &SuggestionOptions,
        token: &CancelToken,
    ) -> Option<SuggestionResult> {
        token.guard(self.clock.sleep(options.debounce)).await?;

        let embedding = match token.guard(self.gateway.generate_embedding(text)).await? {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, "suggestion embedding failed");
                return Some(SuggestionResult::failed(&e));
            }
        };

        let similarity_options = self.similarity_options(options);
        let (index, media) = token
            .guard(async {
                tokio::join!(
                    self.similarity
                        .find_similar_content(&embedding, &similarity_options),
                    self.media.find_references(text),
                )
            })
            .await?;

        let (index, media) = match (index, media) {
            (Ok(index), Ok(media)) => (index, media),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "suggestion search failed");
                return Some(SuggestionResult::failed(&e));
            }
        };

        Some(SuggestionResult {
            contexts: merge_suggestions(index, media, options.limit),
            loading: false,
            error: None,
        })
    }

    async fn fire_trigger(
        &self,
        lookup: &TriggerLookup,
        options: &SuggestionOptions,
        token: &CancelToken,
    ) -> Option<SuggestionResult> {
        let similarity_options = self.similarity_options(options);
        match token
            .guard(self.similarity.find_by_trigger(lookup, &similarity_options))
            .await?
        {
            Ok(contexts) => Some(SuggestionResult {
                contexts,
                loading: false,
                error: None,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "trigger lookup failed");
                Some(SuggestionResult::failed(&e))
            }
        }
    }

    fn similarity_options(&self, options: &SuggestionOptions) -> SimilarityOptions {
        SimilarityOptions {
            threshold: self.threshold,
            limit: options.limit,
            kinds: options.kinds.clone(),
            chat_id: options.chat_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::tests::ImmediateClock;
    use crate::gateway::tests::FakeProvider;
    use anyhow::Result;
    use async_trait::async_trait;
    use chat_context_core::models::{
        Context, ContextMetadata, ReferenceKind, ReferenceSource, TopicMetadata, UserMetadata,
    };
    use chat_context_core::store::memory::InMemoryStore;
    use chat_context_core::store::Store;

    struct StaticMedia {
        refs: Vec<Reference>,
        fail: bool,
    }

    #[async_trait]
    impl MediaSearch for StaticMedia {
        async fn find_references(&self, _query: &str) -> Result<Vec<Reference>> {
            if self.fail {
                anyhow::bail!("media search unavailable");
            }
            Ok(self.refs.clone())
        }
    }

    fn media_ref(id: &str, similarity: f64) -> Reference {
        Reference {
            id: id.to_string(),
            kind: ReferenceKind::Media,
            title: id.to_string(),
            preview: None,
            metadata: None,
            similarity,
            source: ReferenceSource::Media,
            updated_at: None,
        }
    }

    struct Harness {
        provider: Arc<FakeProvider>,
        store: Arc<InMemoryStore>,
        orchestrator: Arc<SuggestionOrchestrator>,
    }

    fn harness(provider: FakeProvider, media: StaticMedia, clock: Arc<dyn Clock>) -> Harness {
        let provider = Arc::new(provider);
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(EmbeddingGateway::new(provider.clone(), store.clone()));
        let similarity = Arc::new(SimilaritySearch::new(store.clone()));
        let orchestrator = SuggestionOrchestrator::new(
            gateway,
            similarity,
            Arc::new(media),
            &SuggestionsConfig::default(),
        )
        .with_clock(clock);
        Harness {
            provider,
            store,
            orchestrator: Arc::new(orchestrator),
        }
    }

    fn no_media() -> StaticMedia {
        StaticMedia {
            refs: Vec::new(),
            fail: false,
        }
    }

    #[tokio::test]
    async fn test_short_input_is_empty_without_calls() {
        let h = harness(FakeProvider::default(), no_media(), Arc::new(ImmediateClock));
        let result = h
            .orchestrator
            .get_suggestions("hi", &SuggestionOptions::default())
            .await;

        assert_eq!(result, Some(SuggestionResult::default()));
        assert_eq!(h.provider.call_count(), 0);
        assert_eq!(h.store.match_calls(), 0);
        assert!(h.orchestrator.pending_query().is_none());
    }

    #[tokio::test]
    async fn test_merges_index_and_media_results() {
        let media = StaticMedia {
            refs: vec![media_ref("clip", 0.9)],
            fail: false,
        };
        let h = harness(FakeProvider::default(), media, Arc::new(ImmediateClock));

        // FakeProvider embeds "hello" as [5, 'h', 1]; store an identical vector.
        let topic = Context::new(
            ContextMetadata::Topic(TopicMetadata {
                title: Some("Greetings".into()),
                ..Default::default()
            }),
            Some(vec![5.0, b'h' as f32, 1.0]),
            1,
        );
        h.store.insert_context(&topic).await.unwrap();

        let result = h
            .orchestrator
            .get_suggestions("hello", &SuggestionOptions::default())
            .await
            .unwrap();

        assert!(result.error.is_none());
        assert!(!result.loading);
        assert_eq!(result.contexts.len(), 2);
        assert_eq!(result.contexts[0].title, "Greetings");
        assert_eq!(result.contexts[0].source, ReferenceSource::Index);
        assert_eq!(result.contexts[1].source, ReferenceSource::Media);
        assert!(h.orchestrator.pending_query().is_none());
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_raised() {
        let provider = FakeProvider {
            fail: true,
            ..Default::default()
        };
        let h = harness(provider, no_media(), Arc::new(ImmediateClock));

        let result = h
            .orchestrator
            .get_suggestions("hello", &SuggestionOptions::default())
            .await
            .unwrap();
        assert!(result.contexts.is_empty());
        assert!(!result.loading);
        assert!(result.error.unwrap().contains("provider offline"));
    }

    #[tokio::test]
    async fn test_media_failure_is_reported() {
        let media = StaticMedia {
            refs: Vec::new(),
            fail: true,
        };
        let h = harness(FakeProvider::default(), media, Arc::new(ImmediateClock));

        let result = h
            .orchestrator
            .get_suggestions("hello", &SuggestionOptions::default())
            .await
            .unwrap();
        assert!(result.error.unwrap().contains("media search unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_call_wins() {
        let h = harness(FakeProvider::default(), no_media(), Arc::new(TokioClock));
        let options = SuggestionOptions::default();

        let first = {
            let orchestrator = h.orchestrator.clone();
            let options = options.clone();
            tokio::spawn(async move { orchestrator.get_suggestions("hello", &options).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(h.orchestrator.pending_query().as_deref(), Some("hello"));

        let second = h.orchestrator.get_suggestions("hello world", &options).await;

        assert!(first.await.unwrap().is_none());
        assert!(second.is_some());
        let calls = h.provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["hello world".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_stops_work() {
        let h = harness(FakeProvider::default(), no_media(), Arc::new(TokioClock));

        let task = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .get_suggestions("hello", &SuggestionOptions::default())
                    .await
            })
        };
        tokio::task::yield_now().await;

        h.orchestrator.cancel_pending();
        h.orchestrator.cancel_pending();

        assert!(task.await.unwrap().is_none());
        assert!(h.orchestrator.pending_query().is_none());
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_user_trigger_skips_embedding() {
        let h = harness(FakeProvider::default(), no_media(), Arc::new(ImmediateClock));
        let ada = Context::new(
            ContextMetadata::User(UserMetadata {
                full_name: Some("Ada Lovelace".into()),
                email: Some("ada@example.com".into()),
                ..Default::default()
            }),
            None,
            1,
        );
        h.store.insert_context(&ada).await.unwrap();

        let result = h
            .orchestrator
            .get_suggestions("@lovelace", &SuggestionOptions::default())
            .await
            .unwrap();

        assert!(result.error.is_none());
        assert_eq!(result.contexts.len(), 1);
        assert_eq!(result.contexts[0].kind, ReferenceKind::User);
        assert_eq!(result.contexts[0].title, "Ada Lovelace");
        assert_eq!(result.contexts[0].source, ReferenceSource::Trigger);
        assert_eq!(h.provider.call_count(), 0);
        assert_eq!(h.store.match_calls(), 0);
    }

    #[tokio::test]
    async fn test_url_trigger_offers_new_link() {
        let h = harness(FakeProvider::default(), no_media(), Arc::new(ImmediateClock));
        let result = h
            .orchestrator
            .get_suggestions("https://example.com/roadmap", &SuggestionOptions::default())
            .await
            .unwrap();
        assert_eq!(result.contexts.len(), 1);
        assert_eq!(result.contexts[0].kind, ReferenceKind::Link);
        assert_eq!(result.contexts[0].preview.as_deref(), Some("Add new link"));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_supersedes_pending_search() {
        let h = harness(FakeProvider::default(), no_media(), Arc::new(TokioClock));
        let options = SuggestionOptions::default();

        let first = {
            let orchestrator = h.orchestrator.clone();
            let options = options.clone();
            tokio::spawn(async move { orchestrator.get_suggestions("hello", &options).await })
        };
        tokio::task::yield_now().await;

        let second = h.orchestrator.get_suggestions("#eng", &options).await;
        assert!(first.await.unwrap().is_none());
        assert_eq!(second, Some(SuggestionResult::default()));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[test]
    fn test_cancel_pending_when_idle() {
        let h = harness(FakeProvider::default(), no_media(), Arc::new(ImmediateClock));
        h.orchestrator.cancel_pending();
        assert!(h.orchestrator.pending_query().is_none());
    }
}
