//! Cached embedding generation.
//!
//! Every vector passes through the content-addressed cache first. The key
//! is [`content_hash`] of the text and optional image URL, so identical
//! input never reaches the provider twice once a write has succeeded.
//!
//! Cache reads that fail are treated as misses and cache writes that fail
//! are logged and dropped; only provider failures reach the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use serde::Serialize;

use chat_context_core::embedding::{content_hash, EmbeddingProvider};
use chat_context_core::store::Store;
use chat_context_core::PipelineError;

/// Counters for cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub provider_calls: u64,
}

pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn Store>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    provider_calls: AtomicU64,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, store: Arc<dyn Store>) -> Self {
        Self {
            provider,
            store,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            provider_calls: AtomicU64::new(0),
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
        }
    }

    /// Embed a single piece of text.
    pub async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        self.generate_embedding_with_image(text, None).await
    }

    /// Embed text that accompanies an image. The image URL is part of the
    /// cache key and is passed to the provider on its own line.
    pub async fn generate_embedding_with_image(
        &self,
        text: &str,
        image_url: Option<&str>,
    ) -> Result<Vec<f32>> {
        let hash = content_hash(text, image_url);
        if let Some(cached) = self.lookup(&hash).await {
            return Ok(cached);
        }

        let input = match image_url {
            Some(url) if !url.is_empty() => format!("{}\n{}", text, url),
            _ => text.to_string(),
        };
        let mut vectors = self.call_provider(&[input]).await?;
        let vector = vectors.pop().ok_or_else(|| {
            PipelineError::Transport("embedding provider returned no vectors".to_string())
        })?;

        self.store_in_cache(&hash, &vector).await;
        Ok(vector)
    }

    /// Embed many texts, reading the cache concurrently and sending only the
    /// distinct misses to the provider in one call. Output order matches input.
    pub async fn batch_generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let hashes: Vec<String> = texts.iter().map(|t| content_hash(t, None)).collect();
        let lookups = join_all(hashes.iter().map(|h| self.lookup(h))).await;

        let mut results: Vec<Option<Vec<f32>>> = lookups;
        let mut miss_index: HashMap<&str, usize> = HashMap::new();
        let mut miss_texts: Vec<String> = Vec::new();
        for (i, slot) in results.iter().enumerate() {
            if slot.is_none() && !miss_index.contains_key(hashes[i].as_str()) {
                miss_index.insert(hashes[i].as_str(), miss_texts.len());
                miss_texts.push(texts[i].clone());
            }
        }

        if !miss_texts.is_empty() {
            let vectors = self.call_provider(&miss_texts).await?;
            if vectors.len() != miss_texts.len() {
                return Err(PipelineError::Transport(format!(
                    "embedding provider returned {} vectors for {} inputs",
                    vectors.len(),
                    miss_texts.len()
                ))
                .into());
            }

            for (hash, &position) in &miss_index {
                self.store_in_cache(hash, &vectors[position]).await;
            }
            for (i, slot) in results.iter_mut().enumerate() {
                if slot.is_none() {
                    if let Some(&position) = miss_index.get(hashes[i].as_str()) {
                        *slot = Some(vectors[position].clone());
                    }
                }
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    async fn lookup(&self, hash: &str) -> Option<Vec<f32>> {
        match self.store.get_cached_embedding(hash).await {
            Ok(Some(vector)) if !vector.is_empty() => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(content_hash = hash, "embedding cache hit");
                Some(vector)
            }
            Ok(_) => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(content_hash = hash, "embedding cache miss");
                None
            }
            Err(e) => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(content_hash = hash, error = %e, "embedding cache read failed");
                None
            }
        }
    }

    async fn call_provider(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
        let vectors = self
            .provider
            .embed(inputs)
            .await
            .map_err(|e| PipelineError::Transport(format!("{:#}", e)))?;

        if vectors.is_empty() || vectors.iter().any(|v| v.is_empty()) {
            return Err(
                PipelineError::Transport("embedding provider returned an empty vector".into())
                    .into(),
            );
        }
        Ok(vectors)
    }

    async fn store_in_cache(&self, hash: &str, vector: &[f32]) {
        if let Err(e) = self.store.put_cached_embedding(hash, vector).await {
            let err = PipelineError::CacheWrite {
                content_hash: hash.to_string(),
                message: format!("{:#}", e),
            };
            tracing::warn!("{}", err);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use chat_context_core::store::memory::InMemoryStore;
    use std::sync::Mutex;

    /// Deterministic provider: vector = [len, first byte, 1.0]. Records each call.
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub calls: Mutex<Vec<Vec<String>>>,
        pub fail: bool,
        pub empty: bool,
    }

    impl FakeProvider {
        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        fn model_name(&self) -> &str {
            "fake"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.lock().unwrap().push(texts.to_vec());
            if self.fail {
                anyhow::bail!("provider offline");
            }
            if self.empty {
                return Ok(vec![Vec::new(); texts.len()]);
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let first = t.bytes().next().unwrap_or(0) as f32;
                    vec![t.len() as f32, first, 1.0]
                })
                .collect())
        }
    }

    fn gateway(provider: Arc<FakeProvider>, store: Arc<InMemoryStore>) -> EmbeddingGateway {
        EmbeddingGateway::new(provider, store)
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let provider = Arc::new(FakeProvider::default());
        let store = Arc::new(InMemoryStore::default());
        let gw = gateway(provider.clone(), store.clone());

        let first = gw.generate_embedding("hello").await.unwrap();
        let second = gw.generate_embedding("hello").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(
            gw.stats(),
            GatewayStats {
                cache_hits: 1,
                cache_misses: 1,
                provider_calls: 1
            }
        );
        assert!(store
            .get_cached_embedding(&content_hash("hello", None))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_image_url_changes_cache_key() {
        let provider = Arc::new(FakeProvider::default());
        let gw = gateway(provider.clone(), Arc::new(InMemoryStore::default()));

        gw.generate_embedding("caption").await.unwrap();
        gw.generate_embedding_with_image("caption", Some("https://img.example/x.png"))
            .await
            .unwrap();
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cache_write_failure_is_swallowed() {
        let provider = Arc::new(FakeProvider::default());
        let store = Arc::new(InMemoryStore::default());
        store.set_fail_cache_writes(true);
        let gw = gateway(provider.clone(), store.clone());

        let vector = gw.generate_embedding("hello").await.unwrap();
        assert_eq!(vector, vec![5.0, b'h' as f32, 1.0]);
        assert_eq!(store.cached_entries(), 0);

        // Nothing was cached, so the provider is called again.
        gw.generate_embedding("hello").await.unwrap();
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_is_transport_error() {
        let provider = Arc::new(FakeProvider {
            fail: true,
            ..Default::default()
        });
        let store = Arc::new(InMemoryStore::default());
        let gw = gateway(provider, store.clone());

        let err = gw.generate_embedding("hello").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Transport(_))
        ));
        assert_eq!(store.cached_entries(), 0);
    }

    #[tokio::test]
    async fn test_empty_vector_is_not_cached() {
        let provider = Arc::new(FakeProvider {
            empty: true,
            ..Default::default()
        });
        let store = Arc::new(InMemoryStore::default());
        let gw = gateway(provider, store.clone());

        assert!(gw.generate_embedding("hello").await.is_err());
        assert_eq!(store.cached_entries(), 0);
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_embeds_misses_once() {
        let provider = Arc::new(FakeProvider::default());
        let gw = gateway(provider.clone(), Arc::new(InMemoryStore::default()));

        gw.generate_embedding("bb").await.unwrap();

        let texts: Vec<String> = ["a", "bb", "ccc", "a"].iter().map(|s| s.to_string()).collect();
        let vectors = gw.batch_generate_embeddings(&texts).await.unwrap();

        assert_eq!(vectors.len(), 4);
        assert_eq!(vectors[0][0], 1.0);
        assert_eq!(vectors[1][0], 2.0);
        assert_eq!(vectors[2][0], 3.0);
        assert_eq!(vectors[3], vectors[0]);

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], vec!["a".to_string(), "ccc".to_string()]);
    }

    #[tokio::test]
    async fn test_batch_empty_input() {
        let provider = Arc::new(FakeProvider::default());
        let gw = gateway(provider.clone(), Arc::new(InMemoryStore::default()));
        assert!(gw.batch_generate_embeddings(&[]).await.unwrap().is_empty());
        assert_eq!(provider.call_count(), 0);
    }
}
