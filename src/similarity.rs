//! Lookups over stored contexts: nearest-neighbor by embedding, and by name
//! for explicit triggers.

use std::sync::Arc;

use anyhow::Result;

use chat_context_core::models::{ContextKind, Reference};
use chat_context_core::search::{
    new_link_reference, rank_candidates, rank_name_matches, DEFAULT_LIMIT, DEFAULT_THRESHOLD,
};
use chat_context_core::store::{MatchQuery, NameQuery, Store};
use chat_context_core::trigger::TriggerLookup;

/// Parameters for [`SimilaritySearch::find_similar_content`].
#[derive(Debug, Clone)]
pub struct SimilarityOptions {
    pub threshold: f64,
    pub limit: usize,
    /// Restrict to these kinds; empty means all.
    pub kinds: Vec<ContextKind>,
    pub chat_id: Option<String>,
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            limit: DEFAULT_LIMIT,
            kinds: Vec::new(),
            chat_id: None,
        }
    }
}

pub struct SimilaritySearch {
    store: Arc<dyn Store>,
}

impl SimilaritySearch {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Rank stored contexts against `embedding`. Read-only.
    pub async fn find_similar_content(
        &self,
        embedding: &[f32],
        options: &SimilarityOptions,
    ) -> Result<Vec<Reference>> {
        if options.limit == 0 || embedding.is_empty() {
            return Ok(Vec::new());
        }

        let query = MatchQuery {
            embedding,
            threshold: options.threshold,
            kinds: &options.kinds,
            chat_id: options.chat_id.as_deref(),
        };
        let candidates = self.store.match_contexts(&query).await?;
        tracing::debug!(candidates = candidates.len(), "similarity candidates");

        Ok(rank_candidates(candidates, options.threshold, options.limit))
    }

    /// Resolve an explicit trigger without embedding anything.
    ///
    /// Name lookups honor `options.kinds` (when non-empty), `chat_id`, and
    /// `limit`; `threshold` does not apply. A URL trigger yields the single
    /// "Add new link" reference.
    pub async fn find_by_trigger(
        &self,
        lookup: &TriggerLookup,
        options: &SimilarityOptions,
    ) -> Result<Vec<Reference>> {
        if options.limit == 0 {
            return Ok(Vec::new());
        }
        let (kinds, needle) = match lookup {
            TriggerLookup::NewLink { url } => return Ok(vec![new_link_reference(url)]),
            TriggerLookup::Contexts { kinds, query } => (*kinds, query.as_str()),
        };

        let kinds: Vec<ContextKind> = kinds
            .iter()
            .copied()
            .filter(|k| options.kinds.is_empty() || options.kinds.contains(k))
            .collect();
        if kinds.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self
            .store
            .find_contexts_by_name(&NameQuery {
                needle,
                kinds: &kinds,
                chat_id: options.chat_id.as_deref(),
            })
            .await?;
        tracing::debug!(candidates = candidates.len(), needle, "trigger candidates");

        Ok(rank_name_matches(candidates, options.limit))
    }
}
