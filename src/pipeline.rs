//! Wiring for the full pipeline.
//!
//! [`Pipeline::from_config`] connects to SQLite, builds the configured
//! embedding provider and media client, and shares one gateway and one
//! store between every service.
//!
//! Debounce state is per consumer: each [`ReferenceFeed`] and each HTTP
//! client key gets its own [`SuggestionOrchestrator`], so one user's typing
//! never supersedes another's.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;

use chat_context_core::embedding::EmbeddingProvider;
use chat_context_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::feed::ReferenceFeed;
use crate::gateway::EmbeddingGateway;
use crate::jobs::JobQueue;
use crate::links::ContextService;
use crate::media::{create_media_search, MediaSearch};
use crate::migrate;
use crate::similarity::SimilaritySearch;
use crate::sqlite_store::SqliteStore;
use crate::suggest::{SuggestionOptions, SuggestionOrchestrator};

/// Idle consumer orchestrators are dropped once this many are tracked.
const MAX_CONSUMERS: usize = 1024;

pub struct Pipeline {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub gateway: Arc<EmbeddingGateway>,
    pub similarity: Arc<SimilaritySearch>,
    /// Orchestrator for single-consumer callers such as the CLI.
    pub suggestions: Arc<SuggestionOrchestrator>,
    pub contexts: Arc<ContextService>,
    pub jobs: Arc<JobQueue>,
    consumers: Mutex<HashMap<String, Arc<SuggestionOrchestrator>>>,
}

impl Pipeline {
    /// Open the configured database (applying the schema) and build every service.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));

        let provider = create_provider(&config.embedding)?;
        let media = create_media_search(&config.media)?;
        Ok(Self::new(config.clone(), store, provider, media))
    }

    /// Build from explicit parts.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        provider: Arc<dyn EmbeddingProvider>,
        media: Arc<dyn MediaSearch>,
    ) -> Self {
        let gateway = Arc::new(EmbeddingGateway::new(provider, store.clone()));
        let similarity = Arc::new(SimilaritySearch::new(store.clone()));
        let suggestions = Arc::new(SuggestionOrchestrator::new(
            gateway.clone(),
            similarity.clone(),
            media,
            &config.suggestions,
        ));
        let contexts = Arc::new(ContextService::new(
            gateway.clone(),
            similarity.clone(),
            store.clone(),
        ));
        let jobs = Arc::new(JobQueue::new(store.clone()));

        Self {
            config,
            store,
            gateway,
            similarity,
            suggestions,
            contexts,
            jobs,
            consumers: Mutex::new(HashMap::new()),
        }
    }

    /// Default suggestion options from `[suggestions]`.
    pub fn suggestion_options(&self) -> SuggestionOptions {
        SuggestionOptions::from_config(&self.config.suggestions)
    }

    /// A live reference feed for one input box in `chat_id`.
    ///
    /// Each feed gets its own orchestrator so that feeds never supersede
    /// one another.
    pub fn reference_feed(&self, chat_id: Option<String>) -> ReferenceFeed {
        ReferenceFeed::new(self.new_orchestrator(), chat_id, self.suggestion_options())
    }

    /// The orchestrator owned by `consumer`, created on first use.
    ///
    /// Calls with the same key supersede one another; different keys never
    /// interact. When the map is full, orchestrators with nothing pending are
    /// evicted first.
    pub fn orchestrator_for(&self, consumer: &str) -> Arc<SuggestionOrchestrator> {
        let mut consumers = self
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = consumers.get(consumer) {
            return existing.clone();
        }
        if consumers.len() >= MAX_CONSUMERS {
            consumers.retain(|_, o| o.pending_query().is_some());
            tracing::debug!(remaining = consumers.len(), "evicted idle suggestion consumers");
        }
        let orchestrator = self.new_orchestrator();
        consumers.insert(consumer.to_string(), orchestrator.clone());
        orchestrator
    }

    fn new_orchestrator(&self) -> Arc<SuggestionOrchestrator> {
        Arc::new(SuggestionOrchestrator::new(
            self.gateway.clone(),
            self.similarity.clone(),
            self.suggestions.media(),
            &self.config.suggestions,
        ))
    }
}
