//! Reusable contexts and their links to messages.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde_json::Value;

use chat_context_core::display::to_display;
use chat_context_core::models::{
    Context, ContextKind, ContextLink, ContextMetadata, DisplayContext, Reference,
};
use chat_context_core::store::Store;
use chat_context_core::PipelineError;

use crate::gateway::EmbeddingGateway;
use crate::similarity::{SimilarityOptions, SimilaritySearch};

pub struct ContextService {
    gateway: Arc<EmbeddingGateway>,
    similarity: Arc<SimilaritySearch>,
    store: Arc<dyn Store>,
}

impl ContextService {
    pub fn new(
        gateway: Arc<EmbeddingGateway>,
        similarity: Arc<SimilaritySearch>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            gateway,
            similarity,
            store,
        }
    }

    /// Embed `content` and persist a new context of `kind`.
    pub async fn create_context(
        &self,
        content: &str,
        kind: ContextKind,
        metadata: Value,
        chat_id: Option<String>,
    ) -> Result<Context> {
        let metadata = ContextMetadata::from_value(kind, metadata)
            .with_context(|| format!("Invalid metadata for {} context", kind))?;
        let embedding = self.gateway.generate_embedding(content).await?;

        let context = Context::new(metadata, Some(embedding), chrono::Utc::now().timestamp())
            .with_chat(chat_id);
        self.store.insert_context(&context).await?;

        tracing::debug!(context_id = %context.id, %kind, "context created");
        Ok(context)
    }

    /// Link a context to a message. Returns `false` if the pair was already linked.
    pub async fn link_context_to_message(
        &self,
        context_id: &str,
        message_id: &str,
        metadata: Value,
    ) -> Result<bool> {
        if !self.store.context_exists(context_id).await? {
            return Err(PipelineError::UnknownContext(context_id.to_string()).into());
        }

        let link = ContextLink {
            context_id: context_id.to_string(),
            message_id: message_id.to_string(),
            metadata: if metadata.is_null() {
                Value::Object(Default::default())
            } else {
                metadata
            },
            created_at: chrono::Utc::now().timestamp(),
        };
        let created = self.store.insert_link(&link).await?;
        if !created {
            tracing::debug!(context_id, message_id, "link already exists");
        }
        Ok(created)
    }

    /// Contexts linked to a message, shaped for display, oldest link first.
    pub async fn get_message_contexts(&self, message_id: &str) -> Result<Vec<DisplayContext>> {
        let linked = self.store.linked_contexts(message_id).await?;
        Ok(linked.into_iter().map(to_display).collect())
    }

    /// Embed `text` and search stored contexts with it.
    pub async fn find_similar_contexts(
        &self,
        text: &str,
        options: &SimilarityOptions,
    ) -> Result<Vec<Reference>> {
        let embedding = self.gateway.generate_embedding(text).await?;
        self.similarity.find_similar_content(&embedding, options).await
    }
}
