//! Secondary media reference search.
//!
//! Sends `POST {url}` with `{"query": ..., "type": "media"}` and expects
//! `{"references": [{id, title, url, media_type, source, similarity?}]}`.
//! Results are tagged with [`ReferenceSource::Media`] so the orchestrator can
//! merge them with index results.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;

use chat_context_core::models::{Reference, ReferenceKind, ReferenceSource};

use crate::config::MediaConfig;

#[async_trait]
pub trait MediaSearch: Send + Sync {
    async fn find_references(&self, query: &str) -> Result<Vec<Reference>>;
}

/// Used when `[media] url` is not configured. Always returns no results.
pub struct DisabledMediaSearch;

#[async_trait]
impl MediaSearch for DisabledMediaSearch {
    async fn find_references(&self, _query: &str) -> Result<Vec<Reference>> {
        Ok(Vec::new())
    }
}

pub struct HttpMediaSearch {
    url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpMediaSearch {
    pub fn new(url: String, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url, token, client })
    }
}

#[async_trait]
impl MediaSearch for HttpMediaSearch {
    async fn find_references(&self, query: &str) -> Result<Vec<Reference>> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "query": query, "type": "media" }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("media search error {}: {}", status, body);
        }

        let body: MediaResponse = response.json().await?;
        Ok(body.into_references())
    }
}

#[derive(Debug, Default, Deserialize)]
struct MediaResponse {
    #[serde(default)]
    references: Vec<MediaItem>,
}

#[derive(Debug, Deserialize)]
struct MediaItem {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    similarity: Option<f64>,
}

impl MediaResponse {
    fn into_references(self) -> Vec<Reference> {
        self.references
            .into_iter()
            .map(|item| Reference {
                title: item
                    .title
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| item.id.clone()),
                id: item.id,
                kind: ReferenceKind::Media,
                preview: item.url,
                metadata: Some(serde_json::json!({
                    "type": item.media_type,
                    "source": item.source,
                })),
                similarity: item.similarity.unwrap_or(0.0).clamp(0.0, 1.0),
                source: ReferenceSource::Media,
                updated_at: None,
            })
            .collect()
    }
}

/// Build the media search client from config, reading the bearer token from
/// the environment variable named by `token_env`.
pub fn create_media_search(config: &MediaConfig) -> Result<Arc<dyn MediaSearch>> {
    match &config.url {
        None => Ok(Arc::new(DisabledMediaSearch)),
        Some(url) => {
            let token = match &config.token_env {
                Some(var) => Some(std::env::var(var).map_err(|_| {
                    anyhow::anyhow!("{} environment variable not set (media.token_env)", var)
                })?),
                None => None,
            };
            Ok(Arc::new(HttpMediaSearch::new(
                url.clone(),
                token,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
    }
}
