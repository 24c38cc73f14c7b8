//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/cctx.sqlite"
//!
//! [embedding]
//! provider = "openai"            # disabled | openai | ollama | local
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [suggestions]
//! debounce_ms = 300
//! min_query_chars = 3
//! limit = 5
//! threshold = 0.7
//!
//! [media]
//! url = "https://example.supabase.co/functions/v1/find-references"
//!
//! [server]
//! bind = "127.0.0.1:7341"
//!
//! [logging]
//! level = "info"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub suggestions: SuggestionsConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, or an OpenAI-compatible endpoint).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Tuning for the debounced suggestion path.
#[derive(Debug, Deserialize, Clone)]
pub struct SuggestionsConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Inputs shorter than this (in characters) return no suggestions.
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,
    #[serde(default = "default_suggestion_limit")]
    pub limit: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for SuggestionsConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            min_query_chars: default_min_query_chars(),
            limit: default_suggestion_limit(),
            threshold: default_threshold(),
        }
    }
}

impl SuggestionsConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_debounce_ms() -> u64 {
    300
}
fn default_min_query_chars() -> usize {
    3
}
fn default_suggestion_limit() -> usize {
    5
}
fn default_threshold() -> f64 {
    0.7
}

/// Secondary media reference search. Disabled when `url` is unset.
#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding a bearer token for `url`.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_media_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            url: None,
            token_env: None,
            timeout_secs: default_media_timeout_secs(),
        }
    }
}

fn default_media_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default level for this crate's targets; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check value ranges and provider requirements.
pub fn validate(config: &Config) -> Result<()> {
    // Suggestions
    if config.suggestions.limit < 1 {
        anyhow::bail!("suggestions.limit must be >= 1");
    }
    if config.suggestions.min_query_chars < 1 {
        anyhow::bail!("suggestions.min_query_chars must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.suggestions.threshold) {
        anyhow::bail!("suggestions.threshold must be in [0.0, 1.0]");
    }
    if config.suggestions.debounce_ms == 0 {
        anyhow::bail!("suggestions.debounce_ms must be > 0");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    // Logging
    match config.logging.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => anyhow::bail!("Unknown logging.level: '{}'", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        assert_eq!(config.suggestions.debounce_ms, 300);
        assert_eq!(config.suggestions.min_query_chars, 3);
        assert_eq!(config.suggestions.limit, 5);
        assert!((config.suggestions.threshold - 0.7).abs() < f64::EPSILON);
        assert!(!config.embedding.is_enabled());
        assert!(config.media.url.is_none());
        assert_eq!(config.server.bind, "127.0.0.1:7341");
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let err = parse("[db]\npath = \"x\"\n[suggestions]\nthreshold = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[test]
    fn test_zero_debounce_rejected() {
        let err = parse("[db]\npath = \"x\"\n[suggestions]\ndebounce_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("debounce_ms"));
    }

    #[test]
    fn test_zero_limit_rejected() {
        assert!(parse("[db]\npath = \"x\"\n[suggestions]\nlimit = 0\n").is_err());
    }

    #[test]
    fn test_remote_provider_requires_model_and_dims() {
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").is_err());
        assert!(parse(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 8\n"
        )
        .is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cctx.toml");
        std::fs::write(&path, "[db]\npath = \"data/cctx.sqlite\"\n[logging]\nlevel = \"debug\"\n")
            .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
