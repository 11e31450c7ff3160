//! Engine-level settings
//!
//! Loaded once at the wiring root from layered sources: defaults →
//! `engram.toml` → environment variables prefixed `ENGRAM_` (e.g.
//! `ENGRAM_PROVIDERS__LLM_ENDPOINT`). Per-tenant knobs live in
//! `MemoryConfig`, not here.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub providers: ProviderSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub observability: ObservabilitySettings,
}

/// Remote provider endpoints and model ids
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// OpenAI-compatible chat endpoint
    #[serde(default = "default_llm_endpoint")]
    pub llm_endpoint: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: String,

    #[serde(default = "default_embedding_endpoint")]
    pub embedding_endpoint: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Optional reranker endpoint; hybrid retrieval falls back to score
    /// fusion when unset
    #[serde(default)]
    pub rerank_endpoint: Option<String>,
    #[serde(default)]
    pub rerank_model: Option<String>,
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "qwen2.5:14b".to_string()
}

fn default_embedding_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "qwen3-embedding:0.6b".to_string()
}

fn default_embedding_dim() -> usize {
    1024
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            llm_endpoint: default_llm_endpoint(),
            llm_model: default_llm_model(),
            llm_api_key: String::new(),
            embedding_endpoint: default_embedding_endpoint(),
            embedding_model: default_embedding_model(),
            embedding_dim: default_embedding_dim(),
            rerank_endpoint: None,
            rerank_model: None,
        }
    }
}

/// KV cache backend selection
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheSettings {
    /// `redis://…` URL; in-memory cache when unset
    #[serde(default)]
    pub redis_url: Option<String>,
}

/// Tracing output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json_logs: bool,
}

fn default_log_filter() -> String {
    "info,engram=debug".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            json_logs: false,
        }
    }
}

impl Settings {
    /// Load from `engram.toml` (optional) and `ENGRAM_` env overrides
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("engram.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix("ENGRAM")
                    .separator("__")
                    .try_parsing(true),
            );

        builder
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(|e| ConfigError::Load(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let settings = Settings::default();
        assert!(!settings.environment.is_production());
        assert!(settings.cache.redis_url.is_none());
        assert_eq!(settings.providers.embedding_dim, 1024);
        assert!(settings.providers.rerank_endpoint.is_none());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let settings = Settings::load_from(Path::new("/nonexistent/engram.toml")).unwrap();
        assert_eq!(
            settings.providers.llm_endpoint,
            default_llm_endpoint()
        );
    }
}
