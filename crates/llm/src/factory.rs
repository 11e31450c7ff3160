//! Provider construction
//!
//! Builds language-model, embedder and reranker clients from the provider
//! settings. Chat clients are cached per `model_id` so connection pools are
//! reused across subsystems.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use engram_config::ProviderSettings;
use engram_core::{Embedder, LanguageModel, Reranker, Result};

use crate::claude::{ClaudeBackend, ClaudeConfig};
use crate::embeddings::{HttpEmbedder, HttpEmbedderConfig};
use crate::openai::{OpenAiBackend, OpenAiConfig};
use crate::reranker::{HttpReranker, HttpRerankerConfig, LexicalScorer};

pub struct ProviderFactory {
    settings: ProviderSettings,
    llm_cache: DashMap<String, Arc<dyn LanguageModel>>,
}

impl ProviderFactory {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            settings,
            llm_cache: DashMap::new(),
        }
    }

    /// The configured default chat model
    pub fn language_model(&self) -> Result<Arc<dyn LanguageModel>> {
        self.language_model_for(&self.settings.llm_model.clone())
    }

    /// A chat model by id, constructed once and cached
    pub fn language_model_for(&self, model_id: &str) -> Result<Arc<dyn LanguageModel>> {
        if let Some(cached) = self.llm_cache.get(model_id) {
            return Ok(cached.clone());
        }

        let backend: Arc<dyn LanguageModel> = if model_id.starts_with("claude") {
            Arc::new(ClaudeBackend::new(ClaudeConfig {
                api_key: self.settings.llm_api_key.clone(),
                model: model_id.to_string(),
                ..Default::default()
            })?)
        } else {
            Arc::new(OpenAiBackend::new(OpenAiConfig {
                endpoint: self.settings.llm_endpoint.clone(),
                model: model_id.to_string(),
                api_key: self.settings.llm_api_key.clone(),
                ..Default::default()
            })?)
        };

        info!(model_id, "language model client constructed");
        self.llm_cache
            .insert(model_id.to_string(), backend.clone());
        Ok(backend)
    }

    pub fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        Ok(Arc::new(HttpEmbedder::new(HttpEmbedderConfig {
            endpoint: self.settings.embedding_endpoint.clone(),
            model: self.settings.embedding_model.clone(),
            dimension: self.settings.embedding_dim,
            ..Default::default()
        })?))
    }

    /// Configured HTTP reranker, or `None` when hybrid search should fall
    /// back to score fusion
    pub fn reranker(&self) -> Result<Option<Arc<dyn Reranker>>> {
        match (&self.settings.rerank_endpoint, &self.settings.rerank_model) {
            (Some(endpoint), Some(model)) => Ok(Some(Arc::new(HttpReranker::new(
                HttpRerankerConfig {
                    endpoint: endpoint.clone(),
                    model: model.clone(),
                    ..Default::default()
                },
            )?))),
            _ => Ok(None),
        }
    }

    /// Lexical fallback scorer for deployments without a reranker model
    pub fn lexical_scorer(&self) -> Arc<dyn Reranker> {
        Arc::new(LexicalScorer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_clients_cached_by_model_id() {
        let factory = ProviderFactory::new(ProviderSettings::default());
        let first = factory.language_model_for("qwen2.5:14b").unwrap();
        let second = factory.language_model_for("qwen2.5:14b").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = factory.language_model_for("llama3:8b").unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_reranker_absent_without_endpoint() {
        let factory = ProviderFactory::new(ProviderSettings::default());
        assert!(factory.reranker().unwrap().is_none());
    }

    #[test]
    fn test_claude_selected_by_model_prefix() {
        let settings = ProviderSettings {
            llm_api_key: "key".into(),
            ..Default::default()
        };
        let factory = ProviderFactory::new(settings);
        let model = factory
            .language_model_for("claude-sonnet-4-20250514")
            .unwrap();
        assert_eq!(model.model_id(), "claude-sonnet-4-20250514");
    }
}
