//! Rerankers
//!
//! `HttpReranker` posts to a `/rerank` endpoint (Cohere/Jina-style wire
//! shape). `LexicalScorer` is the dependency-free fallback: token-overlap
//! scoring, useful as a pre-filter and in tests.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use engram_config::constants::timeouts;
use engram_core::{MemoryError, Reranker, RerankResult, Result};

#[derive(Debug, Clone)]
pub struct HttpRerankerConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for HttpRerankerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            model: "bge-reranker-v2-m3".to_string(),
            timeout: Duration::from_secs(timeouts::RERANKER_SECS),
        }
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankRow>,
}

#[derive(Debug, Deserialize)]
struct RerankRow {
    index: usize,
    relevance_score: f32,
}

pub struct HttpReranker {
    client: Client,
    config: HttpRerankerConfig,
}

impl HttpReranker {
    pub fn new(config: HttpRerankerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MemoryError::permanent("reranker", format!("client build failed: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        docs: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankResult>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/rerank", self.config.endpoint))
            .json(&RerankRequest {
                model: &self.config.model,
                query,
                documents: docs,
                top_n: top_k,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    MemoryError::transient("reranker", e.to_string())
                } else {
                    MemoryError::permanent("reranker", e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::transient(
                "reranker",
                format!("status {status}: {body}"),
            ));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::permanent("reranker", format!("malformed response: {e}")))?;

        let mut results: Vec<RerankResult> = parsed
            .results
            .into_iter()
            .filter(|row| row.index < docs.len())
            .map(|row| RerankResult {
                index: row.index,
                score: row.relevance_score,
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }
}

/// Token-overlap scorer: |query ∩ doc| / |query|
pub struct LexicalScorer;

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Reranker for LexicalScorer {
    async fn rerank(
        &self,
        query: &str,
        docs: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankResult>> {
        let query_tokens = tokens(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<RerankResult> = docs
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                let doc_tokens = tokens(doc);
                let overlap = query_tokens.intersection(&doc_tokens).count();
                RerankResult {
                    index,
                    score: overlap as f32 / query_tokens.len() as f32,
                }
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.index.cmp(&b.index))
        });
        results.truncate(top_k);
        Ok(results)
    }
}
