//! Reranking port

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One reranked document: index into the caller's input slice plus the
/// relevance score assigned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankResult {
    pub index: usize,
    pub score: f32,
}

/// Cross-encoder style reranking capability. Participates in hybrid
/// retrieval only.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rank `docs` against `query`, returning at most `top_k` results in
    /// descending score order.
    async fn rerank(&self, query: &str, docs: &[String], top_k: usize)
        -> Result<Vec<RerankResult>>;
}
