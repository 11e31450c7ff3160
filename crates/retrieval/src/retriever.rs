//! Hybrid retriever
//!
//! Keyword, embedding, hybrid and temporal search over the graph store.
//! Hybrid runs keyword and vector search in parallel, unions the results
//! by id and fuses scores: weighted (α vector, 1−α keyword) when a
//! reranker refines the ordering, max-of-normalised-scores otherwise.
//! Everything is tenant-scoped; ties order by id.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use engram_config::constants::retrieval as retrieval_constants;
use engram_core::{
    Embedder, GraphStore, NodeLabel, Reranker, Result, SearchHit, SearchMode,
};

use crate::escape::escape_query;

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Final number of results
    pub top_k: usize,
    /// Minimum normalised score
    pub score_threshold: f32,
    /// Weight α of vector scores in hybrid fusion
    pub vector_weight: f32,
    /// Default lookback for temporal search
    pub temporal_window_days: i64,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: retrieval_constants::DEFAULT_TOP_K,
            score_threshold: retrieval_constants::DEFAULT_SCORE_THRESHOLD,
            vector_weight: retrieval_constants::HYBRID_VECTOR_WEIGHT,
            temporal_window_days: retrieval_constants::DEFAULT_TEMPORAL_WINDOW_DAYS,
        }
    }
}

/// One retrieval request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub end_user_id: String,
    pub query: String,
    pub mode: SearchMode,
    /// Labels to search; defaults to all retrievable labels
    #[serde(default)]
    pub labels: Vec<NodeLabel>,
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Temporal window; defaults to `[now − window, now]`
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl SearchRequest {
    pub fn new(end_user_id: &str, query: &str, mode: SearchMode) -> Self {
        Self {
            end_user_id: end_user_id.to_string(),
            query: query.to_string(),
            mode,
            labels: Vec::new(),
            top_k: None,
            start: None,
            end: None,
        }
    }

    pub fn with_labels(mut self, labels: Vec<NodeLabel>) -> Self {
        self.labels = labels;
        self
    }
}

pub struct Retriever {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            reranker,
            config,
        }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let labels = if request.labels.is_empty() {
            NodeLabel::retrievable().to_vec()
        } else {
            request.labels.clone()
        };
        let k = request.top_k.unwrap_or(self.config.top_k);

        let hits = match request.mode {
            SearchMode::Keyword => self.keyword(request, &labels, k).await?,
            SearchMode::Embedding => self.embedding(request, &labels, k).await?,
            SearchMode::Hybrid => self.hybrid(request, &labels, k).await?,
            SearchMode::Temporal => self.temporal(request, &labels, k).await?,
        };

        debug!(
            end_user_id = %request.end_user_id,
            mode = ?request.mode,
            hits = hits.len(),
            "retrieval complete"
        );
        Ok(hits)
    }

    async fn keyword(
        &self,
        request: &SearchRequest,
        labels: &[NodeLabel],
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let escaped = escape_query(&request.query);
        let mut hits = self
            .store
            .search_keyword(&request.end_user_id, &escaped, labels, k)
            .await?;
        normalize_scores(&mut hits);
        hits.retain(|h| h.score >= self.config.score_threshold);
        hits.sort_by(|a, b| a.rank_cmp(b));
        hits.truncate(k);
        Ok(hits)
    }

    async fn embedding(
        &self,
        request: &SearchRequest,
        labels: &[NodeLabel],
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let query_vector = self.embedder.embed_one(&request.query).await?;
        self.store
            .search_vector(
                &request.end_user_id,
                &query_vector,
                labels,
                k,
                self.config.score_threshold,
            )
            .await
    }

    async fn hybrid(
        &self,
        request: &SearchRequest,
        labels: &[NodeLabel],
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        // Fetch a wider candidate pool from both arms in parallel.
        let pool = k * 2;
        let (keyword_hits, vector_hits) = tokio::join!(
            self.keyword(request, labels, pool),
            self.embedding(request, labels, pool)
        );
        let keyword_hits = keyword_hits?;
        let vector_hits = vector_hits?;

        // Union by id, remembering each arm's normalised score.
        struct Fused {
            hit: SearchHit,
            keyword_score: f32,
            vector_score: f32,
        }
        let mut fused: HashMap<String, Fused> = HashMap::new();
        for hit in keyword_hits {
            fused
                .entry(hit.id.clone())
                .and_modify(|f| f.keyword_score = f.keyword_score.max(hit.score))
                .or_insert(Fused {
                    keyword_score: hit.score,
                    vector_score: 0.0,
                    hit,
                });
        }
        for hit in vector_hits {
            fused
                .entry(hit.id.clone())
                .and_modify(|f| f.vector_score = f.vector_score.max(hit.score))
                .or_insert(Fused {
                    keyword_score: 0.0,
                    vector_score: hit.score,
                    hit,
                });
        }

        let alpha = self.config.vector_weight;
        let mut hits: Vec<SearchHit> = fused
            .into_values()
            .map(|f| {
                let score = if self.reranker.is_some() {
                    alpha * f.vector_score + (1.0 - alpha) * f.keyword_score
                } else {
                    f.vector_score.max(f.keyword_score)
                };
                SearchHit {
                    score,
                    source_mode: SearchMode::Hybrid,
                    ..f.hit
                }
            })
            .collect();
        hits.sort_by(|a, b| a.rank_cmp(b));
        hits.truncate(k);

        // Reranker refines the final ordering of the fused pool.
        if let Some(reranker) = &self.reranker {
            let docs: Vec<String> = hits.iter().map(|h| h.content.clone()).collect();
            match reranker.rerank(&request.query, &docs, k).await {
                Ok(ranked) => {
                    let mut reordered: Vec<SearchHit> = ranked
                        .into_iter()
                        .filter_map(|r| {
                            hits.get(r.index).map(|hit| SearchHit {
                                score: r.score,
                                ..hit.clone()
                            })
                        })
                        .collect();
                    reordered.sort_by(|a, b| a.rank_cmp(b));
                    if !reordered.is_empty() {
                        return Ok(reordered);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "reranker failed, keeping fused ordering");
                }
            }
        }
        Ok(hits)
    }

    async fn temporal(
        &self,
        request: &SearchRequest,
        labels: &[NodeLabel],
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let end = request.end.unwrap_or_else(Utc::now);
        let start = request
            .start
            .unwrap_or(end - Duration::days(self.config.temporal_window_days));
        self.store
            .search_temporal(&request.end_user_id, labels, start, end, k)
            .await
    }
}

/// Scale scores into [0, 1] by the maximum (BM25 scores are unbounded)
fn normalize_scores(hits: &mut [SearchHit]) {
    let max = hits.iter().map(|h| h.score).fold(0.0f32, f32::max);
    if max > 0.0 {
        for hit in hits {
            hit.score /= max;
        }
    }
}
