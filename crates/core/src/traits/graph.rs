//! Graph store port
//!
//! The engine's only view of the labelled property graph. Implementations
//! speak a parameterised graph query language (or an in-process engine) but
//! must uphold the same contract: tenant isolation on every operation,
//! MERGE-on-id upserts, and all-or-nothing batch writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::views::{EpisodicTimeRange, KnowledgeNodeCounts, MemoryCounts, SummaryDetail};
use crate::types::{
    ActivationUpdate, ChunkNode, DialogueBundle, EntityNode, ForgettablePair, GraphNode,
    MemoryType, MergeOutcome, NodeLabel, PerceptualType, SearchHit, SummaryNode,
};

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Persist a dialogue's nodes and edges in a single transaction.
    /// Nodes upsert by id; a failure leaves the graph untouched.
    async fn write_dialogue_batch(&self, bundle: &DialogueBundle) -> Result<()>;

    /// Full-text search per label, already escaped by the caller
    async fn search_keyword(
        &self,
        end_user_id: &str,
        query: &str,
        labels: &[NodeLabel],
        k: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Cosine similarity over stored vectors, filtered by `threshold`
    async fn search_vector(
        &self,
        end_user_id: &str,
        embedding: &[f32],
        labels: &[NodeLabel],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>>;

    /// Range scan over `valid_at` (statements) / `created_at` (other labels)
    async fn search_temporal(
        &self,
        end_user_id: &str,
        labels: &[NodeLabel],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        k: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Bulk point lookup; unknown ids are silently absent from the result
    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<GraphNode>>;

    /// Idempotent activation write-back (last writer wins per node id)
    async fn update_activation(&self, update: &ActivationUpdate) -> Result<()>;

    /// Statement+Entity pairs whose combined activation qualifies them for
    /// forgetting, ordered ascending by average activation
    async fn list_forgettable_pairs(
        &self,
        end_user_id: Option<&str>,
        min_days_since_access: i64,
        activation_threshold: f64,
        limit: usize,
    ) -> Result<Vec<ForgettablePair>>;

    /// Atomically delete the pair and attach the replacement summary to the
    /// pair's former retrieval-relevant neighbours. Returns `Skipped` when
    /// either node has already disappeared.
    async fn merge_pair_into_summary(
        &self,
        statement_id: &str,
        entity_id: &str,
        summary: &SummaryNode,
    ) -> Result<MergeOutcome>;

    /// Persisted entities of one ontology class, used by store-layer dedup
    async fn entities_by_type(
        &self,
        end_user_id: &str,
        entity_type: &str,
    ) -> Result<Vec<EntityNode>>;

    /// Statement ∪ Entity ∪ MemorySummary totals for forgetting reports
    async fn count_knowledge_nodes(
        &self,
        end_user_id: Option<&str>,
    ) -> Result<KnowledgeNodeCounts>;

    /// Perceptual record counts by modality
    async fn count_memories(&self, end_user_id: &str) -> Result<MemoryCounts>;

    /// Most recent chunk of one modality
    async fn latest_chunk(
        &self,
        end_user_id: &str,
        perceptual_type: PerceptualType,
    ) -> Result<Option<ChunkNode>>;

    /// Episodic overview listing, newest first
    async fn list_summaries(
        &self,
        end_user_id: &str,
        time_range: EpisodicTimeRange,
        memory_type: Option<MemoryType>,
        title_keyword: Option<&str>,
        now: DateTime<Utc>,
        k: usize,
    ) -> Result<Vec<SummaryNode>>;

    /// A summary with its derived statements, referenced entities and
    /// source chunks
    async fn summary_detail(
        &self,
        end_user_id: &str,
        summary_id: &str,
    ) -> Result<Option<SummaryDetail>>;
}
