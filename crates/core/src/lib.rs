//! Core traits and types for the memory engine
//!
//! This crate provides the foundation used across all other crates:
//! - Capability ports for pluggable providers (LLM, embedder, reranker,
//!   chunker, graph store, KV cache)
//! - The knowledge-graph value types (nodes, edges, bundles, hits)
//! - The unified error taxonomy and retry policy
//! - Time utilities: injectable clock, sentinel expiry, date normalisation
//! - Deterministic node-id derivation

pub mod error;
pub mod ids;
pub mod retry;
pub mod testing;
pub mod time;
pub mod traits;
pub mod types;
pub mod vectors;

/// Hard bounds every store implementation enforces
pub mod limits {
    /// Upper bound on `access_history` length (§ data model)
    pub const MAX_ACCESS_HISTORY: usize = 100;
}

pub use error::{MemoryError, Result};
pub use retry::RetryPolicy;
pub use vectors::cosine_similarity;
pub use time::{days_between, far_future, normalize_date, Clock, ManualClock, SystemClock};
pub use traits::{
    Chunker, Embedder, GraphStore, InMemoryKvCache, KvCache, LanguageModel, Reranker,
    RerankResult, TextChunk,
};
pub use types::{
    ActivationUpdate, ChatMessage, ChunkNode, DialogueBundle, DialogueMessage, DialogueNode,
    DialoguePayload, EmotionType, EntityEntityEdge, EntityNode, ForgettablePair, GraphNode,
    IngestReceipt, MemoryType, MergeOutcome, NodeLabel, PerceptualType, Predicate, Role,
    SearchHit, SearchMode, StatementChunkEdge, StatementEntityEdge, StatementNode, StatementType,
    SummaryEdge, SummaryEdgeKind, SummaryNode, TemporalInfo,
};
