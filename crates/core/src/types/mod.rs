//! Value types shared across the engine

pub mod bundle;
pub mod enums;
pub mod message;
pub mod nodes;
pub mod search;
pub mod views;

pub use bundle::{
    DialogueBundle, EntityEntityEdge, IngestReceipt, StatementChunkEdge, StatementEntityEdge,
    SummaryEdge, SummaryEdgeKind,
};
pub use enums::{
    EmotionType, MemoryType, NodeLabel, PerceptualType, Predicate, SearchMode, StatementType,
    TemporalInfo,
};
pub use message::{ChatMessage, DialogueMessage, DialoguePayload, Role};
pub use nodes::{ChunkNode, DialogueNode, EntityNode, GraphNode, StatementNode, SummaryNode};
pub use search::{ActivationUpdate, ForgettablePair, MergeOutcome, SearchHit};
pub use views::{
    EpisodicOverviewItem, EpisodicTimeRange, KnowledgeNodeCounts, LatestMemory, MemoryCounts,
    SummaryDetail,
};
