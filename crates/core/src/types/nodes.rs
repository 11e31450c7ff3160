//! Graph node value types
//!
//! All in-process references between nodes are ids, never pointers; the
//! graph store owns the only authoritative copies. Every node carries the
//! tenancy key (`end_user_id`), the memory-config generation (`config_id`),
//! `created_at` and the sentinel `expired_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{
    EmotionType, MemoryType, NodeLabel, PerceptualType, StatementType, TemporalInfo,
};
use super::message::Role;

/// A full dialogue as ingested, never mutated afterwards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueNode {
    pub id: String,
    pub end_user_id: String,
    pub config_id: String,
    pub run_id: Option<String>,
    /// Caller-supplied stable reference
    pub ref_id: String,
    /// Concatenated cleaned transcript
    pub content: String,
    pub dialog_embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// One speaker turn (or sub-turn) of a dialogue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkNode {
    pub id: String,
    pub end_user_id: String,
    pub config_id: String,
    pub run_id: Option<String>,
    pub dialogue_id: String,
    pub content: String,
    pub speaker: Role,
    pub sequence_index: usize,
    pub perceptual_type: PerceptualType,
    pub chunk_embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// An atomic, typed, timed proposition extracted from a chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementNode {
    pub id: String,
    pub end_user_id: String,
    pub config_id: String,
    pub run_id: Option<String>,
    pub statement: String,
    pub stmt_type: StatementType,
    pub temporal_info: TemporalInfo,
    pub valid_at: DateTime<Utc>,
    pub invalid_at: DateTime<Utc>,
    pub emotion_type: EmotionType,
    pub emotion_intensity: f32,
    pub activation_value: f64,
    pub importance_score: f64,
    /// Access timestamps, most recent first, bounded by the trim rule
    pub access_history: Vec<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
    pub statement_embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// A named, typed reference recognised in one or more statements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityNode {
    pub id: String,
    pub end_user_id: String,
    pub config_id: String,
    pub run_id: Option<String>,
    pub name: String,
    /// Ontology class name, validated against the registry at extraction time
    pub entity_type: String,
    pub description: String,
    pub fact_summary: String,
    pub activation_value: f64,
    pub importance_score: f64,
    pub access_history: Vec<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
    pub name_embedding: Vec<f32>,
    pub is_explicit_memory: bool,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// Episodic consolidation of chunks and/or merged low-activation pairs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryNode {
    pub id: String,
    pub end_user_id: String,
    pub config_id: String,
    pub run_id: Option<String>,
    /// LLM-produced title
    pub name: String,
    pub memory_type: MemoryType,
    pub content: String,
    pub summary_embedding: Vec<f32>,
    pub chunk_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// Any node fetched from the store by id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "label")]
pub enum GraphNode {
    Dialogue(DialogueNode),
    Chunk(ChunkNode),
    Statement(StatementNode),
    ExtractedEntity(EntityNode),
    MemorySummary(SummaryNode),
}

impl GraphNode {
    pub fn id(&self) -> &str {
        match self {
            GraphNode::Dialogue(n) => &n.id,
            GraphNode::Chunk(n) => &n.id,
            GraphNode::Statement(n) => &n.id,
            GraphNode::ExtractedEntity(n) => &n.id,
            GraphNode::MemorySummary(n) => &n.id,
        }
    }

    pub fn end_user_id(&self) -> &str {
        match self {
            GraphNode::Dialogue(n) => &n.end_user_id,
            GraphNode::Chunk(n) => &n.end_user_id,
            GraphNode::Statement(n) => &n.end_user_id,
            GraphNode::ExtractedEntity(n) => &n.end_user_id,
            GraphNode::MemorySummary(n) => &n.end_user_id,
        }
    }

    pub fn label(&self) -> NodeLabel {
        match self {
            GraphNode::Dialogue(_) => NodeLabel::Dialogue,
            GraphNode::Chunk(_) => NodeLabel::Chunk,
            GraphNode::Statement(_) => NodeLabel::Statement,
            GraphNode::ExtractedEntity(_) => NodeLabel::ExtractedEntity,
            GraphNode::MemorySummary(_) => NodeLabel::MemorySummary,
        }
    }

    /// Human-readable text used when rendering evidence into prompts
    pub fn display_content(&self) -> &str {
        match self {
            GraphNode::Dialogue(n) => &n.content,
            GraphNode::Chunk(n) => &n.content,
            GraphNode::Statement(n) => &n.statement,
            GraphNode::ExtractedEntity(n) => &n.name,
            GraphNode::MemorySummary(n) => &n.content,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            GraphNode::Dialogue(n) => n.created_at,
            GraphNode::Chunk(n) => n.created_at,
            GraphNode::Statement(n) => n.created_at,
            GraphNode::ExtractedEntity(n) => n.created_at,
            GraphNode::MemorySummary(n) => n.created_at,
        }
    }
}
