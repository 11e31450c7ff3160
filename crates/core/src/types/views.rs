//! Read-only projection types over the graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{MemoryType, PerceptualType};
use super::nodes::{ChunkNode, EntityNode, StatementNode, SummaryNode};

/// Counts of perceptual records by modality, plus the total
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryCounts {
    pub text: u64,
    pub audio: u64,
    pub vision: u64,
    pub total: u64,
}

impl MemoryCounts {
    pub fn add(&mut self, perceptual_type: PerceptualType, count: u64) {
        match perceptual_type {
            PerceptualType::Text => self.text += count,
            PerceptualType::Audio => self.audio += count,
            PerceptualType::Vision => self.vision += count,
        }
        self.total += count;
    }
}

/// One row of the episodic overview listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicOverviewItem {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub created_at_ms: i64,
}

/// Time window filter for episodic listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EpisodicTimeRange {
    #[default]
    All,
    Today,
    ThisWeek,
    ThisMonth,
}

/// Full episodic record fetched by summary id, with its graph neighbourhood
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryDetail {
    pub summary: SummaryNode,
    /// Statements the summary was derived from (or absorbed during forgetting)
    pub statements: Vec<StatementNode>,
    /// Entities referenced by those statements
    pub entities: Vec<EntityNode>,
    /// Source chunks, in sequence order
    pub chunks: Vec<ChunkNode>,
}

impl SummaryDetail {
    /// The attached statement with the highest emotion intensity, if any
    pub fn dominant_emotion(&self) -> Option<&StatementNode> {
        self.statements
            .iter()
            .filter(|s| s.emotion_intensity > 0.0)
            .max_by(|a, b| {
                a.emotion_intensity
                    .partial_cmp(&b.emotion_intensity)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.id.cmp(&a.id))
            })
    }
}

/// Snapshot totals reported by the forgetting cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeNodeCounts {
    pub statements: u64,
    pub entities: u64,
    pub summaries: u64,
}

impl KnowledgeNodeCounts {
    pub fn total(&self) -> u64 {
        self.statements + self.entities + self.summaries
    }
}

/// Latest perceptual record projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestMemory {
    pub id: String,
    pub content: String,
    pub perceptual_type: PerceptualType,
    pub created_at: DateTime<Utc>,
}
