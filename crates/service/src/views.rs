//! Perceptual & episodic projections
//!
//! Read-only views over the graph used by memory dashboards: modality
//! counts, the latest perceptual record, and episodic overview/detail
//! listings built from memory summaries.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use engram_core::types::views::{
    EpisodicOverviewItem, EpisodicTimeRange, LatestMemory, MemoryCounts,
};
use engram_core::{Clock, EmotionType, GraphStore, MemoryType, PerceptualType, Result};

/// Strongest emotion attached to an episodic record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionRecord {
    pub emotion_type: EmotionType,
    pub emotion_intensity: f32,
    pub statement: String,
}

/// Full episodic record (§ external interfaces)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicDetail {
    pub id: String,
    pub created_at_ms: i64,
    /// Names of referenced entities, at most three
    pub involved_objects: Vec<String>,
    #[serde(rename = "episodic_type")]
    pub episodic_type: MemoryType,
    /// Source chunk texts in sequence order
    pub content_records: Vec<String>,
    pub emotion: Option<EmotionRecord>,
}

pub struct MemoryViews {
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
}

impl MemoryViews {
    pub fn new(store: Arc<dyn GraphStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Counts by perceptual type plus the total
    pub async fn memory_count(&self, end_user_id: &str) -> Result<MemoryCounts> {
        self.store.count_memories(end_user_id).await
    }

    /// Most recent record of one modality
    pub async fn latest_memory(
        &self,
        end_user_id: &str,
        perceptual_type: PerceptualType,
    ) -> Result<Option<LatestMemory>> {
        Ok(self
            .store
            .latest_chunk(end_user_id, perceptual_type)
            .await?
            .map(|chunk| LatestMemory {
                id: chunk.id,
                content: chunk.content,
                perceptual_type: chunk.perceptual_type,
                created_at: chunk.created_at,
            }))
    }

    /// Episodic listing, newest first
    pub async fn episodic_overview(
        &self,
        end_user_id: &str,
        time_range: EpisodicTimeRange,
        episodic_type: Option<MemoryType>,
        title_keyword: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EpisodicOverviewItem>> {
        let summaries = self
            .store
            .list_summaries(
                end_user_id,
                time_range,
                episodic_type,
                title_keyword,
                self.clock.now(),
                limit,
            )
            .await?;
        Ok(summaries
            .into_iter()
            .map(|s| EpisodicOverviewItem {
                id: s.id,
                title: s.name,
                memory_type: s.memory_type,
                created_at_ms: s.created_at.timestamp_millis(),
            })
            .collect())
    }

    /// One episodic record with involved entities, source chunks and its
    /// dominant emotion
    pub async fn episodic_detail(
        &self,
        end_user_id: &str,
        summary_id: &str,
    ) -> Result<Option<EpisodicDetail>> {
        let Some(detail) = self.store.summary_detail(end_user_id, summary_id).await? else {
            return Ok(None);
        };

        let emotion = detail.dominant_emotion().map(|stmt| EmotionRecord {
            emotion_type: stmt.emotion_type,
            emotion_intensity: stmt.emotion_intensity,
            statement: stmt.statement.clone(),
        });

        let mut involved_objects: Vec<String> =
            detail.entities.iter().map(|e| e.name.clone()).collect();
        involved_objects.truncate(3);

        Ok(Some(EpisodicDetail {
            id: detail.summary.id.clone(),
            created_at_ms: detail.summary.created_at.timestamp_millis(),
            involved_objects,
            episodic_type: detail.summary.memory_type,
            content_records: detail.chunks.iter().map(|c| c.content.clone()).collect(),
            emotion,
        }))
    }
}
