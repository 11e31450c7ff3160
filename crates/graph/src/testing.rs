//! Fixture builders shared by in-crate and downstream tests

use chrono::{DateTime, Utc};

use engram_core::{
    ids, ChunkNode, DialogueBundle, DialogueNode, EntityNode, PerceptualType, Role,
    StatementChunkEdge, StatementEntityEdge, StatementNode, StatementType, SummaryNode,
    TemporalInfo,
};

pub struct BundleBuilder {
    end_user_id: String,
    config_id: String,
    ref_id: String,
    now: DateTime<Utc>,
    bundle: DialogueBundle,
}

impl BundleBuilder {
    pub fn new(end_user_id: &str, ref_id: &str, now: DateTime<Utc>) -> Self {
        let dialogue_id = ids::dialogue_id(end_user_id, ref_id);
        let mut bundle = DialogueBundle::default();
        bundle.dialogue = Some(DialogueNode {
            id: dialogue_id,
            end_user_id: end_user_id.to_string(),
            config_id: "default".into(),
            run_id: None,
            ref_id: ref_id.to_string(),
            content: String::new(),
            dialog_embedding: vec![],
            created_at: now,
            expired_at: engram_core::far_future(),
        });
        Self {
            end_user_id: end_user_id.to_string(),
            config_id: "default".into(),
            ref_id: ref_id.to_string(),
            now,
            bundle,
        }
    }

    pub fn dialogue_id(&self) -> String {
        ids::dialogue_id(&self.end_user_id, &self.ref_id)
    }

    pub fn with_chunk(mut self, sequence_index: usize, content: &str) -> Self {
        let dialogue_id = self.dialogue_id();
        self.bundle.chunks.push(ChunkNode {
            id: ids::chunk_id(&dialogue_id, sequence_index),
            end_user_id: self.end_user_id.clone(),
            config_id: self.config_id.clone(),
            run_id: None,
            dialogue_id,
            content: content.to_string(),
            speaker: Role::User,
            sequence_index,
            perceptual_type: PerceptualType::Text,
            chunk_embedding: vec![],
            created_at: self.now,
            expired_at: engram_core::far_future(),
        });
        if let Some(dialogue) = self.bundle.dialogue.as_mut() {
            if !dialogue.content.is_empty() {
                dialogue.content.push('\n');
            }
            dialogue.content.push_str(content);
        }
        self
    }

    /// Statement derived from the chunk at `chunk_seq`, with an embedding
    pub fn with_statement(
        mut self,
        chunk_seq: usize,
        text: &str,
        embedding: Vec<f32>,
        activation: f64,
        last_accessed_at: DateTime<Utc>,
    ) -> Self {
        let chunk_id = ids::chunk_id(&self.dialogue_id(), chunk_seq);
        let stmt_id = ids::statement_id(&chunk_id, text);
        self.bundle.statements.push(StatementNode {
            id: stmt_id.clone(),
            end_user_id: self.end_user_id.clone(),
            config_id: self.config_id.clone(),
            run_id: None,
            statement: text.to_string(),
            stmt_type: StatementType::Fact,
            temporal_info: TemporalInfo::Atemporal,
            valid_at: self.now,
            invalid_at: engram_core::far_future(),
            emotion_type: Default::default(),
            emotion_intensity: 0.0,
            activation_value: activation,
            importance_score: 0.5,
            access_history: vec![last_accessed_at],
            last_accessed_at,
            statement_embedding: embedding,
            created_at: self.now,
            expired_at: engram_core::far_future(),
        });
        self.bundle.statement_chunk_edges.push(StatementChunkEdge {
            id: ids::new_id(),
            source: stmt_id,
            target: chunk_id,
            end_user_id: self.end_user_id.clone(),
            run_id: None,
            created_at: self.now,
            expired_at: engram_core::far_future(),
        });
        self
    }

    /// Entity referenced by the most recently added statement
    pub fn with_entity(
        mut self,
        name: &str,
        entity_type: &str,
        activation: f64,
        last_accessed_at: DateTime<Utc>,
    ) -> Self {
        let entity_id = format!("ent-{}-{name}", self.end_user_id);
        self.bundle.entities.push(EntityNode {
            id: entity_id.clone(),
            end_user_id: self.end_user_id.clone(),
            config_id: self.config_id.clone(),
            run_id: None,
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            description: String::new(),
            fact_summary: String::new(),
            activation_value: activation,
            importance_score: 0.5,
            access_history: vec![last_accessed_at],
            last_accessed_at,
            name_embedding: vec![],
            is_explicit_memory: true,
            created_at: self.now,
            expired_at: engram_core::far_future(),
        });
        if let Some(stmt) = self.bundle.statements.last() {
            self.bundle.statement_entity_edges.push(StatementEntityEdge {
                id: ids::new_id(),
                source: stmt.id.clone(),
                target: entity_id,
                end_user_id: self.end_user_id.clone(),
                run_id: None,
                connect_strength: 1.0,
                created_at: self.now,
                expired_at: engram_core::far_future(),
            });
        }
        self
    }

    pub fn with_summary(mut self, title: &str, content: &str) -> Self {
        let chunk_ids: Vec<String> = self.bundle.chunks.iter().map(|c| c.id.clone()).collect();
        let first_chunk = chunk_ids.first().cloned().unwrap_or_default();
        self.bundle.summaries.push(SummaryNode {
            id: ids::summary_id(&first_chunk),
            end_user_id: self.end_user_id.clone(),
            config_id: self.config_id.clone(),
            run_id: None,
            name: title.to_string(),
            memory_type: Default::default(),
            content: content.to_string(),
            summary_embedding: vec![],
            chunk_ids,
            created_at: self.now,
            expired_at: engram_core::far_future(),
        });
        self
    }

    pub fn build(self) -> DialogueBundle {
        self.bundle
    }
}
