//! The flat value bundle produced by the write path
//!
//! The extractor emits a `DialogueBundle` of value types; the write
//! coordinator hands it to the graph store, which persists everything in a
//! single transaction or not at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Predicate;
use super::nodes::{ChunkNode, DialogueNode, EntityNode, StatementNode, SummaryNode};

/// Statement → Chunk provenance edge (`DERIVED_FROM`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementChunkEdge {
    pub id: String,
    /// Statement id
    pub source: String,
    /// Chunk id
    pub target: String,
    pub end_user_id: String,
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// Statement → Entity mention edge (`REFERENCES_ENTITY`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementEntityEdge {
    pub id: String,
    /// Statement id
    pub source: String,
    /// Entity id
    pub target: String,
    pub end_user_id: String,
    pub run_id: Option<String>,
    /// How strongly the statement is about this entity, 0..1
    pub connect_strength: f32,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// Entity → Entity relation edge, typed by a curated predicate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntityEdge {
    pub id: String,
    /// Subject entity id
    pub source: String,
    /// Object entity id
    pub target: String,
    pub predicate: Predicate,
    /// Optional literal value qualifying the relation
    pub value: Option<String>,
    /// The statement text this relation was read from
    pub statement: String,
    /// Id of the supporting statement
    pub source_statement_id: String,
    pub valid_at: Option<DateTime<Utc>>,
    pub invalid_at: Option<DateTime<Utc>>,
    pub end_user_id: String,
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// MemorySummary provenance (`DERIVED_FROM_STATEMENT` / `DERIVED_FROM_CHUNK`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryEdge {
    pub id: String,
    /// Summary id
    pub source: String,
    /// Statement or chunk id
    pub target: String,
    pub kind: SummaryEdgeKind,
    pub end_user_id: String,
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SummaryEdgeKind {
    DerivedFromStatement,
    DerivedFromChunk,
}

/// Everything a single dialogue contributes to the graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DialogueBundle {
    pub dialogue: Option<DialogueNode>,
    pub chunks: Vec<ChunkNode>,
    pub statements: Vec<StatementNode>,
    pub entities: Vec<EntityNode>,
    pub summaries: Vec<SummaryNode>,
    pub statement_chunk_edges: Vec<StatementChunkEdge>,
    pub statement_entity_edges: Vec<StatementEntityEdge>,
    pub entity_entity_edges: Vec<EntityEntityEdge>,
    pub summary_edges: Vec<SummaryEdge>,
}

impl DialogueBundle {
    /// Referential-integrity check applied before the transactional write:
    /// every statement must keep at least one chunk edge, every entity edge
    /// must point at a bundled or already-persisted entity, and every node
    /// must share the bundle's tenant.
    ///
    /// `persisted_entity_ids` are entities the store-layer dedup redirected
    /// edges onto; they are absent from the bundle but known to exist.
    pub fn validate(
        &self,
        persisted_entity_ids: &std::collections::HashSet<String>,
    ) -> Result<(), String> {
        let dialogue = self.dialogue.as_ref().ok_or("bundle missing dialogue")?;
        let tenant = &dialogue.end_user_id;

        let chunk_ids: std::collections::HashSet<&str> =
            self.chunks.iter().map(|c| c.id.as_str()).collect();
        let entity_ids: std::collections::HashSet<&str> =
            self.entities.iter().map(|e| e.id.as_str()).collect();
        let statement_ids: std::collections::HashSet<&str> =
            self.statements.iter().map(|s| s.id.as_str()).collect();

        for chunk in &self.chunks {
            if chunk.end_user_id != *tenant {
                return Err(format!("chunk {} crosses tenants", chunk.id));
            }
            if chunk.dialogue_id != dialogue.id {
                return Err(format!("chunk {} not owned by dialogue", chunk.id));
            }
        }

        for stmt in &self.statements {
            if stmt.end_user_id != *tenant {
                return Err(format!("statement {} crosses tenants", stmt.id));
            }
            let has_chunk = self
                .statement_chunk_edges
                .iter()
                .any(|e| e.source == stmt.id && chunk_ids.contains(e.target.as_str()));
            if !has_chunk {
                return Err(format!("statement {} has no chunk reference", stmt.id));
            }
        }

        let entity_known =
            |id: &str| entity_ids.contains(id) || persisted_entity_ids.contains(id);

        for edge in &self.statement_entity_edges {
            if !statement_ids.contains(edge.source.as_str()) {
                return Err(format!("entity edge from unknown statement {}", edge.source));
            }
            if !entity_known(&edge.target) {
                return Err(format!("entity edge to unknown entity {}", edge.target));
            }
        }

        for edge in &self.entity_entity_edges {
            if !entity_known(&edge.source) || !entity_known(&edge.target) {
                return Err(format!("relation {} references unknown entity", edge.id));
            }
        }

        Ok(())
    }
}


/// Ids persisted by a successful ingest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub dialogue_id: String,
    pub chunk_ids: Vec<String>,
    pub statement_ids: Vec<String>,
    pub entity_ids: Vec<String>,
    pub summary_ids: Vec<String>,
}
