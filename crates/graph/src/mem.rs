//! In-process labelled property graph
//!
//! The embedded `GraphStore` implementation: node maps per label, a flat
//! edge table, a tantivy keyword index and cosine vector scans. Writes take
//! the single state lock, so a batch commits all-or-nothing with respect to
//! concurrent readers. The keyword index is derived data; graph state is
//! the source of truth.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use engram_core::limits::MAX_ACCESS_HISTORY;
use engram_core::types::views::{
    EpisodicTimeRange, KnowledgeNodeCounts, MemoryCounts, SummaryDetail,
};
use engram_core::{
    ActivationUpdate, ChunkNode, Clock, DialogueBundle, DialogueNode, EntityNode, ForgettablePair,
    GraphNode, GraphStore, MemoryError, MemoryType, MergeOutcome, NodeLabel, PerceptualType,
    Predicate, Result, SearchHit, SearchMode, StatementNode, SummaryNode, SystemClock,
};

use crate::keyword::{KeywordDoc, KeywordIndex};
use engram_core::cosine_similarity;

#[derive(Debug, Clone, PartialEq, Eq)]
enum EdgeKind {
    OwnsChunk,
    DerivedFrom,
    ReferencesEntity,
    Relation(Predicate),
    DerivedFromStatement,
    DerivedFromChunk,
    RelatedSummary,
}

#[derive(Debug, Clone)]
struct EdgeRecord {
    id: String,
    kind: EdgeKind,
    source: String,
    target: String,
    end_user_id: String,
}

#[derive(Default)]
struct GraphState {
    dialogues: HashMap<String, DialogueNode>,
    chunks: HashMap<String, ChunkNode>,
    statements: HashMap<String, StatementNode>,
    entities: HashMap<String, EntityNode>,
    summaries: HashMap<String, SummaryNode>,
    edges: Vec<EdgeRecord>,
}

impl GraphState {
    fn add_edge_merge(&mut self, record: EdgeRecord) {
        let exists = self.edges.iter().any(|e| {
            e.kind == record.kind && e.source == record.source && e.target == record.target
        });
        if !exists {
            self.edges.push(record);
        }
    }

    fn remove_node_edges(&mut self, node_id: &str) {
        self.edges
            .retain(|e| e.source != node_id && e.target != node_id);
    }

    fn node(&self, id: &str) -> Option<GraphNode> {
        if let Some(n) = self.dialogues.get(id) {
            return Some(GraphNode::Dialogue(n.clone()));
        }
        if let Some(n) = self.chunks.get(id) {
            return Some(GraphNode::Chunk(n.clone()));
        }
        if let Some(n) = self.statements.get(id) {
            return Some(GraphNode::Statement(n.clone()));
        }
        if let Some(n) = self.entities.get(id) {
            return Some(GraphNode::ExtractedEntity(n.clone()));
        }
        if let Some(n) = self.summaries.get(id) {
            return Some(GraphNode::MemorySummary(n.clone()));
        }
        None
    }
}

/// Embedded graph engine
pub struct MemoryGraph {
    state: RwLock<GraphState>,
    keyword: KeywordIndex,
    clock: Arc<dyn Clock>,
}

impl MemoryGraph {
    pub fn new() -> Result<Self> {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            state: RwLock::new(GraphState::default()),
            keyword: KeywordIndex::new()?,
            clock,
        })
    }

    fn keyword_docs_for_bundle(bundle: &DialogueBundle) -> Vec<KeywordDoc> {
        let mut docs = Vec::new();
        if let Some(dialogue) = &bundle.dialogue {
            docs.push(KeywordDoc {
                id: dialogue.id.clone(),
                end_user_id: dialogue.end_user_id.clone(),
                label: NodeLabel::Dialogue,
                content: dialogue.content.clone(),
            });
        }
        for chunk in &bundle.chunks {
            docs.push(KeywordDoc {
                id: chunk.id.clone(),
                end_user_id: chunk.end_user_id.clone(),
                label: NodeLabel::Chunk,
                content: chunk.content.clone(),
            });
        }
        for stmt in &bundle.statements {
            docs.push(KeywordDoc {
                id: stmt.id.clone(),
                end_user_id: stmt.end_user_id.clone(),
                label: NodeLabel::Statement,
                content: stmt.statement.clone(),
            });
        }
        for entity in &bundle.entities {
            docs.push(KeywordDoc {
                id: entity.id.clone(),
                end_user_id: entity.end_user_id.clone(),
                label: NodeLabel::ExtractedEntity,
                content: format!("{} {}", entity.name, entity.description),
            });
        }
        for summary in &bundle.summaries {
            docs.push(KeywordDoc {
                id: summary.id.clone(),
                end_user_id: summary.end_user_id.clone(),
                label: NodeLabel::MemorySummary,
                content: format!("{} {}", summary.name, summary.content),
            });
        }
        docs
    }

    fn range_start(time_range: EpisodicTimeRange, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match time_range {
            EpisodicTimeRange::All => None,
            EpisodicTimeRange::Today => now.date_naive().and_hms_opt(0, 0, 0).map(|naive| {
                Utc.from_utc_datetime(&naive)
            }),
            EpisodicTimeRange::ThisWeek => {
                let weekday = now.weekday().num_days_from_monday() as i64;
                let start_day = now.date_naive() - Duration::days(weekday);
                start_day
                    .and_hms_opt(0, 0, 0)
                    .map(|naive| Utc.from_utc_datetime(&naive))
            }
            EpisodicTimeRange::ThisMonth => now
                .date_naive()
                .with_day(1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive)),
        }
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn write_dialogue_batch(&self, bundle: &DialogueBundle) -> Result<()> {
        // Edges may legitimately target entities that store-layer dedup
        // redirected onto persisted nodes; resolve those before validating.
        let persisted_entity_ids: HashSet<String> = {
            let state = self.state.read();
            let bundled: HashSet<&str> = bundle.entities.iter().map(|e| e.id.as_str()).collect();
            bundle
                .statement_entity_edges
                .iter()
                .map(|e| e.target.as_str())
                .chain(
                    bundle
                        .entity_entity_edges
                        .iter()
                        .flat_map(|e| [e.source.as_str(), e.target.as_str()]),
                )
                .filter(|id| !bundled.contains(id) && state.entities.contains_key(*id))
                .map(str::to_string)
                .collect()
        };

        bundle
            .validate(&persisted_entity_ids)
            .map_err(MemoryError::invariant)?;

        let dialogue = bundle
            .dialogue
            .as_ref()
            .ok_or_else(|| MemoryError::invariant("bundle missing dialogue"))?;

        {
            let mut state = self.state.write();

            state
                .dialogues
                .insert(dialogue.id.clone(), dialogue.clone());
            for chunk in &bundle.chunks {
                state.chunks.insert(chunk.id.clone(), chunk.clone());
                state.add_edge_merge(EdgeRecord {
                    id: format!("own-{}", chunk.id),
                    kind: EdgeKind::OwnsChunk,
                    source: chunk.dialogue_id.clone(),
                    target: chunk.id.clone(),
                    end_user_id: chunk.end_user_id.clone(),
                });
            }
            for stmt in &bundle.statements {
                state.statements.insert(stmt.id.clone(), stmt.clone());
            }
            for entity in &bundle.entities {
                state.entities.insert(entity.id.clone(), entity.clone());
            }
            for summary in &bundle.summaries {
                state.summaries.insert(summary.id.clone(), summary.clone());
            }

            for edge in &bundle.statement_chunk_edges {
                state.add_edge_merge(EdgeRecord {
                    id: edge.id.clone(),
                    kind: EdgeKind::DerivedFrom,
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    end_user_id: edge.end_user_id.clone(),
                });
            }
            for edge in &bundle.statement_entity_edges {
                state.add_edge_merge(EdgeRecord {
                    id: edge.id.clone(),
                    kind: EdgeKind::ReferencesEntity,
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    end_user_id: edge.end_user_id.clone(),
                });
            }
            for edge in &bundle.entity_entity_edges {
                state.add_edge_merge(EdgeRecord {
                    id: edge.id.clone(),
                    kind: EdgeKind::Relation(edge.predicate),
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    end_user_id: edge.end_user_id.clone(),
                });
            }
            for edge in &bundle.summary_edges {
                let kind = match edge.kind {
                    engram_core::SummaryEdgeKind::DerivedFromStatement => {
                        EdgeKind::DerivedFromStatement
                    }
                    engram_core::SummaryEdgeKind::DerivedFromChunk => EdgeKind::DerivedFromChunk,
                };
                state.add_edge_merge(EdgeRecord {
                    id: edge.id.clone(),
                    kind,
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    end_user_id: edge.end_user_id.clone(),
                });
            }
        }

        // Derived index; a failure here degrades keyword search only.
        if let Err(e) = self.keyword.upsert_many(&Self::keyword_docs_for_bundle(bundle)) {
            warn!(error = %e, "keyword indexing failed for dialogue batch");
        }

        debug!(
            dialogue_id = %dialogue.id,
            chunks = bundle.chunks.len(),
            statements = bundle.statements.len(),
            entities = bundle.entities.len(),
            summaries = bundle.summaries.len(),
            "dialogue batch committed"
        );
        Ok(())
    }

    async fn search_keyword(
        &self,
        end_user_id: &str,
        query: &str,
        labels: &[NodeLabel],
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let keyword_hits = self.keyword.search(end_user_id, query, labels, k)?;
        let state = self.state.read();

        let mut hits = Vec::with_capacity(keyword_hits.len());
        for hit in keyword_hits {
            let Some(node) = state.node(&hit.id) else {
                continue;
            };
            if node.end_user_id() != end_user_id {
                continue;
            }
            hits.push(SearchHit {
                id: hit.id,
                label: node.label(),
                content: node.display_content().to_string(),
                score: hit.score,
                source_mode: SearchMode::Keyword,
                end_user_id: end_user_id.to_string(),
                created_at: node.created_at(),
            });
        }
        hits.sort_by(|a, b| a.rank_cmp(b));
        Ok(hits)
    }

    async fn search_vector(
        &self,
        end_user_id: &str,
        embedding: &[f32],
        labels: &[NodeLabel],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let state = self.state.read();
        let mut hits: Vec<SearchHit> = Vec::new();

        let mut push = |id: &str, label: NodeLabel, content: &str, vec: &[f32], created_at| {
            let score = cosine_similarity(embedding, vec);
            if score >= threshold {
                hits.push(SearchHit {
                    id: id.to_string(),
                    label,
                    content: content.to_string(),
                    score,
                    source_mode: SearchMode::Embedding,
                    end_user_id: end_user_id.to_string(),
                    created_at,
                });
            }
        };

        for label in labels {
            match label {
                NodeLabel::Dialogue => {
                    for n in state.dialogues.values().filter(|n| n.end_user_id == end_user_id) {
                        push(&n.id, *label, &n.content, &n.dialog_embedding, n.created_at);
                    }
                }
                NodeLabel::Chunk => {
                    for n in state.chunks.values().filter(|n| n.end_user_id == end_user_id) {
                        push(&n.id, *label, &n.content, &n.chunk_embedding, n.created_at);
                    }
                }
                NodeLabel::Statement => {
                    for n in state.statements.values().filter(|n| n.end_user_id == end_user_id) {
                        push(&n.id, *label, &n.statement, &n.statement_embedding, n.created_at);
                    }
                }
                NodeLabel::ExtractedEntity => {
                    for n in state.entities.values().filter(|n| n.end_user_id == end_user_id) {
                        push(&n.id, *label, &n.name, &n.name_embedding, n.created_at);
                    }
                }
                NodeLabel::MemorySummary => {
                    for n in state.summaries.values().filter(|n| n.end_user_id == end_user_id) {
                        push(&n.id, *label, &n.content, &n.summary_embedding, n.created_at);
                    }
                }
            }
        }

        hits.sort_by(|a, b| a.rank_cmp(b));
        hits.truncate(k);
        Ok(hits)
    }

    async fn search_temporal(
        &self,
        end_user_id: &str,
        labels: &[NodeLabel],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let state = self.state.read();
        let mut hits: Vec<(DateTime<Utc>, SearchHit)> = Vec::new();

        for label in labels {
            match label {
                NodeLabel::Statement => {
                    for n in state.statements.values().filter(|n| n.end_user_id == end_user_id) {
                        if n.valid_at >= start && n.valid_at <= end {
                            hits.push((
                                n.valid_at,
                                SearchHit {
                                    id: n.id.clone(),
                                    label: *label,
                                    content: n.statement.clone(),
                                    score: 1.0,
                                    source_mode: SearchMode::Temporal,
                                    end_user_id: end_user_id.to_string(),
                                    created_at: n.created_at,
                                },
                            ));
                        }
                    }
                }
                _ => {
                    let nodes: Vec<GraphNode> = match label {
                        NodeLabel::Dialogue => state
                            .dialogues
                            .values()
                            .filter(|n| n.end_user_id == end_user_id)
                            .cloned()
                            .map(GraphNode::Dialogue)
                            .collect(),
                        NodeLabel::Chunk => state
                            .chunks
                            .values()
                            .filter(|n| n.end_user_id == end_user_id)
                            .cloned()
                            .map(GraphNode::Chunk)
                            .collect(),
                        NodeLabel::ExtractedEntity => state
                            .entities
                            .values()
                            .filter(|n| n.end_user_id == end_user_id)
                            .cloned()
                            .map(GraphNode::ExtractedEntity)
                            .collect(),
                        NodeLabel::MemorySummary => state
                            .summaries
                            .values()
                            .filter(|n| n.end_user_id == end_user_id)
                            .cloned()
                            .map(GraphNode::MemorySummary)
                            .collect(),
                        NodeLabel::Statement => unreachable!(),
                    };
                    for node in nodes {
                        let at = node.created_at();
                        if at >= start && at <= end {
                            hits.push((
                                at,
                                SearchHit {
                                    id: node.id().to_string(),
                                    label: *label,
                                    content: node.display_content().to_string(),
                                    score: 1.0,
                                    source_mode: SearchMode::Temporal,
                                    end_user_id: end_user_id.to_string(),
                                    created_at: at,
                                },
                            ));
                        }
                    }
                }
            }
        }

        hits.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        Ok(hits.into_iter().map(|(_, h)| h).take(k).collect())
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<GraphNode>> {
        let state = self.state.read();
        Ok(ids.iter().filter_map(|id| state.node(id)).collect())
    }

    async fn update_activation(&self, update: &ActivationUpdate) -> Result<()> {
        let mut state = self.state.write();
        let mut history = update.access_history.clone();
        history.truncate(MAX_ACCESS_HISTORY);
        let activation = update.activation_value.clamp(0.0, 1.0);

        match update.label {
            NodeLabel::Statement => {
                if let Some(stmt) = state.statements.get_mut(&update.node_id) {
                    stmt.activation_value = activation;
                    stmt.last_accessed_at = update.last_accessed_at;
                    stmt.access_history = history;
                }
            }
            NodeLabel::ExtractedEntity => {
                if let Some(entity) = state.entities.get_mut(&update.node_id) {
                    entity.activation_value = activation;
                    entity.last_accessed_at = update.last_accessed_at;
                    entity.access_history = history;
                }
            }
            other => {
                return Err(MemoryError::validation(format!(
                    "label {other} does not carry activation"
                )))
            }
        }
        Ok(())
    }

    async fn list_forgettable_pairs(
        &self,
        end_user_id: Option<&str>,
        min_days_since_access: i64,
        activation_threshold: f64,
        limit: usize,
    ) -> Result<Vec<ForgettablePair>> {
        let now = self.clock.now();
        let cutoff = now - Duration::days(min_days_since_access);
        let state = self.state.read();

        let mut pairs: Vec<ForgettablePair> = Vec::new();
        for edge in state
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::ReferencesEntity)
        {
            if let Some(tenant) = end_user_id {
                if edge.end_user_id != tenant {
                    continue;
                }
            }
            let (Some(stmt), Some(entity)) = (
                state.statements.get(&edge.source),
                state.entities.get(&edge.target),
            ) else {
                continue;
            };
            if stmt.last_accessed_at > cutoff || entity.last_accessed_at > cutoff {
                continue;
            }
            let avg = (stmt.activation_value + entity.activation_value) / 2.0;
            if avg >= activation_threshold {
                continue;
            }
            pairs.push(ForgettablePair {
                statement: stmt.clone(),
                entity: entity.clone(),
                avg_activation: avg,
            });
        }

        pairs.sort_by(|a, b| {
            a.avg_activation
                .partial_cmp(&b.avg_activation)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.statement.id.cmp(&b.statement.id))
        });
        pairs.truncate(limit);
        Ok(pairs)
    }

    async fn merge_pair_into_summary(
        &self,
        statement_id: &str,
        entity_id: &str,
        summary: &SummaryNode,
    ) -> Result<MergeOutcome> {
        let mut state = self.state.write();

        if !state.statements.contains_key(statement_id)
            || !state.entities.contains_key(entity_id)
        {
            return Ok(MergeOutcome::Skipped);
        }

        // Former retrieval-relevant neighbours: the statement's source
        // chunks and summaries already derived from it.
        let former_chunks: Vec<String> = state
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::DerivedFrom && e.source == statement_id)
            .map(|e| e.target.clone())
            .collect();
        let related_summaries: Vec<String> = state
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::DerivedFromStatement && e.target == statement_id)
            .map(|e| e.source.clone())
            .collect();

        state.statements.remove(statement_id);
        state.entities.remove(entity_id);
        state.remove_node_edges(statement_id);
        state.remove_node_edges(entity_id);

        let mut summary = summary.clone();
        for chunk_id in &former_chunks {
            if !summary.chunk_ids.contains(chunk_id) {
                summary.chunk_ids.push(chunk_id.clone());
            }
        }
        state.summaries.insert(summary.id.clone(), summary.clone());

        for chunk_id in &former_chunks {
            state.add_edge_merge(EdgeRecord {
                id: format!("sfc-{}-{chunk_id}", summary.id),
                kind: EdgeKind::DerivedFromChunk,
                source: summary.id.clone(),
                target: chunk_id.clone(),
                end_user_id: summary.end_user_id.clone(),
            });
        }
        for related in &related_summaries {
            state.add_edge_merge(EdgeRecord {
                id: format!("rel-{}-{related}", summary.id),
                kind: EdgeKind::RelatedSummary,
                source: summary.id.clone(),
                target: related.clone(),
                end_user_id: summary.end_user_id.clone(),
            });
        }
        drop(state);

        if let Err(e) = self
            .keyword
            .delete(&[statement_id.to_string(), entity_id.to_string()])
        {
            warn!(error = %e, "keyword delete failed during pair merge");
        }
        if let Err(e) = self.keyword.upsert_many(&[KeywordDoc {
            id: summary.id.clone(),
            end_user_id: summary.end_user_id.clone(),
            label: NodeLabel::MemorySummary,
            content: format!("{} {}", summary.name, summary.content),
        }]) {
            warn!(error = %e, "keyword upsert failed during pair merge");
        }

        Ok(MergeOutcome::Merged)
    }

    async fn entities_by_type(
        &self,
        end_user_id: &str,
        entity_type: &str,
    ) -> Result<Vec<EntityNode>> {
        let state = self.state.read();
        let mut entities: Vec<EntityNode> = state
            .entities
            .values()
            .filter(|e| e.end_user_id == end_user_id && e.entity_type == entity_type)
            .cloned()
            .collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entities)
    }

    async fn count_knowledge_nodes(
        &self,
        end_user_id: Option<&str>,
    ) -> Result<KnowledgeNodeCounts> {
        let state = self.state.read();
        let tenant = |id: &str| end_user_id.map_or(true, |t| id == t);
        Ok(KnowledgeNodeCounts {
            statements: state
                .statements
                .values()
                .filter(|n| tenant(&n.end_user_id))
                .count() as u64,
            entities: state
                .entities
                .values()
                .filter(|n| tenant(&n.end_user_id))
                .count() as u64,
            summaries: state
                .summaries
                .values()
                .filter(|n| tenant(&n.end_user_id))
                .count() as u64,
        })
    }

    async fn count_memories(&self, end_user_id: &str) -> Result<MemoryCounts> {
        let state = self.state.read();
        let mut counts = MemoryCounts::default();
        for chunk in state.chunks.values().filter(|c| c.end_user_id == end_user_id) {
            counts.add(chunk.perceptual_type, 1);
        }
        Ok(counts)
    }

    async fn latest_chunk(
        &self,
        end_user_id: &str,
        perceptual_type: PerceptualType,
    ) -> Result<Option<ChunkNode>> {
        let state = self.state.read();
        Ok(state
            .chunks
            .values()
            .filter(|c| c.end_user_id == end_user_id && c.perceptual_type == perceptual_type)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .cloned())
    }

    async fn list_summaries(
        &self,
        end_user_id: &str,
        time_range: EpisodicTimeRange,
        memory_type: Option<MemoryType>,
        title_keyword: Option<&str>,
        now: DateTime<Utc>,
        k: usize,
    ) -> Result<Vec<SummaryNode>> {
        let start = Self::range_start(time_range, now);
        let keyword_lower = title_keyword.map(str::to_lowercase);
        let state = self.state.read();

        let mut summaries: Vec<SummaryNode> = state
            .summaries
            .values()
            .filter(|s| s.end_user_id == end_user_id)
            .filter(|s| start.map_or(true, |t| s.created_at >= t))
            .filter(|s| memory_type.map_or(true, |mt| s.memory_type == mt))
            .filter(|s| {
                keyword_lower
                    .as_deref()
                    .map_or(true, |kw| s.name.to_lowercase().contains(kw))
            })
            .cloned()
            .collect();

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        summaries.truncate(k);
        Ok(summaries)
    }

    async fn summary_detail(
        &self,
        end_user_id: &str,
        summary_id: &str,
    ) -> Result<Option<SummaryDetail>> {
        let state = self.state.read();
        let Some(summary) = state
            .summaries
            .get(summary_id)
            .filter(|s| s.end_user_id == end_user_id)
            .cloned()
        else {
            return Ok(None);
        };

        let statement_ids: Vec<&str> = state
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::DerivedFromStatement && e.source == summary_id)
            .map(|e| e.target.as_str())
            .collect();
        let mut statements: Vec<StatementNode> = statement_ids
            .iter()
            .filter_map(|id| state.statements.get(*id))
            .cloned()
            .collect();
        statements.sort_by(|a, b| a.id.cmp(&b.id));

        let entity_ids: HashSet<&str> = state
            .edges
            .iter()
            .filter(|e| {
                e.kind == EdgeKind::ReferencesEntity
                    && statements.iter().any(|s| s.id == e.source)
            })
            .map(|e| e.target.as_str())
            .collect();
        let mut entities: Vec<EntityNode> = entity_ids
            .iter()
            .filter_map(|id| state.entities.get(*id))
            .cloned()
            .collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));

        let mut chunk_ids: Vec<String> = summary.chunk_ids.clone();
        for edge in state
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::DerivedFromChunk && e.source == summary_id)
        {
            if !chunk_ids.contains(&edge.target) {
                chunk_ids.push(edge.target.clone());
            }
        }
        let mut chunks: Vec<ChunkNode> = chunk_ids
            .iter()
            .filter_map(|id| state.chunks.get(id))
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.sequence_index);

        Ok(Some(SummaryDetail {
            summary,
            statements,
            entities,
            chunks,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::BundleBuilder;
    use chrono::TimeZone;
    use engram_core::ManualClock;

    fn clock_at_2025() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn seeded_graph(clock: Arc<ManualClock>) -> MemoryGraph {
        MemoryGraph::with_clock(clock).unwrap()
    }

    #[tokio::test]
    async fn test_write_and_fetch_round_trip() {
        let clock = clock_at_2025();
        let now = clock.now();
        let graph = seeded_graph(clock);

        let bundle = BundleBuilder::new("u1", "r1", now)
            .with_chunk(0, "Alice works at Acme")
            .with_statement(0, "Alice works at Acme", vec![1.0, 0.0], 0.9, now)
            .with_entity("Alice", "PERSON", 0.9, now)
            .with_summary("Work chat", "Alice talked about her job at Acme")
            .build();

        graph.write_dialogue_batch(&bundle).await.unwrap();

        let stmt_id = bundle.statements[0].id.clone();
        let nodes = graph.fetch_by_ids(&[stmt_id.clone()]).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id(), stmt_id);
    }

    #[tokio::test]
    async fn test_invalid_bundle_leaves_graph_untouched() {
        let clock = clock_at_2025();
        let now = clock.now();
        let graph = seeded_graph(clock);

        let mut bundle = BundleBuilder::new("u1", "r1", now)
            .with_chunk(0, "hello")
            .with_statement(0, "greeting detected", vec![], 0.9, now)
            .build();
        bundle.statement_chunk_edges.clear();

        let err = graph.write_dialogue_batch(&bundle).await.unwrap_err();
        assert!(matches!(err, MemoryError::InvariantViolated(_)));

        let counts = graph.count_knowledge_nodes(None).await.unwrap();
        assert_eq!(counts.total(), 0);
        assert!(graph
            .fetch_by_ids(&[bundle.chunks[0].id.clone()])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let clock = clock_at_2025();
        let now = clock.now();
        let graph = seeded_graph(clock);

        let build = |now| {
            BundleBuilder::new("u1", "r1", now)
                .with_chunk(0, "Alice works at Acme")
                .with_statement(0, "Alice works at Acme", vec![1.0, 0.0], 0.9, now)
                .with_entity("Alice", "PERSON", 0.9, now)
                .build()
        };

        graph.write_dialogue_batch(&build(now)).await.unwrap();
        graph.write_dialogue_batch(&build(now)).await.unwrap();

        let counts = graph.count_knowledge_nodes(Some("u1")).await.unwrap();
        assert_eq!(counts.statements, 1);
        assert_eq!(counts.entities, 1);

        let state = graph.state.read();
        let reference_edges = state
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::ReferencesEntity)
            .count();
        assert_eq!(reference_edges, 1);
    }

    #[tokio::test]
    async fn test_vector_search_is_tenant_scoped() {
        let clock = clock_at_2025();
        let now = clock.now();
        let graph = seeded_graph(clock);

        for tenant in ["u1", "u2"] {
            let bundle = BundleBuilder::new(tenant, "r1", now)
                .with_chunk(0, "Alice works at Acme")
                .with_statement(0, "Alice works at Acme", vec![1.0, 0.0], 0.9, now)
                .build();
            graph.write_dialogue_batch(&bundle).await.unwrap();
        }

        let hits = graph
            .search_vector("u1", &[1.0, 0.0], &[NodeLabel::Statement], 10, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].end_user_id, "u1");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_vector_search_threshold_filters() {
        let clock = clock_at_2025();
        let now = clock.now();
        let graph = seeded_graph(clock);

        let bundle = BundleBuilder::new("u1", "r1", now)
            .with_chunk(0, "a")
            .with_statement(0, "on axis", vec![1.0, 0.0], 0.9, now)
            .with_chunk(1, "b")
            .with_statement(1, "off axis", vec![0.0, 1.0], 0.9, now)
            .build();
        graph.write_dialogue_batch(&bundle).await.unwrap();

        let hits = graph
            .search_vector("u1", &[1.0, 0.0], &[NodeLabel::Statement], 10, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "on axis");
    }

    #[tokio::test]
    async fn test_temporal_search_uses_valid_at_for_statements() {
        let clock = clock_at_2025();
        let now = clock.now();
        let graph = seeded_graph(clock);

        let mut bundle = BundleBuilder::new("u1", "r1", now)
            .with_chunk(0, "history")
            .with_statement(0, "joined in 2021", vec![], 0.9, now)
            .build();
        bundle.statements[0].valid_at = Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap();
        graph.write_dialogue_batch(&bundle).await.unwrap();

        let hits = graph
            .search_temporal(
                "u1",
                &[NodeLabel::Statement],
                Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2021, 12, 31, 0, 0, 0).unwrap(),
                10,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let hits = graph
            .search_temporal(
                "u1",
                &[NodeLabel::Statement],
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap(),
                10,
            )
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_update_activation_clamps_and_bounds_history() {
        let clock = clock_at_2025();
        let now = clock.now();
        let graph = seeded_graph(clock);

        let bundle = BundleBuilder::new("u1", "r1", now)
            .with_chunk(0, "x")
            .with_statement(0, "fact", vec![], 0.9, now)
            .build();
        let stmt_id = bundle.statements[0].id.clone();
        graph.write_dialogue_batch(&bundle).await.unwrap();

        let oversized: Vec<_> = (0..150).map(|i| now - Duration::days(i)).collect();
        graph
            .update_activation(&ActivationUpdate {
                node_id: stmt_id.clone(),
                label: NodeLabel::Statement,
                activation_value: 7.5,
                last_accessed_at: now,
                access_history: oversized,
            })
            .await
            .unwrap();

        let nodes = graph.fetch_by_ids(&[stmt_id]).await.unwrap();
        let GraphNode::Statement(stmt) = &nodes[0] else {
            panic!("expected statement");
        };
        assert_eq!(stmt.activation_value, 1.0);
        assert_eq!(stmt.access_history.len(), MAX_ACCESS_HISTORY);
        assert_eq!(stmt.last_accessed_at, now);
    }

    #[tokio::test]
    async fn test_forgettable_pairs_ordering_and_filters() {
        let clock = clock_at_2025();
        let now = clock.now();
        let graph = seeded_graph(clock.clone());
        let stale = now - Duration::days(60);

        let bundle = BundleBuilder::new("u1", "r1", now)
            .with_chunk(0, "a")
            .with_statement(0, "weak memory", vec![], 0.12, stale)
            .with_entity("Weak", "CONCEPT", 0.10, stale)
            .with_chunk(1, "b")
            .with_statement(1, "weaker memory", vec![], 0.05, stale)
            .with_entity("Weaker", "CONCEPT", 0.05, stale)
            .with_chunk(2, "c")
            .with_statement(2, "fresh memory", vec![], 0.9, now)
            .with_entity("Fresh", "CONCEPT", 0.9, now)
            .build();
        graph.write_dialogue_batch(&bundle).await.unwrap();

        let pairs = graph
            .list_forgettable_pairs(Some("u1"), 30, 0.3, 10)
            .await
            .unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs[0].avg_activation <= pairs[1].avg_activation);
        assert_eq!(pairs[0].statement.statement, "weaker memory");

        // Recently accessed nodes never qualify.
        assert!(!pairs.iter().any(|p| p.statement.statement == "fresh memory"));
    }

    #[tokio::test]
    async fn test_merge_pair_into_summary_deletes_and_reattaches() {
        let clock = clock_at_2025();
        let now = clock.now();
        let graph = seeded_graph(clock);
        let stale = now - Duration::days(60);

        let bundle = BundleBuilder::new("u1", "r1", now)
            .with_chunk(0, "source chunk")
            .with_statement(0, "weak memory", vec![], 0.1, stale)
            .with_entity("Weak", "CONCEPT", 0.1, stale)
            .build();
        let stmt_id = bundle.statements[0].id.clone();
        let entity_id = bundle.entities[0].id.clone();
        let chunk_id = bundle.chunks[0].id.clone();
        graph.write_dialogue_batch(&bundle).await.unwrap();

        let before = graph.count_knowledge_nodes(Some("u1")).await.unwrap();

        let summary = SummaryNode {
            id: "sum-merged-1".into(),
            end_user_id: "u1".into(),
            config_id: "default".into(),
            run_id: None,
            name: "Consolidated memory".into(),
            memory_type: MemoryType::Conversation,
            content: "Weak memory about Weak".into(),
            summary_embedding: vec![],
            chunk_ids: vec![],
            created_at: now,
            expired_at: engram_core::far_future(),
        };

        let outcome = graph
            .merge_pair_into_summary(&stmt_id, &entity_id, &summary)
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Merged);

        let after = graph.count_knowledge_nodes(Some("u1")).await.unwrap();
        assert_eq!(after.statements, before.statements - 1);
        assert_eq!(after.entities, before.entities - 1);
        assert_eq!(after.summaries, before.summaries + 1);

        let detail = graph
            .summary_detail("u1", "sum-merged-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(detail.chunks.len(), 1);
        assert_eq!(detail.chunks[0].id, chunk_id);

        // Second merge of the same pair is a skip, not a failure.
        let outcome = graph
            .merge_pair_into_summary(&stmt_id, &entity_id, &summary)
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_list_summaries_filters() {
        let clock = clock_at_2025();
        let now = clock.now();
        let graph = seeded_graph(clock);

        let bundle = BundleBuilder::new("u1", "r1", now)
            .with_chunk(0, "project talk")
            .with_summary("Project kickoff", "Discussed the new project")
            .build();
        graph.write_dialogue_batch(&bundle).await.unwrap();

        let all = graph
            .list_summaries("u1", EpisodicTimeRange::All, None, None, now, 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);

        let titled = graph
            .list_summaries("u1", EpisodicTimeRange::All, None, Some("kickoff"), now, 10)
            .await
            .unwrap();
        assert_eq!(titled.len(), 1);

        let missing = graph
            .list_summaries("u1", EpisodicTimeRange::All, None, Some("standup"), now, 10)
            .await
            .unwrap();
        assert!(missing.is_empty());

        let other_tenant = graph
            .list_summaries("u2", EpisodicTimeRange::All, None, None, now, 10)
            .await
            .unwrap();
        assert!(other_tenant.is_empty());
    }

    #[tokio::test]
    async fn test_count_memories_by_perceptual_type() {
        let clock = clock_at_2025();
        let now = clock.now();
        let graph = seeded_graph(clock);

        let mut bundle = BundleBuilder::new("u1", "r1", now)
            .with_chunk(0, "spoken words")
            .with_chunk(1, "typed words")
            .build();
        bundle.chunks[0].perceptual_type = PerceptualType::Audio;
        graph.write_dialogue_batch(&bundle).await.unwrap();

        let counts = graph.count_memories("u1").await.unwrap();
        assert_eq!(counts.audio, 1);
        assert_eq!(counts.text, 1);
        assert_eq!(counts.total, 2);

        let latest = graph
            .latest_chunk("u1", PerceptualType::Audio)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.content, "spoken words");
    }
}
