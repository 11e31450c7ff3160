//! Graph store adapter over a Cypher-speaking driver
//!
//! The production `GraphStore`: every operation is a template from
//! `queries` plus a parameter map, executed through the `CypherExecutor`
//! port. Batch writes go through the driver's explicit-transaction API so a
//! dialogue commits all-or-nothing.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use tracing::debug;

use engram_core::types::views::{
    EpisodicTimeRange, KnowledgeNodeCounts, MemoryCounts, SummaryDetail,
};
use engram_core::{
    ActivationUpdate, ChunkNode, DialogueBundle, EntityNode, ForgettablePair, GraphNode,
    GraphStore, MemoryError, MemoryType, MergeOutcome, NodeLabel, PerceptualType, Result,
    SearchHit, SearchMode, StatementNode, SummaryNode,
};

use crate::queries;

/// Driver port: executes one parameterised query, or a list of them inside
/// a single explicit transaction.
#[async_trait]
pub trait CypherExecutor: Send + Sync {
    /// Run one query; each returned row is a JSON object keyed by the
    /// query's RETURN aliases.
    async fn execute(&self, query: &str, params: Value) -> Result<Vec<Value>>;

    /// Run all statements inside one write transaction; rolls back on the
    /// first failure.
    async fn execute_in_transaction(&self, statements: &[(String, Value)]) -> Result<()>;
}

pub struct CypherGraphStore<E> {
    executor: E,
}

impl<E: CypherExecutor> CypherGraphStore<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    fn to_rows<T: serde::Serialize>(items: &[T]) -> Result<Value> {
        serde_json::to_value(items)
            .map_err(|e| MemoryError::permanent("graph", format!("serialize rows: {e}")))
    }

    fn decode_node(label: &str, props: Value) -> Option<GraphNode> {
        match label {
            "Dialogue" => serde_json::from_value(props).ok().map(GraphNode::Dialogue),
            "Chunk" => serde_json::from_value(props).ok().map(GraphNode::Chunk),
            "Statement" => serde_json::from_value(props).ok().map(GraphNode::Statement),
            "ExtractedEntity" => serde_json::from_value(props)
                .ok()
                .map(GraphNode::ExtractedEntity),
            "MemorySummary" => serde_json::from_value(props)
                .ok()
                .map(GraphNode::MemorySummary),
            _ => None,
        }
    }

    fn decode_hit(row: &Value, source_mode: SearchMode) -> Option<SearchHit> {
        let label = row.get("label")?.as_str()?;
        let score = row.get("score")?.as_f64()? as f32;
        let node = Self::decode_node(label, row.get("node")?.clone())?;
        Some(SearchHit {
            id: node.id().to_string(),
            label: node.label(),
            content: node.display_content().to_string(),
            score,
            source_mode,
            end_user_id: node.end_user_id().to_string(),
            created_at: node.created_at(),
        })
    }
}

#[async_trait]
impl<E: CypherExecutor> GraphStore for CypherGraphStore<E> {
    async fn write_dialogue_batch(&self, bundle: &DialogueBundle) -> Result<()> {
        // Edge targets absent from the bundle are entities the store-layer
        // dedup redirected onto persisted nodes; the MATCH clauses in the
        // edge templates enforce their existence server-side, so local
        // validation treats them as known.
        let redirected: std::collections::HashSet<String> = bundle
            .statement_entity_edges
            .iter()
            .map(|e| e.target.clone())
            .chain(
                bundle
                    .entity_entity_edges
                    .iter()
                    .flat_map(|e| [e.source.clone(), e.target.clone()]),
            )
            .collect();
        bundle.validate(&redirected).map_err(MemoryError::invariant)?;

        let dialogue = bundle
            .dialogue
            .as_ref()
            .ok_or_else(|| MemoryError::invariant("bundle missing dialogue"))?;

        let dialogue_params = serde_json::to_value(dialogue)
            .map_err(|e| MemoryError::permanent("graph", format!("serialize dialogue: {e}")))?;

        let mut statements: Vec<(String, Value)> = vec![(
            queries::DIALOGUE_NODE_SAVE.to_string(),
            dialogue_params,
        )];

        if !bundle.chunks.is_empty() {
            statements.push((
                queries::CHUNK_NODES_SAVE.to_string(),
                json!({"chunks": Self::to_rows(&bundle.chunks)?}),
            ));
        }
        if !bundle.statements.is_empty() {
            statements.push((
                queries::STATEMENT_NODES_SAVE.to_string(),
                json!({"statements": Self::to_rows(&bundle.statements)?}),
            ));
        }
        if !bundle.entities.is_empty() {
            statements.push((
                queries::EXTRACTED_ENTITY_NODES_SAVE.to_string(),
                json!({"entities": Self::to_rows(&bundle.entities)?}),
            ));
        }
        if !bundle.summaries.is_empty() {
            statements.push((
                queries::MEMORY_SUMMARY_NODES_SAVE.to_string(),
                json!({"summaries": Self::to_rows(&bundle.summaries)?}),
            ));
        }
        if !bundle.statement_chunk_edges.is_empty() {
            statements.push((
                queries::STATEMENT_CHUNK_EDGES_SAVE.to_string(),
                json!({"edges": Self::to_rows(&bundle.statement_chunk_edges)?}),
            ));
        }
        if !bundle.statement_entity_edges.is_empty() {
            statements.push((
                queries::STATEMENT_ENTITY_EDGES_SAVE.to_string(),
                json!({"edges": Self::to_rows(&bundle.statement_entity_edges)?}),
            ));
        }
        if !bundle.entity_entity_edges.is_empty() {
            let rows: Vec<Value> = bundle
                .entity_entity_edges
                .iter()
                .map(|e| {
                    let mut row = serde_json::to_value(e).unwrap_or(Value::Null);
                    if let Some(obj) = row.as_object_mut() {
                        obj.insert("predicate".into(), json!(e.predicate.as_str()));
                    }
                    row
                })
                .collect();
            statements.push((
                queries::ENTITY_RELATIONSHIPS_SAVE.to_string(),
                json!({"relationships": rows}),
            ));
        }
        if !bundle.summary_edges.is_empty() {
            statements.push((
                queries::SUMMARY_EDGES_SAVE.to_string(),
                json!({"edges": Self::to_rows(&bundle.summary_edges)?}),
            ));
        }

        debug!(
            dialogue_id = %dialogue.id,
            statement_count = statements.len(),
            "writing dialogue batch in one transaction"
        );
        self.executor.execute_in_transaction(&statements).await
    }

    async fn search_keyword(
        &self,
        end_user_id: &str,
        query: &str,
        labels: &[NodeLabel],
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for label in labels {
            let rows = self
                .executor
                .execute(
                    queries::KEYWORD_SEARCH,
                    json!({
                        "index_name": queries::fulltext_index_name(*label),
                        "query": query,
                        "end_user_id": end_user_id,
                        "k": k,
                    }),
                )
                .await?;
            hits.extend(rows.iter().filter_map(|r| Self::decode_hit(r, SearchMode::Keyword)));
        }
        hits.sort_by(|a, b| a.rank_cmp(b));
        hits.truncate(k);
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
        let mut hits = Vec::new();
        for label in labels {
            let rows = self
                .executor
                .execute(
                    queries::VECTOR_SEARCH,
                    json!({
                        "index_name": queries::vector_index_name(*label),
                        "embedding": embedding,
                        "end_user_id": end_user_id,
                        "k": k,
                        "threshold": threshold,
                    }),
                )
                .await?;
            hits.extend(rows.iter().filter_map(|r| Self::decode_hit(r, SearchMode::Embedding)));
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
        let mut hits = Vec::new();
        for label in labels {
            let (query, params) = if *label == NodeLabel::Statement {
                (
                    queries::TEMPORAL_SEARCH_STATEMENTS.to_string(),
                    json!({
                        "end_user_id": end_user_id,
                        "start": start,
                        "end": end,
                        "k": k,
                    }),
                )
            } else {
                (
                    queries::TEMPORAL_SEARCH_BY_CREATED.replace("{label}", label.as_str()),
                    json!({
                        "end_user_id": end_user_id,
                        "start": start,
                        "end": end,
                        "k": k,
                    }),
                )
            };
            let rows = self.executor.execute(&query, params).await?;
            hits.extend(rows.iter().filter_map(|r| Self::decode_hit(r, SearchMode::Temporal)));
        }
        hits.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<GraphNode>> {
        let rows = self
            .executor
            .execute(queries::FETCH_BY_IDS, json!({ "ids": ids }))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let label = row.get("label")?.as_str()?;
                Self::decode_node(label, row.get("node")?.clone())
            })
            .collect())
    }

    async fn update_activation(&self, update: &ActivationUpdate) -> Result<()> {
        self.executor
            .execute(
                queries::UPDATE_ACTIVATION,
                json!({
                    "node_id": update.node_id,
                    "activation_value": update.activation_value.clamp(0.0, 1.0),
                    "last_accessed_at": update.last_accessed_at,
                    "access_history": update.access_history,
                }),
            )
            .await?;
        Ok(())
    }

    async fn list_forgettable_pairs(
        &self,
        end_user_id: Option<&str>,
        min_days_since_access: i64,
        activation_threshold: f64,
        limit: usize,
    ) -> Result<Vec<ForgettablePair>> {
        let cutoff = Utc::now() - Duration::days(min_days_since_access);
        let rows = self
            .executor
            .execute(
                queries::LIST_FORGETTABLE_PAIRS,
                json!({
                    "end_user_id": end_user_id,
                    "cutoff": cutoff,
                    "activation_threshold": activation_threshold,
                    "limit": limit,
                }),
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let statement: StatementNode =
                    serde_json::from_value(row.get("statement")?.clone()).ok()?;
                let entity: EntityNode = serde_json::from_value(row.get("entity")?.clone()).ok()?;
                let avg_activation = row.get("avg_activation")?.as_f64()?;
                Some(ForgettablePair {
                    statement,
                    entity,
                    avg_activation,
                })
            })
            .collect())
    }

    async fn merge_pair_into_summary(
        &self,
        statement_id: &str,
        entity_id: &str,
        summary: &SummaryNode,
    ) -> Result<MergeOutcome> {
        let summary_value = serde_json::to_value(summary)
            .map_err(|e| MemoryError::permanent("graph", format!("serialize summary: {e}")))?;
        let rows = self
            .executor
            .execute(
                queries::MERGE_PAIR_INTO_SUMMARY,
                json!({
                    "statement_id": statement_id,
                    "entity_id": entity_id,
                    "summary": summary_value,
                }),
            )
            .await?;
        // The initial MATCH finds nothing when either node is already gone.
        if rows.is_empty() {
            Ok(MergeOutcome::Skipped)
        } else {
            Ok(MergeOutcome::Merged)
        }
    }

    async fn entities_by_type(
        &self,
        end_user_id: &str,
        entity_type: &str,
    ) -> Result<Vec<EntityNode>> {
        let rows = self
            .executor
            .execute(
                queries::ENTITIES_BY_TYPE,
                json!({
                    "end_user_id": end_user_id,
                    "entity_type": entity_type,
                }),
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| serde_json::from_value(row.get("node")?.clone()).ok())
            .collect())
    }

    async fn count_knowledge_nodes(
        &self,
        end_user_id: Option<&str>,
    ) -> Result<KnowledgeNodeCounts> {
        let rows = self
            .executor
            .execute(
                queries::COUNT_KNOWLEDGE_NODES,
                json!({ "end_user_id": end_user_id }),
            )
            .await?;
        let row = rows.first().cloned().unwrap_or_else(|| Value::Object(Map::new()));
        Ok(KnowledgeNodeCounts {
            statements: row.get("statements").and_then(Value::as_u64).unwrap_or(0),
            entities: row.get("entities").and_then(Value::as_u64).unwrap_or(0),
            summaries: row.get("summaries").and_then(Value::as_u64).unwrap_or(0),
        })
    }

    async fn count_memories(&self, end_user_id: &str) -> Result<MemoryCounts> {
        let rows = self
            .executor
            .execute(queries::COUNT_MEMORIES, json!({ "end_user_id": end_user_id }))
            .await?;
        let mut counts = MemoryCounts::default();
        for row in rows {
            let Some(kind) = row.get("perceptual_type").and_then(Value::as_str) else {
                continue;
            };
            let count = row.get("count").and_then(Value::as_u64).unwrap_or(0);
            match serde_json::from_value::<PerceptualType>(json!(kind)) {
                Ok(perceptual) => counts.add(perceptual, count),
                Err(_) => counts.add(PerceptualType::Text, count),
            }
        }
        Ok(counts)
    }

    async fn latest_chunk(
        &self,
        end_user_id: &str,
        perceptual_type: PerceptualType,
    ) -> Result<Option<ChunkNode>> {
        let rows = self
            .executor
            .execute(
                queries::LATEST_CHUNK,
                json!({
                    "end_user_id": end_user_id,
                    "perceptual_type": perceptual_type,
                }),
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|row| serde_json::from_value(row.get("node")?.clone()).ok()))
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
        let start = match time_range {
            EpisodicTimeRange::All => None,
            EpisodicTimeRange::Today => Some(now - Duration::days(1)),
            EpisodicTimeRange::ThisWeek => Some(now - Duration::days(7)),
            EpisodicTimeRange::ThisMonth => Some(now - Duration::days(30)),
        };
        let rows = self
            .executor
            .execute(
                queries::LIST_SUMMARIES,
                json!({
                    "end_user_id": end_user_id,
                    "start": start,
                    "memory_type": memory_type,
                    "title_keyword": title_keyword,
                    "k": k,
                }),
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| serde_json::from_value(row.get("node")?.clone()).ok())
            .collect())
    }

    async fn summary_detail(
        &self,
        end_user_id: &str,
        summary_id: &str,
    ) -> Result<Option<SummaryDetail>> {
        let rows = self
            .executor
            .execute(
                queries::SUMMARY_DETAIL,
                json!({
                    "end_user_id": end_user_id,
                    "summary_id": summary_id,
                }),
            )
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let Some(summary) = row
            .get("summary")
            .and_then(|v| serde_json::from_value::<SummaryNode>(v.clone()).ok())
        else {
            return Ok(None);
        };

        let decode_list = |key: &str| -> Vec<Value> {
            row.get(key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|v| !v.is_null())
                .collect()
        };

        Ok(Some(SummaryDetail {
            summary,
            statements: decode_list("statements")
                .into_iter()
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect(),
            entities: decode_list("entities")
                .into_iter()
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect(),
            chunks: decode_list("chunks")
                .into_iter()
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect(),
        }))
    }
}
