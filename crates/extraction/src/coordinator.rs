//! Write coordinator
//!
//! Single entry point for the write path: preprocess → (extract ∥
//! summarise) → in-batch dedup → batched embeddings → store-layer dedup →
//! one transactional graph write. Any hard failure aborts the whole ingest
//! with no partial write.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument};

use engram_config::{MemoryConfig, OntologyRegistry};
use engram_core::{
    ids, ChunkNode, Clock, DialogueBundle, DialogueNode, DialoguePayload, Embedder,
    EntityEntityEdge, EntityNode, GraphStore, IngestReceipt, LanguageModel, MemoryError,
    PerceptualType, Result, StatementChunkEdge, StatementEntityEdge, StatementNode, SummaryEdge,
    SummaryEdgeKind, SummaryNode,
};

use crate::chunker::chunker_for;
use crate::dedup::Deduplicator;
use crate::extractor::{ChunkExtraction, StatementExtractor};
use crate::preprocess::{PreparedDialogue, Preprocessor};
use crate::summarizer::{DraftSummary, Summarizer};

pub struct WriteCoordinator {
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
    ontology: OntologyRegistry,
}

impl WriteCoordinator {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn GraphStore>,
        clock: Arc<dyn Clock>,
        ontology: OntologyRegistry,
    ) -> Self {
        Self {
            llm,
            embedder,
            store,
            clock,
            ontology,
        }
    }

    /// Ingest one dialogue for a tenant. Returns the persisted ids.
    #[instrument(skip_all, fields(end_user_id = %end_user_id, ref_id = %payload.ref_id))]
    pub async fn ingest(
        &self,
        end_user_id: &str,
        config: &MemoryConfig,
        payload: &DialoguePayload,
        session_context: Option<&str>,
        run_id: Option<String>,
    ) -> Result<IngestReceipt> {
        let chunker = chunker_for(config, Some(self.llm.clone()));
        let preprocessor = Preprocessor::new(config, chunker.as_ref());
        let prepared = preprocessor.prepare(payload).await?;

        // Extraction must succeed overall; summarisation tolerates
        // per-chunk failures.
        let extractor = StatementExtractor::new(self.llm.clone(), self.ontology.clone());
        let summarizer = Summarizer::new(self.llm.clone(), config.language);

        let (extractions, summaries) = tokio::join!(
            extractor.extract_dialogue(config, &prepared.chunks, session_context),
            async {
                let mut drafts: Vec<DraftSummary> = Vec::new();
                for chunk in &prepared.chunks {
                    if let Some(draft) = summarizer.summarize_chunk(chunk).await {
                        drafts.push(draft);
                    }
                }
                drafts
            }
        );
        let extractions = extractions?;

        let mut bundle = self.assemble(
            end_user_id,
            config,
            &prepared,
            &extractions,
            &summaries,
            run_id,
        )?;

        // Layer A dedup, then edges through the redirect map.
        let dedup = Deduplicator::new(
            self.embedder.clone(),
            Some(self.llm.clone()),
            config.dedup.clone(),
        );
        let (layer_a, _) = dedup.dedup_batch(std::mem::take(&mut bundle.entities)).await?;
        bundle.entities = layer_a.entities;
        apply_redirect(&mut bundle, &layer_a.id_redirect);

        // Batched embeddings for everything at once.
        self.embed_bundle(&mut bundle).await?;

        // Layer B against the persisted store.
        let (layer_b, _) = dedup
            .dedup_against_store(std::mem::take(&mut bundle.entities), self.store.as_ref(), end_user_id)
            .await?;
        bundle.entities = layer_b.entities;
        apply_redirect(&mut bundle, &layer_b.id_redirect);

        self.store.write_dialogue_batch(&bundle).await?;

        let receipt = IngestReceipt {
            dialogue_id: bundle.dialogue.as_ref().map(|d| d.id.clone()).unwrap_or_default(),
            chunk_ids: bundle.chunks.iter().map(|c| c.id.clone()).collect(),
            statement_ids: bundle.statements.iter().map(|s| s.id.clone()).collect(),
            entity_ids: bundle.entities.iter().map(|e| e.id.clone()).collect(),
            summary_ids: bundle.summaries.iter().map(|s| s.id.clone()).collect(),
        };
        info!(
            dialogue_id = %receipt.dialogue_id,
            chunks = receipt.chunk_ids.len(),
            statements = receipt.statement_ids.len(),
            entities = receipt.entity_ids.len(),
            summaries = receipt.summary_ids.len(),
            "dialogue ingested"
        );
        Ok(receipt)
    }

    /// Turn drafts into the flat value bundle
    fn assemble(
        &self,
        end_user_id: &str,
        config: &MemoryConfig,
        prepared: &PreparedDialogue,
        extractions: &[ChunkExtraction],
        summaries: &[DraftSummary],
        run_id: Option<String>,
    ) -> Result<DialogueBundle> {
        let now = self.clock.now();
        let expired = engram_core::far_future();
        let dialogue_id = ids::dialogue_id(end_user_id, &prepared.ref_id);

        let mut bundle = DialogueBundle {
            dialogue: Some(DialogueNode {
                id: dialogue_id.clone(),
                end_user_id: end_user_id.to_string(),
                config_id: config.config_id.clone(),
                run_id: run_id.clone(),
                ref_id: prepared.ref_id.clone(),
                content: prepared.transcript.clone(),
                dialog_embedding: vec![],
                created_at: now,
                expired_at: expired,
            }),
            ..Default::default()
        };

        for chunk in &prepared.chunks {
            bundle.chunks.push(ChunkNode {
                id: ids::chunk_id(&dialogue_id, chunk.sequence_index),
                end_user_id: end_user_id.to_string(),
                config_id: config.config_id.clone(),
                run_id: run_id.clone(),
                dialogue_id: dialogue_id.clone(),
                content: chunk.text.clone(),
                speaker: chunk.speaker,
                sequence_index: chunk.sequence_index,
                perceptual_type: PerceptualType::Text,
                chunk_embedding: vec![],
                created_at: now,
                expired_at: expired,
            });
        }

        let mut statements_by_chunk: HashMap<usize, Vec<String>> = HashMap::new();
        for extraction in extractions {
            let chunk_id = ids::chunk_id(&dialogue_id, extraction.chunk_index);
            for draft in &extraction.statements {
                let stmt_id = ids::statement_id(&chunk_id, &draft.statement);
                statements_by_chunk
                    .entry(extraction.chunk_index)
                    .or_default()
                    .push(stmt_id.clone());
                // Temporal defaults and the monotonicity invariant.
                let valid_at = draft.valid_at.unwrap_or(now);
                let invalid_at = draft.invalid_at.unwrap_or(expired);
                if invalid_at < valid_at {
                    return Err(MemoryError::invariant(format!(
                        "statement {stmt_id}: invalid_at precedes valid_at"
                    )));
                }

                bundle.statements.push(StatementNode {
                    id: stmt_id.clone(),
                    end_user_id: end_user_id.to_string(),
                    config_id: config.config_id.clone(),
                    run_id: run_id.clone(),
                    statement: draft.statement.clone(),
                    stmt_type: draft.stmt_type,
                    temporal_info: draft.temporal_info,
                    valid_at,
                    invalid_at,
                    emotion_type: draft.emotion_type,
                    emotion_intensity: draft.emotion_intensity,
                    activation_value: 1.0,
                    importance_score: draft.importance_score,
                    access_history: vec![now],
                    last_accessed_at: now,
                    statement_embedding: vec![],
                    created_at: now,
                    expired_at: expired,
                });
                bundle.statement_chunk_edges.push(StatementChunkEdge {
                    id: ids::new_id(),
                    source: stmt_id.clone(),
                    target: chunk_id.clone(),
                    end_user_id: end_user_id.to_string(),
                    run_id: run_id.clone(),
                    created_at: now,
                    expired_at: expired,
                });

                // Entities mentioned by this statement, then its relations
                // through the per-statement index space.
                let mut entity_ids_for_stmt: Vec<String> = Vec::new();
                for mention in &draft.entities {
                    let entity_id = ids::new_id();
                    bundle.entities.push(EntityNode {
                        id: entity_id.clone(),
                        end_user_id: end_user_id.to_string(),
                        config_id: config.config_id.clone(),
                        run_id: run_id.clone(),
                        name: mention.name.clone(),
                        entity_type: mention.entity_type.clone(),
                        description: mention.description.clone(),
                        fact_summary: draft.statement.clone(),
                        activation_value: 1.0,
                        importance_score: draft.importance_score,
                        access_history: vec![now],
                        last_accessed_at: now,
                        name_embedding: vec![],
                        is_explicit_memory: true,
                        created_at: now,
                        expired_at: expired,
                    });
                    bundle.statement_entity_edges.push(StatementEntityEdge {
                        id: ids::new_id(),
                        source: stmt_id.clone(),
                        target: entity_id.clone(),
                        end_user_id: end_user_id.to_string(),
                        run_id: run_id.clone(),
                        connect_strength: 1.0,
                        created_at: now,
                        expired_at: expired,
                    });
                    entity_ids_for_stmt.push(entity_id);
                }

                for relation in &draft.relations {
                    let (Some(subject), Some(object)) = (
                        entity_ids_for_stmt.get(relation.subject_idx),
                        entity_ids_for_stmt.get(relation.object_idx),
                    ) else {
                        continue;
                    };
                    bundle.entity_entity_edges.push(EntityEntityEdge {
                        id: ids::new_id(),
                        source: subject.clone(),
                        target: object.clone(),
                        predicate: relation.predicate,
                        value: relation.value.clone(),
                        statement: draft.statement.clone(),
                        source_statement_id: stmt_id.clone(),
                        valid_at: relation.valid_at,
                        invalid_at: relation.invalid_at,
                        end_user_id: end_user_id.to_string(),
                        run_id: run_id.clone(),
                        created_at: now,
                        expired_at: expired,
                    });
                }
            }
        }

        for draft in summaries {
            let chunk_id = ids::chunk_id(&dialogue_id, draft.chunk_index);
            let summary_id = ids::summary_id(&chunk_id);
            bundle.summaries.push(SummaryNode {
                id: summary_id.clone(),
                end_user_id: end_user_id.to_string(),
                config_id: config.config_id.clone(),
                run_id: run_id.clone(),
                name: draft.title.clone(),
                memory_type: draft.memory_type,
                content: draft.content.clone(),
                summary_embedding: vec![],
                chunk_ids: vec![chunk_id.clone()],
                created_at: now,
                expired_at: expired,
            });
            bundle.summary_edges.push(SummaryEdge {
                id: ids::new_id(),
                source: summary_id.clone(),
                target: chunk_id.clone(),
                kind: SummaryEdgeKind::DerivedFromChunk,
                end_user_id: end_user_id.to_string(),
                run_id: run_id.clone(),
                created_at: now,
                expired_at: expired,
            });
            // Statements extracted from the same chunk back the summary.
            for stmt_id in statements_by_chunk
                .get(&draft.chunk_index)
                .map(Vec::as_slice)
                .unwrap_or_default()
            {
                bundle.summary_edges.push(SummaryEdge {
                    id: ids::new_id(),
                    source: summary_id.clone(),
                    target: stmt_id.clone(),
                    kind: SummaryEdgeKind::DerivedFromStatement,
                    end_user_id: end_user_id.to_string(),
                    run_id: run_id.clone(),
                    created_at: now,
                    expired_at: expired,
                });
            }
        }

        Ok(bundle)
    }

    /// Embed dialogue, chunks, statements, entity names and summaries in
    /// one batched call, then scatter the vectors back.
    async fn embed_bundle(&self, bundle: &mut DialogueBundle) -> Result<()> {
        let mut texts: Vec<String> = Vec::new();

        if let Some(dialogue) = &bundle.dialogue {
            texts.push(dialogue.content.clone());
        }
        texts.extend(bundle.chunks.iter().map(|c| c.content.clone()));
        texts.extend(bundle.statements.iter().map(|s| s.statement.clone()));
        texts.extend(bundle.entities.iter().map(|e| e.name.clone()));
        texts.extend(bundle.summaries.iter().map(|s| s.content.clone()));

        if texts.is_empty() {
            return Ok(());
        }
        let mut vectors = self.embedder.embed_many(&texts).await?.into_iter();
        let mut next = || {
            vectors.next().ok_or_else(|| {
                MemoryError::permanent("embedder", "short batch response")
            })
        };

        if let Some(dialogue) = bundle.dialogue.as_mut() {
            dialogue.dialog_embedding = next()?;
        }
        for chunk in &mut bundle.chunks {
            chunk.chunk_embedding = next()?;
        }
        for stmt in &mut bundle.statements {
            stmt.statement_embedding = next()?;
        }
        for entity in &mut bundle.entities {
            entity.name_embedding = next()?;
        }
        for summary in &mut bundle.summaries {
            summary.summary_embedding = next()?;
        }
        Ok(())
    }
}

/// Rewrite every edge endpoint through a dedup redirect map
fn apply_redirect(bundle: &mut DialogueBundle, redirect: &HashMap<String, String>) {
    if redirect.is_empty() {
        return;
    }
    let resolve = |id: &mut String| {
        let mut seen = 0;
        while let Some(target) = redirect.get(id.as_str()) {
            *id = target.clone();
            seen += 1;
            if seen > redirect.len() {
                break;
            }
        }
    };

    for edge in &mut bundle.statement_entity_edges {
        resolve(&mut edge.target);
    }
    for edge in &mut bundle.entity_entity_edges {
        resolve(&mut edge.source);
        resolve(&mut edge.target);
    }

    // Merging can leave duplicate edges; collapse them.
    bundle
        .statement_entity_edges
        .sort_by(|a, b| (a.source.as_str(), a.target.as_str()).cmp(&(b.source.as_str(), b.target.as_str())));
    bundle
        .statement_entity_edges
        .dedup_by(|a, b| a.source == b.source && a.target == b.target);
    bundle.entity_entity_edges.sort_by(|a, b| {
        (a.source.as_str(), a.target.as_str(), a.predicate.as_str())
            .cmp(&(b.source.as_str(), b.target.as_str(), b.predicate.as_str()))
    });
    bundle.entity_entity_edges.dedup_by(|a, b| {
        a.source == b.source && a.target == b.target && a.predicate == b.predicate
    });
    // Self-relations can appear when both endpoints collapse onto one
    // entity; they carry no information.
    bundle.entity_entity_edges.retain(|e| e.source != e.target);
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::testing::{HashEmbedder, SchemaRoutingLlm};
    use engram_core::{DialogueMessage, SystemClock};
    use engram_graph::MemoryGraph;
    use serde_json::json;

    fn payload() -> DialoguePayload {
        DialoguePayload {
            ref_id: "r1".into(),
            messages: vec![
                DialogueMessage {
                    role: "user".into(),
                    msg: "Alice works at Acme".into(),
                },
                DialogueMessage {
                    role: "assistant".into(),
                    msg: "Since when does she work there?".into(),
                },
                DialogueMessage {
                    role: "user".into(),
                    msg: "Since 2021-03-01".into(),
                },
            ],
        }
    }

    fn routing_llm() -> Arc<SchemaRoutingLlm> {
        Arc::new(
            SchemaRoutingLlm::new()
                .route(
                    "statements",
                    json!({
                        "statements": [{
                            "statement": "Alice works at Acme since 2021-03-01",
                            "stmt_type": "FACT",
                            "temporal_info": "DYNAMIC",
                            "valid_at": "2021-03-01",
                            "importance_score": 0.8,
                            "entities": [
                                {"name": "Alice", "entity_type": "PERSON"},
                                {"name": "Acme", "entity_type": "ORGANIZATION"}
                            ],
                            "relations": [
                                {"subject_idx": 0, "object_idx": 1, "predicate": "WORKS_AT"}
                            ]
                        }]
                    }),
                )
                .route(
                    "memory_type",
                    json!({
                        "title": "Job talk",
                        "summary": "Alice talked about working at Acme since March 2021.",
                        "memory_type": "conversation"
                    }),
                )
                .route("verdicts", json!({"verdicts": []})),
        )
    }

    fn coordinator(store: Arc<dyn GraphStore>) -> WriteCoordinator {
        WriteCoordinator::new(
            routing_llm(),
            Arc::new(HashEmbedder::default()),
            store,
            Arc::new(SystemClock),
            engram_config::OntologyRegistry::curated(),
        )
    }

    #[tokio::test]
    async fn test_ingest_simple_dialogue() {
        let store = Arc::new(MemoryGraph::new().unwrap());
        let coord = coordinator(store.clone());
        let config = MemoryConfig::default();

        let receipt = coord
            .ingest("u1", &config, &payload(), None, None)
            .await
            .unwrap();

        assert_eq!(receipt.chunk_ids.len(), 3);
        assert!(!receipt.statement_ids.is_empty());
        assert_eq!(receipt.summary_ids.len(), 3);
        // Alice + Acme appear in each user turn's extraction but dedup
        // collapses them per batch.
        assert_eq!(receipt.entity_ids.len(), 2);

        let counts = store.count_knowledge_nodes(Some("u1")).await.unwrap();
        assert_eq!(counts.entities, 2);

        let nodes = store.fetch_by_ids(&receipt.statement_ids).await.unwrap();
        let engram_core::GraphNode::Statement(stmt) = &nodes[0] else {
            panic!("expected statement");
        };
        assert_eq!(
            stmt.valid_at.format("%Y-%m-%d").to_string(),
            "2021-03-01"
        );
        assert!(stmt.statement_embedding.len() > 0);
    }

    #[tokio::test]
    async fn test_reingest_same_ref_id_is_idempotent() {
        let store = Arc::new(MemoryGraph::new().unwrap());
        let coord = coordinator(store.clone());
        let config = MemoryConfig::default();

        let first = coord
            .ingest("u1", &config, &payload(), None, None)
            .await
            .unwrap();
        let second = coord
            .ingest("u1", &config, &payload(), None, None)
            .await
            .unwrap();

        assert_eq!(first.dialogue_id, second.dialogue_id);
        assert_eq!(first.chunk_ids, second.chunk_ids);
        assert_eq!(first.statement_ids, second.statement_ids);

        let counts = store.count_knowledge_nodes(Some("u1")).await.unwrap();
        // No duplicate statements or entities after the second write.
        assert_eq!(counts.statements as usize, first.statement_ids.len());
        assert_eq!(counts.entities, 2);
    }

    #[tokio::test]
    async fn test_failed_extraction_aborts_whole_ingest() {
        // LLM with no extraction route: extraction fails, summary succeeds.
        let llm = Arc::new(SchemaRoutingLlm::new().route(
            "memory_type",
            json!({"title": "t", "summary": "s", "memory_type": "conversation"}),
        ));
        let store = Arc::new(MemoryGraph::new().unwrap());
        let coord = WriteCoordinator::new(
            llm,
            Arc::new(HashEmbedder::default()),
            store.clone(),
            Arc::new(SystemClock),
            engram_config::OntologyRegistry::curated(),
        );

        let result = coord
            .ingest("u1", &MemoryConfig::default(), &payload(), None, None)
            .await;
        assert!(result.is_err());

        // Nothing persisted.
        let counts = store.count_knowledge_nodes(Some("u1")).await.unwrap();
        assert_eq!(counts.total(), 0);
        assert!(store.count_memories("u1").await.unwrap().total == 0);
    }

    #[tokio::test]
    async fn test_summary_failure_is_tolerated() {
        // LLM with no summary route: extraction succeeds, summaries fail.
        let llm = Arc::new(SchemaRoutingLlm::new().route(
            "statements",
            json!({"statements": []}),
        ));
        let store = Arc::new(MemoryGraph::new().unwrap());
        let coord = WriteCoordinator::new(
            llm,
            Arc::new(HashEmbedder::default()),
            store.clone(),
            Arc::new(SystemClock),
            engram_config::OntologyRegistry::curated(),
        );

        let receipt = coord
            .ingest("u1", &MemoryConfig::default(), &payload(), None, None)
            .await
            .unwrap();
        assert_eq!(receipt.chunk_ids.len(), 3);
        assert!(receipt.summary_ids.is_empty());
    }

    #[tokio::test]
    async fn test_dedup_fusion_across_dialogues() {
        let store = Arc::new(MemoryGraph::new().unwrap());
        let config = MemoryConfig::default();

        // First dialogue mentions "Acme Incorporated".
        let llm_one = Arc::new(
            SchemaRoutingLlm::new()
                .route(
                    "statements",
                    json!({
                        "statements": [{
                            "statement": "Acme Incorporated is a client",
                            "stmt_type": "FACT",
                            "temporal_info": "STATIC",
                            "entities": [{
                                "name": "Acme Incorporated",
                                "entity_type": "ORGANIZATION",
                                "description": "client"
                            }]
                        }]
                    }),
                )
                .route("memory_type", json!({"title": "t", "summary": "s", "memory_type": "conversation"}))
                .route("verdicts", json!({"verdicts": []})),
        );
        let coord = WriteCoordinator::new(
            llm_one,
            Arc::new(HashEmbedder::default()),
            store.clone(),
            Arc::new(SystemClock),
            engram_config::OntologyRegistry::curated(),
        );
        let first_payload = DialoguePayload {
            ref_id: "d1".into(),
            messages: vec![DialogueMessage {
                role: "user".into(),
                msg: "Acme Incorporated is a client".into(),
            }],
        };
        let first = coord
            .ingest("u1", &config, &first_payload, None, None)
            .await
            .unwrap();

        // Second dialogue mentions "Acme Incorporated HQ" (containment).
        let llm_two = Arc::new(
            SchemaRoutingLlm::new()
                .route(
                    "statements",
                    json!({
                        "statements": [{
                            "statement": "Visited Acme Incorporated HQ",
                            "stmt_type": "EVENT",
                            "temporal_info": "DYNAMIC",
                            "entities": [{
                                "name": "Acme Incorporated HQ",
                                "entity_type": "ORGANIZATION",
                                "description": "headquarters visit"
                            }]
                        }]
                    }),
                )
                .route("memory_type", json!({"title": "t", "summary": "s", "memory_type": "conversation"}))
                .route("verdicts", json!({"verdicts": []})),
        );
        let mut fusion_config = config.clone();
        fusion_config.dedup.fuzzy_overall_threshold = 0.5;
        let coord = WriteCoordinator::new(
            llm_two,
            Arc::new(HashEmbedder::default()),
            store.clone(),
            Arc::new(SystemClock),
            engram_config::OntologyRegistry::curated(),
        );
        let second_payload = DialoguePayload {
            ref_id: "d2".into(),
            messages: vec![DialogueMessage {
                role: "user".into(),
                msg: "Visited Acme Incorporated HQ".into(),
            }],
        };
        let second = coord
            .ingest("u1", &fusion_config, &second_payload, None, None)
            .await
            .unwrap();

        // One surviving entity holding both mentions.
        assert_eq!(second.entity_ids, first.entity_ids);
        let counts = store.count_knowledge_nodes(Some("u1")).await.unwrap();
        assert_eq!(counts.entities, 1);

        let nodes = store.fetch_by_ids(&first.entity_ids).await.unwrap();
        let engram_core::GraphNode::ExtractedEntity(entity) = &nodes[0] else {
            panic!("expected entity");
        };
        assert!(entity.description.contains("client"));
        assert!(entity.description.contains("headquarters visit"));
    }
}
