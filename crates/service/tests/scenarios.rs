//! End-to-end scenarios over the embedded service
//!
//! Exercises the public facade with mock providers: write path, dedup
//! fusion, deep read, forgetting cycle, config CRUD and the projections.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use engram_core::testing::{HashEmbedder, SchemaRoutingLlm};
use engram_core::types::views::EpisodicTimeRange;
use engram_core::{
    Clock, DialogueMessage, DialoguePayload, Embedder, GraphNode, GraphStore, ManualClock,
    MemoryType, PerceptualType,
};
use engram_graph::testing::BundleBuilder;
use engram_graph::MemoryGraph;
use engram_runtime::ReadEvent;
use engram_service::MemoryService;

fn dialogue_payload() -> DialoguePayload {
    DialoguePayload {
        ref_id: "r1".into(),
        messages: vec![
            DialogueMessage {
                role: "user".into(),
                msg: "Alice works at Acme".into(),
            },
            DialogueMessage {
                role: "assistant".into(),
                msg: "Since when?".into(),
            },
            DialogueMessage {
                role: "user".into(),
                msg: "2021-03-01".into(),
            },
        ],
    }
}

fn full_llm() -> Arc<SchemaRoutingLlm> {
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
                        "emotion_type": "joy",
                        "emotion_intensity": 0.4,
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
            .route(
                "questions",
                json!({
                    "questions": [
                        {"question": "When did Alice join Acme?", "type": "temporal", "reason": "needs a date"}
                    ]
                }),
            )
            .route("expansions", json!({"expansions": ["Alice Acme start date"]}))
            .route("verdicts", json!({"verdicts": []})),
    )
}

fn service_with(llm: Arc<SchemaRoutingLlm>) -> MemoryService {
    MemoryService::builder()
        .with_llm(llm)
        .with_embedder(Arc::new(HashEmbedder::default()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_simple_write_produces_expected_graph() {
    let service = service_with(full_llm());

    let receipt = service
        .ingest_dialogue("u1", "default", &dialogue_payload())
        .await
        .unwrap();

    assert!(!receipt.dialogue_id.is_empty());
    assert_eq!(receipt.chunk_ids.len(), 3);
    assert!(!receipt.statement_ids.is_empty());
    assert_eq!(receipt.entity_ids.len(), 2);
    assert!(!receipt.summary_ids.is_empty());

    // Statement carries the normalised date.
    let nodes = service
        .store()
        .fetch_by_ids(&receipt.statement_ids)
        .await
        .unwrap();
    let GraphNode::Statement(stmt) = &nodes[0] else {
        panic!("expected statement");
    };
    assert_eq!(stmt.valid_at.format("%Y-%m-%d").to_string(), "2021-03-01");

    // Entities kept their ontology classes.
    let entities = service
        .store()
        .fetch_by_ids(&receipt.entity_ids)
        .await
        .unwrap();
    let mut kinds: Vec<(String, String)> = entities
        .iter()
        .filter_map(|n| match n {
            GraphNode::ExtractedEntity(e) => Some((e.name.clone(), e.entity_type.clone())),
            _ => None,
        })
        .collect();
    kinds.sort();
    assert_eq!(
        kinds,
        vec![
            ("Acme".to_string(), "ORGANIZATION".to_string()),
            ("Alice".to_string(), "PERSON".to_string())
        ]
    );

    // The summary classified as a conversation.
    let overview = service
        .episodic_overview("u1", EpisodicTimeRange::All, None, None)
        .await
        .unwrap();
    assert!(!overview.is_empty());
    assert_eq!(overview[0].memory_type, MemoryType::Conversation);
}

#[tokio::test]
async fn test_read_deep_references_the_date() {
    let llm = full_llm();
    let service = service_with(llm);
    // The routing mock replies to chat with a fixed string.
    service
        .ingest_dialogue("u1", "default", &dialogue_payload())
        .await
        .unwrap();

    let response = service
        .read_memory("u1", "When did Alice join Acme?", 1, "default")
        .await
        .unwrap();

    let types: Vec<&str> = response
        .intermediate_outputs
        .iter()
        .map(|o| o.output_type.as_str())
        .collect();
    assert!(types.contains(&"problem_split"));
    assert!(types.contains(&"problem_extension"));
    assert!(types.contains(&"retrieval_summary"));
    assert!(!response.truncated);
    assert_eq!(response.end_user_id, "u1");
}

#[tokio::test]
async fn test_streaming_read_ends_with_answer() {
    use futures::StreamExt;

    let service = service_with(full_llm());
    service
        .ingest_dialogue("u1", "default", &dialogue_payload())
        .await
        .unwrap();

    let events: Vec<ReadEvent> = service
        .read_memory_stream("u1", "When did Alice join Acme?", 2, "default")
        .await
        .unwrap()
        .collect()
        .await;

    assert!(matches!(events.last(), Some(ReadEvent::Answer { .. })));
}

#[tokio::test]
async fn test_reads_are_tenant_isolated() {
    let service = service_with(full_llm());
    service
        .ingest_dialogue("u1", "default", &dialogue_payload())
        .await
        .unwrap();

    let response = service
        .read_memory("someone-else", "When did Alice join Acme?", 2, "default")
        .await
        .unwrap();
    for output in &response.intermediate_outputs {
        if output.output_type == "retrieval_summary" {
            assert_eq!(output.data, json!([]));
        }
    }
    assert_eq!(service.memory_count("someone-else").await.unwrap().total, 0);
}

#[tokio::test]
async fn test_invalid_search_switch_rejected() {
    let service = service_with(full_llm());
    let err = service
        .read_memory("u1", "anything", 7, "default")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation_error");
}

#[tokio::test]
async fn test_forgetting_cycle_compacts_stale_pairs() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
    ));
    let graph = Arc::new(MemoryGraph::with_clock(clock.clone()).unwrap());
    let now = clock.now();
    let stale = now - Duration::days(120);

    // 120 stale low-activation pairs straight into the store.
    let mut builder = BundleBuilder::new("u1", "seed", now);
    for i in 0..120 {
        builder = builder
            .with_chunk(i, &format!("old chunk {i}"))
            .with_statement(i, &format!("faded fact {i}"), vec![], 0.05, stale)
            .with_entity(&format!("Old{i}"), "CONCEPT", 0.05, stale);
    }
    graph.write_dialogue_batch(&builder.build()).await.unwrap();

    let service = MemoryService::builder()
        .with_llm(full_llm())
        .with_embedder(Arc::new(HashEmbedder::default()))
        .with_store(graph.clone())
        .with_clock(clock)
        .build()
        .unwrap();

    let before = graph.count_knowledge_nodes(Some("u1")).await.unwrap();
    let report = service
        .trigger_forgetting_cycle(Some("u1"), Some(100), Some(30), "default")
        .await
        .unwrap();

    assert_eq!(report.merged_count, 100);
    assert!(report.success_rate >= 0.95);
    assert_eq!(report.nodes_before, before.total());
    assert_eq!(report.nodes_after, report.nodes_before - 100);

    let after = graph.count_knowledge_nodes(Some("u1")).await.unwrap();
    assert_eq!(after.statements, before.statements - 100);
    assert_eq!(after.entities, before.entities - 100);
    assert_eq!(after.summaries, before.summaries + 100);
}

#[tokio::test]
async fn test_forgetting_curve_endpoint() {
    let service = service_with(full_llm());
    let curve = service.forgetting_curve(0.5, 60, "default").await.unwrap();

    assert_eq!(curve.len(), 61);
    assert!(curve[0].activation > 0.99);
    assert!(curve[60].activation >= 0.1);
    for pair in curve.windows(2) {
        assert!(pair[0].activation >= pair[1].activation);
    }
}

#[tokio::test]
async fn test_forgetting_config_crud() {
    let service = service_with(full_llm());

    let initial = service.get_forgetting_config("cfg-7").await.unwrap();
    assert_eq!(initial.offset, 0.1);

    let updated = service
        .update_forgetting_config("cfg-7", &json!({"offset": 0.2, "max_batch": 42}))
        .await
        .unwrap();
    assert_eq!(updated.offset, 0.2);
    assert_eq!(updated.max_batch, 42);

    // The generation persisted.
    let fetched = service.get_forgetting_config("cfg-7").await.unwrap();
    assert_eq!(fetched.max_batch, 42);

    // Invalid updates are rejected without persisting.
    assert!(service
        .update_forgetting_config("cfg-7", &json!({"offset": 1.5}))
        .await
        .is_err());
    assert_eq!(
        service.get_forgetting_config("cfg-7").await.unwrap().offset,
        0.2
    );
}

#[tokio::test]
async fn test_perceptual_and_episodic_views() {
    let service = service_with(full_llm());
    let receipt = service
        .ingest_dialogue("u1", "default", &dialogue_payload())
        .await
        .unwrap();

    let counts = service.memory_count("u1").await.unwrap();
    assert_eq!(counts.text, 3);
    assert_eq!(counts.total, 3);
    assert_eq!(counts.vision, 0);

    let latest = service
        .latest_memory("u1", PerceptualType::Text)
        .await
        .unwrap()
        .unwrap();
    assert!(!latest.content.is_empty());
    assert!(service
        .latest_memory("u1", PerceptualType::Audio)
        .await
        .unwrap()
        .is_none());

    // Keyword filter matches the summary title.
    let overview = service
        .episodic_overview("u1", EpisodicTimeRange::Today, None, Some("Job"))
        .await
        .unwrap();
    assert!(!overview.is_empty());

    let detail = service
        .episodic_detail("u1", &receipt.summary_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert!(!detail.content_records.is_empty());
    assert!(detail.involved_objects.len() <= 3);
    let emotion = detail.emotion.unwrap();
    assert!(emotion.emotion_intensity > 0.0);
    assert_eq!(emotion.statement, "Alice works at Acme since 2021-03-01");
}

#[tokio::test]
async fn test_reingest_is_idempotent_at_service_level() {
    let service = service_with(full_llm());

    let first = service
        .ingest_dialogue("u1", "default", &dialogue_payload())
        .await
        .unwrap();
    let second = service
        .ingest_dialogue("u1", "default", &dialogue_payload())
        .await
        .unwrap();

    assert_eq!(first.dialogue_id, second.dialogue_id);
    assert_eq!(first.statement_ids, second.statement_ids);

    let counts = service
        .store()
        .count_knowledge_nodes(Some("u1"))
        .await
        .unwrap();
    assert_eq!(counts.statements as usize, first.statement_ids.len());
    assert_eq!(counts.entities, 2);
}

#[tokio::test]
async fn test_embedder_failure_aborts_ingest_atomically() {
    use async_trait::async_trait;
    use engram_core::{MemoryError, Result};

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed_many(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(MemoryError::permanent("embedder", "model gone"))
        }

        fn dimension(&self) -> usize {
            64
        }
    }

    let service = MemoryService::builder()
        .with_llm(full_llm())
        .with_embedder(Arc::new(FailingEmbedder))
        .build()
        .unwrap();

    let result = service
        .ingest_dialogue("u1", "default", &dialogue_payload())
        .await;
    assert!(result.is_err());

    // Nothing became visible.
    assert_eq!(service.memory_count("u1").await.unwrap().total, 0);
    assert_eq!(
        service
            .store()
            .count_knowledge_nodes(Some("u1"))
            .await
            .unwrap()
            .total(),
        0
    );
}
