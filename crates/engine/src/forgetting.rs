//! Forgetting scheduler
//!
//! A cycle finds low-activation Statement+Entity pairs that have not been
//! touched for `min_days`, merges each pair into a consolidated
//! `MemorySummary` and reports what happened. One cycle runs per process at
//! a time; horizontally scaled deployments additionally take a named lock
//! in the KV cache. Periodic triggering belongs to an external scheduler;
//! only the manual entry point lives here.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use engram_config::constants::forgetting as forgetting_constants;
use engram_config::{ForgettingConfig, Language};
use engram_core::{
    ids, Clock, Embedder, ForgettablePair, GraphStore, KvCache, LanguageModel, MemoryError,
    MergeOutcome, Result, SummaryNode,
};
use engram_extraction::Summarizer;

/// Cycle report (§ forgetting API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgettingReport {
    pub merged_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub success_rate: f64,
    pub nodes_before: u64,
    pub nodes_after: u64,
    pub reduction_rate: f64,
    pub duration_seconds: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

pub struct ForgettingScheduler {
    store: Arc<dyn GraphStore>,
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    clock: Arc<dyn Clock>,
    /// Named distributed lock; `None` for single-process deployments
    kv: Option<Arc<dyn KvCache>>,
    language: Language,
    is_running: AtomicBool,
}

impl ForgettingScheduler {
    pub fn new(
        store: Arc<dyn GraphStore>,
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        clock: Arc<dyn Clock>,
        language: Language,
    ) -> Self {
        Self {
            store,
            llm,
            embedder,
            clock,
            kv: None,
            language,
            is_running: AtomicBool::new(false),
        }
    }

    pub fn with_distributed_lock(mut self, kv: Arc<dyn KvCache>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Run one forgetting cycle. Fails fast when another cycle is already
    /// running in this process (or, with a KV lock, anywhere).
    pub async fn run_cycle(
        &self,
        end_user_id: Option<&str>,
        config: &ForgettingConfig,
    ) -> Result<ForgettingReport> {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MemoryError::ConcurrencyConflict(
                "a forgetting cycle is already running".into(),
            ));
        }

        let lock_held = match &self.kv {
            Some(kv) => {
                let acquired = kv
                    .set_nx(
                        forgetting_constants::LOCK_KEY,
                        "running",
                        StdDuration::from_secs(forgetting_constants::LOCK_TTL_SECS),
                    )
                    .await
                    .unwrap_or(false);
                if !acquired {
                    self.is_running.store(false, Ordering::SeqCst);
                    return Err(MemoryError::ConcurrencyConflict(
                        "forgetting lock held by another process".into(),
                    ));
                }
                true
            }
            None => false,
        };

        let result = self.run_cycle_inner(end_user_id, config).await;

        if lock_held {
            if let Some(kv) = &self.kv {
                if let Err(e) = kv.del(forgetting_constants::LOCK_KEY).await {
                    warn!(error = %e, "failed to release forgetting lock (TTL will expire it)");
                }
            }
        }
        self.is_running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_cycle_inner(
        &self,
        end_user_id: Option<&str>,
        config: &ForgettingConfig,
    ) -> Result<ForgettingReport> {
        let start_time = self.clock.now();
        info!(
            ?end_user_id,
            max_batch = config.max_batch,
            min_days = config.min_days,
            "forgetting cycle started"
        );

        let nodes_before = self.store.count_knowledge_nodes(end_user_id).await?.total();

        let pairs = self
            .store
            .list_forgettable_pairs(
                end_user_id,
                config.min_days,
                config.activation_threshold,
                usize::MAX,
            )
            .await?;
        info!(candidates = pairs.len(), "forgettable pairs identified");

        // Take the weakest pairs first, and never touch the same node twice
        // in one cycle.
        let mut seen: HashSet<String> = HashSet::new();
        let batch: Vec<&ForgettablePair> = pairs
            .iter()
            .filter(|pair| {
                if seen.contains(&pair.statement.id) || seen.contains(&pair.entity.id) {
                    return false;
                }
                seen.insert(pair.statement.id.clone());
                seen.insert(pair.entity.id.clone());
                true
            })
            .take(config.max_batch)
            .collect();

        let total = batch.len();
        let mut merged_count = 0usize;
        let mut failed_count = 0usize;
        let mut skipped_count = 0usize;
        let mut next_milestone = 10usize;

        for (index, pair) in batch.iter().enumerate() {
            match self.merge_pair(pair).await {
                Ok(MergeOutcome::Merged) => merged_count += 1,
                Ok(MergeOutcome::Skipped) => skipped_count += 1,
                Err(MemoryError::ConcurrencyConflict(reason)) => {
                    warn!(
                        statement_id = %pair.statement.id,
                        entity_id = %pair.entity.id,
                        %reason,
                        "pair vanished mid-cycle, skipping"
                    );
                    skipped_count += 1;
                }
                Err(e) => {
                    warn!(
                        statement_id = %pair.statement.id,
                        entity_id = %pair.entity.id,
                        error = %e,
                        "pair merge failed"
                    );
                    failed_count += 1;
                }
            }

            let progress = (index + 1) * 100 / total.max(1);
            while progress >= next_milestone {
                info!(
                    progress_percent = next_milestone,
                    merged = merged_count,
                    failed = failed_count,
                    "forgetting cycle progress"
                );
                next_milestone += 10;
            }
        }

        let nodes_after = self.store.count_knowledge_nodes(end_user_id).await?.total();
        let end_time = self.clock.now();
        let processed = merged_count + failed_count;
        let report = ForgettingReport {
            merged_count,
            failed_count,
            skipped_count,
            success_rate: if processed == 0 {
                1.0
            } else {
                merged_count as f64 / processed as f64
            },
            nodes_before,
            nodes_after,
            reduction_rate: if nodes_before == 0 {
                0.0
            } else {
                (nodes_before.saturating_sub(nodes_after)) as f64 / nodes_before as f64
            },
            duration_seconds: (end_time - start_time).num_milliseconds() as f64 / 1000.0,
            start_time,
            end_time,
        };

        info!(
            merged = report.merged_count,
            failed = report.failed_count,
            skipped = report.skipped_count,
            nodes_before = report.nodes_before,
            nodes_after = report.nodes_after,
            "forgetting cycle finished"
        );
        Ok(report)
    }

    /// Consolidate one pair into a summary node and merge it in the store
    async fn merge_pair(&self, pair: &ForgettablePair) -> Result<MergeOutcome> {
        let summarizer = Summarizer::new(self.llm.clone(), self.language);
        let draft = summarizer
            .consolidate(
                &pair.statement.statement,
                &pair.entity.name,
                &pair.entity.fact_summary,
            )
            .await?;

        let embedding = self.embedder.embed_one(&draft.content).await?;
        let now = self.clock.now();
        let summary = SummaryNode {
            id: ids::new_id(),
            end_user_id: pair.statement.end_user_id.clone(),
            config_id: pair.statement.config_id.clone(),
            run_id: None,
            name: draft.title,
            memory_type: draft.memory_type,
            content: draft.content,
            summary_embedding: embedding,
            chunk_ids: vec![],
            created_at: now,
            expired_at: engram_core::far_future(),
        };

        self.store
            .merge_pair_into_summary(&pair.statement.id, &pair.entity.id, &summary)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use engram_core::testing::{HashEmbedder, SchemaRoutingLlm};
    use engram_core::ManualClock;
    use engram_graph::testing::BundleBuilder;
    use engram_graph::MemoryGraph;
    use serde_json::json;

    fn consolidation_llm() -> Arc<SchemaRoutingLlm> {
        Arc::new(SchemaRoutingLlm::new().route(
            "memory_type",
            json!({
                "title": "Consolidated",
                "summary": "A faded memory, kept as a gist.",
                "memory_type": "conversation"
            }),
        ))
    }

    async fn seeded(pair_count: usize) -> (Arc<MemoryGraph>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        let graph = Arc::new(MemoryGraph::with_clock(clock.clone()).unwrap());
        let now = clock.now();
        let stale = now - Duration::days(90);

        let mut builder = BundleBuilder::new("u1", "r1", now);
        for i in 0..pair_count {
            builder = builder
                .with_chunk(i, &format!("chunk {i}"))
                .with_statement(i, &format!("faded statement {i}"), vec![], 0.1, stale)
                .with_entity(&format!("Entity{i}"), "CONCEPT", 0.1, stale);
        }
        graph.write_dialogue_batch(&builder.build()).await.unwrap();
        (graph, clock)
    }

    fn scheduler(
        graph: Arc<MemoryGraph>,
        clock: Arc<ManualClock>,
    ) -> ForgettingScheduler {
        ForgettingScheduler::new(
            graph,
            consolidation_llm(),
            Arc::new(HashEmbedder::default()),
            clock,
            Language::En,
        )
    }

    #[tokio::test]
    async fn test_cycle_merges_batch_and_reports() {
        let (graph, clock) = seeded(5).await;
        let sched = scheduler(graph.clone(), clock);

        let mut config = ForgettingConfig::default();
        config.max_batch = 3;
        let report = sched.run_cycle(Some("u1"), &config).await.unwrap();

        assert_eq!(report.merged_count, 3);
        assert_eq!(report.failed_count, 0);
        assert_eq!(report.success_rate, 1.0);
        // Each merge removes a statement and an entity and adds a summary.
        assert_eq!(report.nodes_after, report.nodes_before - 3);
        assert!(report.reduction_rate > 0.0);

        let counts = graph.count_knowledge_nodes(Some("u1")).await.unwrap();
        assert_eq!(counts.statements, 2);
        assert_eq!(counts.entities, 2);
        assert_eq!(counts.summaries, 3);
    }

    #[tokio::test]
    async fn test_cycle_with_nothing_to_forget() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        let graph = Arc::new(MemoryGraph::with_clock(clock.clone()).unwrap());
        let sched = scheduler(graph, clock);

        let report = sched
            .run_cycle(Some("u1"), &ForgettingConfig::default())
            .await
            .unwrap();
        assert_eq!(report.merged_count, 0);
        assert_eq!(report.success_rate, 1.0);
        assert_eq!(report.nodes_before, report.nodes_after);
    }

    #[tokio::test]
    async fn test_fresh_pairs_survive_cycle() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        let graph = Arc::new(MemoryGraph::with_clock(clock.clone()).unwrap());
        let now = clock.now();
        let bundle = BundleBuilder::new("u1", "r1", now)
            .with_chunk(0, "chunk")
            .with_statement(0, "fresh statement", vec![], 0.9, now)
            .with_entity("Fresh", "CONCEPT", 0.9, now)
            .build();
        graph.write_dialogue_batch(&bundle).await.unwrap();

        let sched = scheduler(graph.clone(), clock);
        let report = sched
            .run_cycle(Some("u1"), &ForgettingConfig::default())
            .await
            .unwrap();
        assert_eq!(report.merged_count, 0);
        assert_eq!(
            graph.count_knowledge_nodes(Some("u1")).await.unwrap().statements,
            1
        );
    }

    #[tokio::test]
    async fn test_cycle_is_idempotent_for_merged_pairs() {
        let (graph, clock) = seeded(2).await;
        let sched = scheduler(graph.clone(), clock);
        let config = ForgettingConfig::default();

        let first = sched.run_cycle(Some("u1"), &config).await.unwrap();
        assert_eq!(first.merged_count, 2);

        let second = sched.run_cycle(Some("u1"), &config).await.unwrap();
        assert_eq!(second.merged_count, 0);
        assert_eq!(second.failed_count, 0);
    }

    #[tokio::test]
    async fn test_overlapping_cycles_rejected() {
        let (graph, clock) = seeded(1).await;
        let sched = scheduler(graph, clock);

        sched.is_running.store(true, Ordering::SeqCst);
        let err = sched
            .run_cycle(Some("u1"), &ForgettingConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::ConcurrencyConflict(_)));
        sched.is_running.store(false, Ordering::SeqCst);
    }
}
