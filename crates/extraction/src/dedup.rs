//! Entity deduplication & disambiguation
//!
//! Layer A collapses duplicates inside one write batch: exact match on
//! (name, type, tenant), then fuzzy match over name embeddings and edit
//! distance, then optional blockwise LLM arbitration for borderline pairs.
//! Layer B fuzzy-matches the survivors against entities already persisted
//! for the tenant. Both layers produce an `id_redirect` map the coordinator
//! applies to every edge before the write.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use engram_config::constants::dedup as dedup_constants;
use engram_config::DedupConfig;
use engram_core::{
    cosine_similarity, ChatMessage, Embedder, EntityNode, GraphStore, LanguageModel, Result,
};

use crate::prompts;
use crate::schema::{self, ArbitrationResponse};

/// Outcome of one dedup layer
#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub entities: Vec<EntityNode>,
    /// Dropped id → surviving id
    pub id_redirect: HashMap<String, String>,
}

/// Counters for logging and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupReport {
    pub exact_merges: usize,
    pub fuzzy_merges: usize,
    pub llm_merges: usize,
    pub store_merges: usize,
}

pub struct Deduplicator {
    embedder: Arc<dyn Embedder>,
    llm: Option<Arc<dyn LanguageModel>>,
    config: DedupConfig,
}

/// Levenshtein distance over characters
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Name similarity in [0, 1] derived from edit distance
fn name_similarity(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let max_len = a_lower.chars().count().max(b_lower.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - edit_distance(&a_lower, &b_lower) as f64 / max_len as f64
}

fn containment(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    a.contains(&b) || b.contains(&a)
}

/// `;`-join distinct fragments, capped at the byte budget on a char boundary
pub fn merge_descriptions(existing: &str, incoming: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for fragment in existing.split(';').chain(incoming.split(';')) {
        let fragment = fragment.trim();
        if !fragment.is_empty() && !parts.contains(&fragment) {
            parts.push(fragment);
        }
    }
    let mut merged = parts.join(";");
    if merged.len() > dedup_constants::MAX_DESCRIPTION_BYTES {
        let mut cut = dedup_constants::MAX_DESCRIPTION_BYTES;
        while cut > 0 && !merged.is_char_boundary(cut) {
            cut -= 1;
        }
        merged.truncate(cut);
    }
    merged
}

/// Fold the loser's accumulated text into the surviving entity
fn absorb(winner: &mut EntityNode, loser: &EntityNode) {
    winner.description = merge_descriptions(&winner.description, &loser.description);
    winner.fact_summary = merge_descriptions(&winner.fact_summary, &loser.fact_summary);
    winner.importance_score = winner.importance_score.max(loser.importance_score);
    winner.is_explicit_memory = winner.is_explicit_memory || loser.is_explicit_memory;
}

struct ScoredPair {
    left: usize,
    right: usize,
    similarity: f64,
    name_sim: f64,
}

impl Deduplicator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        llm: Option<Arc<dyn LanguageModel>>,
        config: DedupConfig,
    ) -> Self {
        Self {
            embedder,
            llm,
            config,
        }
    }

    /// Layer A: in-batch dedup. Input order is production order; the
    /// earliest id wins ties.
    pub async fn dedup_batch(
        &self,
        entities: Vec<EntityNode>,
    ) -> Result<(DedupOutcome, DedupReport)> {
        let mut report = DedupReport::default();
        let mut outcome = DedupOutcome::default();

        // Exact match on (name, type, tenant).
        let mut survivors: Vec<EntityNode> = Vec::with_capacity(entities.len());
        let mut exact_index: HashMap<(String, String, String), usize> = HashMap::new();
        for entity in entities {
            let key = (
                entity.name.to_lowercase(),
                entity.entity_type.clone(),
                entity.end_user_id.clone(),
            );
            match exact_index.get(&key) {
                Some(&winner_idx) => {
                    outcome
                        .id_redirect
                        .insert(entity.id.clone(), survivors[winner_idx].id.clone());
                    let mut winner = survivors[winner_idx].clone();
                    absorb(&mut winner, &entity);
                    survivors[winner_idx] = winner;
                    report.exact_merges += 1;
                }
                None => {
                    exact_index.insert(key, survivors.len());
                    survivors.push(entity);
                }
            }
        }

        // Fuzzy match among remaining candidates sharing a type.
        let embeddings = self.embed_names(&survivors).await?;
        let mut scored: Vec<ScoredPair> = Vec::new();
        for left in 0..survivors.len() {
            for right in (left + 1)..survivors.len() {
                let (a, b) = (&survivors[left], &survivors[right]);
                if a.entity_type != b.entity_type || a.end_user_id != b.end_user_id {
                    continue;
                }
                let cos = cosine_similarity(&embeddings[left], &embeddings[right]);
                let name_sim = name_similarity(&a.name, &b.name);
                let similarity = dedup_constants::EMBEDDING_WEIGHT * cos as f64
                    + dedup_constants::NAME_WEIGHT * name_sim;
                scored.push(ScoredPair {
                    left,
                    right,
                    similarity,
                    name_sim,
                });
            }
        }

        let mut merged_into: HashMap<usize, usize> = HashMap::new();
        let mut borderline: Vec<(usize, usize)> = Vec::new();
        for pair in &scored {
            if merged_into.contains_key(&pair.left) || merged_into.contains_key(&pair.right) {
                continue;
            }
            let strict_ok = pair.name_sim >= self.config.fuzzy_name_threshold_strict
                && 1.0 >= self.config.fuzzy_type_threshold_strict;
            let contained = containment(&survivors[pair.left].name, &survivors[pair.right].name);
            if pair.similarity >= self.config.fuzzy_overall_threshold && (contained || strict_ok) {
                let (winner, loser) = pick_winner(&survivors, pair.left, pair.right);
                merged_into.insert(loser, winner);
                report.fuzzy_merges += 1;
            } else if self.config.enable_llm_dedup_blockwise
                && pair.similarity
                    >= self.config.fuzzy_overall_threshold - dedup_constants::LLM_BORDERLINE_DELTA
                && pair.similarity < self.config.fuzzy_overall_threshold
            {
                borderline.push((pair.left, pair.right));
            }
        }

        // Blockwise LLM arbitration for the borderline band.
        if !borderline.is_empty() {
            if let Some(llm) = &self.llm {
                let arbitrated = self
                    .arbitrate(llm.as_ref(), &survivors, &borderline, &merged_into)
                    .await;
                for (left, right, canonical_idx) in arbitrated {
                    if merged_into.contains_key(&left) || merged_into.contains_key(&right) {
                        continue;
                    }
                    let (winner, loser) = if canonical_idx == 0 {
                        (left, right)
                    } else {
                        (right, left)
                    };
                    merged_into.insert(loser, winner);
                    report.llm_merges += 1;
                }
            }
        }

        // Apply the merge plan: place the winners first, then fold each
        // loser into its (chain-resolved) winner. Winners can sit at later
        // indices than their losers, so this takes two passes.
        let mut final_entities: Vec<EntityNode> = Vec::with_capacity(survivors.len());
        let mut position: HashMap<usize, usize> = HashMap::new();
        for (index, entity) in survivors.iter().enumerate() {
            if resolve_winner(&merged_into, index) == index {
                position.insert(index, final_entities.len());
                final_entities.push(entity.clone());
            }
        }
        for (index, entity) in survivors.iter().enumerate() {
            let winner = resolve_winner(&merged_into, index);
            if winner == index {
                continue;
            }
            let winner_pos = position[&winner];
            outcome
                .id_redirect
                .insert(entity.id.clone(), final_entities[winner_pos].id.clone());
            let mut merged = final_entities[winner_pos].clone();
            absorb(&mut merged, entity);
            final_entities[winner_pos] = merged;
        }

        debug!(
            exact = report.exact_merges,
            fuzzy = report.fuzzy_merges,
            llm = report.llm_merges,
            survivors = final_entities.len(),
            "in-batch dedup complete"
        );
        outcome.entities = final_entities;
        Ok((outcome, report))
    }

    /// Layer B: match survivors against persisted entities of the same
    /// tenant and type. Persisted ids always win; the incoming node is
    /// dropped and its text merged into the survivor, which is re-upserted
    /// by the batch write.
    pub async fn dedup_against_store(
        &self,
        entities: Vec<EntityNode>,
        store: &dyn GraphStore,
        end_user_id: &str,
    ) -> Result<(DedupOutcome, DedupReport)> {
        let mut report = DedupReport::default();
        let mut outcome = DedupOutcome::default();

        let mut persisted_by_type: HashMap<String, Vec<EntityNode>> = HashMap::new();
        for entity in &entities {
            if !persisted_by_type.contains_key(&entity.entity_type) {
                let persisted = store
                    .entities_by_type(end_user_id, &entity.entity_type)
                    .await?;
                persisted_by_type.insert(entity.entity_type.clone(), persisted);
            }
        }

        for entity in entities {
            let persisted = persisted_by_type
                .get(&entity.entity_type)
                .map(Vec::as_slice)
                .unwrap_or_default();

            let mut best: Option<(&EntityNode, f64, f64)> = None;
            for candidate in persisted {
                let cos = if entity.name_embedding.is_empty() || candidate.name_embedding.is_empty()
                {
                    0.0
                } else {
                    cosine_similarity(&entity.name_embedding, &candidate.name_embedding)
                };
                let name_sim = name_similarity(&entity.name, &candidate.name);
                let similarity = dedup_constants::EMBEDDING_WEIGHT * cos as f64
                    + dedup_constants::NAME_WEIGHT * name_sim;
                if best.map_or(true, |(_, s, _)| similarity > s) {
                    best = Some((candidate, similarity, name_sim));
                }
            }

            match best {
                Some((candidate, similarity, name_sim))
                    if similarity >= self.config.fuzzy_overall_threshold
                        && (containment(&entity.name, &candidate.name)
                            || name_sim >= self.config.fuzzy_name_threshold_strict) =>
                {
                    outcome
                        .id_redirect
                        .insert(entity.id.clone(), candidate.id.clone());
                    report.store_merges += 1;
                    // Several incoming entities may collapse onto the same
                    // persisted survivor; keep folding into one copy.
                    if let Some(existing) =
                        outcome.entities.iter_mut().find(|e| e.id == candidate.id)
                    {
                        absorb(existing, &entity);
                    } else {
                        let mut survivor = candidate.clone();
                        absorb(&mut survivor, &entity);
                        outcome.entities.push(survivor);
                    }
                }
                _ => outcome.entities.push(entity),
            }
        }

        debug!(store_merges = report.store_merges, "store-layer dedup complete");
        Ok((outcome, report))
    }

    async fn embed_names(&self, entities: &[EntityNode]) -> Result<Vec<Vec<f32>>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
        self.embedder.embed_many(&names).await
    }

    /// Ask the LLM to arbitrate borderline pairs in blocks; verdicts below
    /// the confidence floor are discarded.
    async fn arbitrate(
        &self,
        llm: &dyn LanguageModel,
        survivors: &[EntityNode],
        borderline: &[(usize, usize)],
        merged_into: &HashMap<usize, usize>,
    ) -> Vec<(usize, usize, usize)> {
        let mut merges: Vec<(usize, usize, usize)> = Vec::new();

        for block in borderline.chunks(dedup_constants::LLM_BLOCK_SIZE) {
            let pairs: Vec<(String, String, String)> = block
                .iter()
                .map(|(l, r)| {
                    (
                        survivors[*l].name.clone(),
                        survivors[*r].name.clone(),
                        survivors[*l].entity_type.clone(),
                    )
                })
                .collect();
            let messages = [
                ChatMessage::system(prompts::arbitration_system_prompt()),
                ChatMessage::user(prompts::arbitration_user_prompt(&pairs)),
            ];

            let value: Value = match llm
                .chat_structured(&messages, &schema::arbitration_schema())
                .await
            {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "dedup arbitration call failed, keeping pairs separate");
                    continue;
                }
            };
            let Ok(response) = serde_json::from_value::<ArbitrationResponse>(value) else {
                warn!("dedup arbitration returned malformed verdicts");
                continue;
            };

            for verdict in response.verdicts {
                let Some((left, right)) = block.get(verdict.pair_index).copied() else {
                    continue;
                };
                if !verdict.same_entity
                    || verdict.confidence < dedup_constants::LLM_MIN_CONFIDENCE
                    || merged_into.contains_key(&left)
                    || merged_into.contains_key(&right)
                {
                    continue;
                }
                merges.push((left, right, verdict.canonical_idx.min(1)));
            }
        }
        merges
    }
}

/// Tie-break: shorter canonical name wins; equal lengths fall back to the
/// earlier production index.
fn pick_winner(survivors: &[EntityNode], left: usize, right: usize) -> (usize, usize) {
    let left_len = survivors[left].name.chars().count();
    let right_len = survivors[right].name.chars().count();
    if right_len < left_len {
        (right, left)
    } else {
        (left, right)
    }
}

fn resolve_winner(merged_into: &HashMap<usize, usize>, mut index: usize) -> usize {
    while let Some(&winner) = merged_into.get(&index) {
        index = winner;
    }
    index
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_core::testing::{HashEmbedder, MockLlm};
    use serde_json::json;

    fn entity(id: &str, name: &str, entity_type: &str, description: &str) -> EntityNode {
        let now = Utc::now();
        EntityNode {
            id: id.into(),
            end_user_id: "u1".into(),
            config_id: "default".into(),
            run_id: None,
            name: name.into(),
            entity_type: entity_type.into(),
            description: description.into(),
            fact_summary: String::new(),
            activation_value: 1.0,
            importance_score: 0.5,
            access_history: vec![now],
            last_accessed_at: now,
            name_embedding: vec![],
            is_explicit_memory: true,
            created_at: now,
            expired_at: engram_core::far_future(),
        }
    }

    fn dedup(config: DedupConfig) -> Deduplicator {
        Deduplicator::new(Arc::new(HashEmbedder::default()), None, config)
    }

    #[tokio::test]
    async fn test_exact_match_earliest_id_wins() {
        let d = dedup(DedupConfig::default());
        let (outcome, report) = d
            .dedup_batch(vec![
                entity("e1", "Alice", "PERSON", "engineer"),
                entity("e2", "alice", "PERSON", "from Berlin"),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.entities.len(), 1);
        assert_eq!(outcome.entities[0].id, "e1");
        assert_eq!(outcome.id_redirect.get("e2"), Some(&"e1".to_string()));
        assert_eq!(report.exact_merges, 1);
        assert_eq!(outcome.entities[0].description, "engineer;from Berlin");
    }

    #[tokio::test]
    async fn test_different_types_never_merge() {
        let d = dedup(DedupConfig::default());
        let (outcome, _) = d
            .dedup_batch(vec![
                entity("e1", "Mercury", "LOCATION", "planet"),
                entity("e2", "Mercury", "CONCEPT", "element"),
            ])
            .await
            .unwrap();
        assert_eq!(outcome.entities.len(), 2);
    }

    #[tokio::test]
    async fn test_fuzzy_containment_merges_and_shorter_name_wins() {
        let mut config = DedupConfig::default();
        // The trigram test embedder yields weaker cosines than a real
        // embedding model, so relax the overall threshold.
        config.fuzzy_overall_threshold = 0.25;
        let d = dedup(config);
        let (outcome, report) = d
            .dedup_batch(vec![
                entity("e1", "Acme Incorporated", "ORGANIZATION", "client"),
                entity("e2", "Acme", "ORGANIZATION", "the company Alice works for"),
            ])
            .await
            .unwrap();

        assert_eq!(report.fuzzy_merges, 1);
        assert_eq!(outcome.entities.len(), 1);
        // Shorter canonical name survives.
        assert_eq!(outcome.entities[0].id, "e2");
        assert_eq!(outcome.id_redirect.get("e1"), Some(&"e2".to_string()));
        assert!(outcome.entities[0].description.contains("client"));
    }

    #[tokio::test]
    async fn test_dissimilar_names_survive() {
        let d = dedup(DedupConfig::default());
        let (outcome, report) = d
            .dedup_batch(vec![
                entity("e1", "Alice", "PERSON", ""),
                entity("e2", "Bob", "PERSON", ""),
            ])
            .await
            .unwrap();
        assert_eq!(outcome.entities.len(), 2);
        assert_eq!(report.fuzzy_merges, 0);
    }

    #[tokio::test]
    async fn test_llm_arbitration_applies_confident_verdicts() {
        let mut config = DedupConfig::default();
        config.enable_llm_dedup_blockwise = true;
        // Push the borderline band wide so the pair lands in it.
        config.fuzzy_overall_threshold = 0.99;
        config.fuzzy_name_threshold_strict = 0.99;

        let llm = MockLlm::new();
        llm.push_structured(json!({
            "verdicts": [{
                "pair_index": 0,
                "same_entity": true,
                "canonical_idx": 1,
                "confidence": 0.95,
                "reason": "same organisation, abbreviated"
            }]
        }));

        let d = Deduplicator::new(Arc::new(HashEmbedder::default()), Some(Arc::new(llm)), config);
        let (outcome, report) = d
            .dedup_batch(vec![
                entity("e1", "Acme Incorporated", "ORGANIZATION", ""),
                entity("e2", "Acme Incorporate", "ORGANIZATION", ""),
            ])
            .await
            .unwrap();

        assert_eq!(report.llm_merges, 1);
        assert_eq!(outcome.entities.len(), 1);
        assert_eq!(outcome.entities[0].id, "e2");
    }

    #[tokio::test]
    async fn test_low_confidence_verdicts_ignored() {
        let mut config = DedupConfig::default();
        config.enable_llm_dedup_blockwise = true;
        config.fuzzy_overall_threshold = 0.99;

        let llm = MockLlm::new();
        llm.push_structured(json!({
            "verdicts": [{
                "pair_index": 0,
                "same_entity": true,
                "canonical_idx": 0,
                "confidence": 0.5,
                "reason": "maybe"
            }]
        }));

        let d = Deduplicator::new(Arc::new(HashEmbedder::default()), Some(Arc::new(llm)), config);
        let (outcome, report) = d
            .dedup_batch(vec![
                entity("e1", "Acme Incorporated", "ORGANIZATION", ""),
                entity("e2", "Acme Incorporate", "ORGANIZATION", ""),
            ])
            .await
            .unwrap();

        assert_eq!(report.llm_merges, 0);
        assert_eq!(outcome.entities.len(), 2);
    }

    #[tokio::test]
    async fn test_store_layer_redirects_to_persisted_id() {
        use engram_core::testing::HashEmbedder;
        use engram_graph::MemoryGraph;
        use engram_core::GraphStore;
        use engram_graph::testing::BundleBuilder;

        let graph = MemoryGraph::new().unwrap();
        let embedder = Arc::new(HashEmbedder::default());
        let now = Utc::now();
        let mut bundle = BundleBuilder::new("u1", "r0", now)
            .with_chunk(0, "Acme context")
            .with_statement(0, "about Acme", vec![], 0.9, now)
            .with_entity("Acme", "ORGANIZATION", 0.9, now)
            .build();
        bundle.entities[0].name_embedding = embedder
            .embed_many(&["Acme".to_string()])
            .await
            .unwrap()
            .remove(0);
        let persisted_id = bundle.entities[0].id.clone();
        graph.write_dialogue_batch(&bundle).await.unwrap();

        let mut incoming = entity("new-1", "Acme Inc", "ORGANIZATION", "new mention");
        incoming.name_embedding = embedder
            .embed_many(&["Acme Inc".to_string()])
            .await
            .unwrap()
            .remove(0);

        let mut config = DedupConfig::default();
        config.fuzzy_overall_threshold = 0.3;
        let d = Deduplicator::new(embedder, None, config);
        let (outcome, report) = d
            .dedup_against_store(vec![incoming], &graph, "u1")
            .await
            .unwrap();

        assert_eq!(report.store_merges, 1);
        assert_eq!(outcome.id_redirect.get("new-1"), Some(&persisted_id));
        assert_eq!(outcome.entities.len(), 1);
        assert_eq!(outcome.entities[0].id, persisted_id);
        assert!(outcome.entities[0].description.contains("new mention"));
    }

    #[test]
    fn test_merge_descriptions_caps_at_budget() {
        let long_a = "a".repeat(1500);
        let long_b = "b".repeat(1500);
        let merged = merge_descriptions(&long_a, &long_b);
        assert!(merged.len() <= dedup_constants::MAX_DESCRIPTION_BYTES);
        assert!(merged.starts_with('a'));
    }

    #[test]
    fn test_merge_descriptions_dedupes_fragments() {
        let merged = merge_descriptions("engineer;from Berlin", "from Berlin");
        assert_eq!(merged, "engineer;from Berlin");
    }

    #[test]
    fn test_edit_distance_basics() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("same", "same"), 0);
        assert!(name_similarity("Acme", "Acme Inc") > 0.4);
    }
}
