//! Retrieval result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{NodeLabel, SearchMode};

/// One retrieval hit with its provenance tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub label: NodeLabel,
    /// Display text of the matched node
    pub content: String,
    pub score: f32,
    pub source_mode: SearchMode,
    pub end_user_id: String,
    pub created_at: DateTime<Utc>,
}

impl SearchHit {
    /// Deterministic ordering: score descending, ties broken by id lex
    pub fn rank_cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Activation write-back after a node was surfaced to a reader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationUpdate {
    pub node_id: String,
    pub label: NodeLabel,
    pub activation_value: f64,
    pub last_accessed_at: DateTime<Utc>,
    pub access_history: Vec<DateTime<Utc>>,
}

/// A low-activation Statement+Entity pair eligible for forgetting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgettablePair {
    pub statement: super::nodes::StatementNode,
    pub entity: super::nodes::EntityNode,
    pub avg_activation: f64,
}

/// Outcome of merging one pair into a summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    /// Pair deleted, summary attached to former neighbours
    Merged,
    /// One or both nodes already gone; nothing changed
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> SearchHit {
        SearchHit {
            id: id.into(),
            label: NodeLabel::Statement,
            content: String::new(),
            score,
            source_mode: SearchMode::Hybrid,
            end_user_id: "u1".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_rank_ties_break_by_id() {
        let mut hits = vec![hit("b", 0.5), hit("a", 0.5), hit("c", 0.9)];
        hits.sort_by(|l, r| l.rank_cmp(r));
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
