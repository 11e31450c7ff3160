//! Enumerations of the knowledge-graph schema

use serde::{Deserialize, Serialize};

/// Node labels of the labelled property graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    Dialogue,
    Chunk,
    Statement,
    ExtractedEntity,
    MemorySummary,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Dialogue => "Dialogue",
            NodeLabel::Chunk => "Chunk",
            NodeLabel::Statement => "Statement",
            NodeLabel::ExtractedEntity => "ExtractedEntity",
            NodeLabel::MemorySummary => "MemorySummary",
        }
    }

    /// Labels that carry activation values and participate in forgetting
    pub fn has_activation(&self) -> bool {
        matches!(self, NodeLabel::Statement | NodeLabel::ExtractedEntity)
    }

    /// All labels eligible as retrieval targets
    pub fn retrievable() -> &'static [NodeLabel] {
        &[
            NodeLabel::MemorySummary,
            NodeLabel::Statement,
            NodeLabel::Chunk,
            NodeLabel::ExtractedEntity,
        ]
    }
}

impl std::fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of an extracted statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementType {
    #[default]
    Fact,
    Opinion,
    Prediction,
    Event,
}

/// How a statement relates to time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TemporalInfo {
    /// True once established and unlikely to change
    Static,
    /// Valid for a period, may be invalidated
    Dynamic,
    /// Not anchored in time at all
    #[default]
    Atemporal,
}

/// Emotion attached to a statement by the extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmotionType {
    #[default]
    Neutral,
    Joy,
    Sadness,
    Anger,
    Fear,
    Surprise,
    Disgust,
}

/// Episodic classification of a memory summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    #[default]
    Conversation,
    ProjectWork,
    Learning,
    Decision,
    ImportantEvent,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Conversation => "conversation",
            MemoryType::ProjectWork => "project_work",
            MemoryType::Learning => "learning",
            MemoryType::Decision => "decision",
            MemoryType::ImportantEvent => "important_event",
        }
    }
}

/// Curated entity-to-entity relation kinds.
///
/// Relations outside this set are dropped at extraction time (the statement
/// itself is retained) with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Predicate {
    IsA,
    HasA,
    PartOf,
    LocatedIn,
    WorksAt,
    CreatedBy,
    BelongsTo,
    ParticipatedIn,
    OccurredAt,
    CausedBy,
    RelatedTo,
}

impl Predicate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Predicate::IsA => "IS_A",
            Predicate::HasA => "HAS_A",
            Predicate::PartOf => "PART_OF",
            Predicate::LocatedIn => "LOCATED_IN",
            Predicate::WorksAt => "WORKS_AT",
            Predicate::CreatedBy => "CREATED_BY",
            Predicate::BelongsTo => "BELONGS_TO",
            Predicate::ParticipatedIn => "PARTICIPATED_IN",
            Predicate::OccurredAt => "OCCURRED_AT",
            Predicate::CausedBy => "CAUSED_BY",
            Predicate::RelatedTo => "RELATED_TO",
        }
    }

    pub fn all() -> &'static [Predicate] {
        &[
            Predicate::IsA,
            Predicate::HasA,
            Predicate::PartOf,
            Predicate::LocatedIn,
            Predicate::WorksAt,
            Predicate::CreatedBy,
            Predicate::BelongsTo,
            Predicate::ParticipatedIn,
            Predicate::OccurredAt,
            Predicate::CausedBy,
            Predicate::RelatedTo,
        ]
    }
}

impl std::str::FromStr for Predicate {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Predicate::all()
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or(())
    }
}

/// Retrieval mode selected by the caller or the read runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Keyword,
    Embedding,
    #[default]
    Hybrid,
    Temporal,
}

/// Modality of a perceptual record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PerceptualType {
    #[default]
    Text,
    Audio,
    Vision,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_predicate_round_trip() {
        for p in Predicate::all() {
            assert_eq!(Predicate::from_str(p.as_str()), Ok(*p));
        }
        assert!(Predicate::from_str("MARRIED_TO").is_err());
        assert_eq!(Predicate::from_str("works_at"), Ok(Predicate::WorksAt));
    }

    #[test]
    fn test_statement_type_serde_uppercase() {
        let json = serde_json::to_string(&StatementType::Prediction).unwrap();
        assert_eq!(json, "\"PREDICTION\"");
        let back: StatementType = serde_json::from_str("\"FACT\"").unwrap();
        assert_eq!(back, StatementType::Fact);
    }

    #[test]
    fn test_memory_type_snake_case() {
        let json = serde_json::to_string(&MemoryType::ImportantEvent).unwrap();
        assert_eq!(json, "\"important_event\"");
    }
}
