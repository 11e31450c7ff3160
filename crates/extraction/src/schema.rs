//! Structured-output models for the extraction pipeline
//!
//! Serde models for the LLM's schema-conformant responses, plus the JSON
//! Schemas sent alongside the prompts. Schemas enumerate the allowed
//! statement types, temporal tags, emotions, ontology classes and
//! predicates, so a conformant reply needs no post-hoc repair.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use engram_config::OntologyRegistry;
use engram_core::{EmotionType, MemoryType, Predicate, StatementType, TemporalInfo};

/// One extracted statement as returned by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementPayload {
    pub statement: String,
    pub stmt_type: StatementType,
    pub temporal_info: TemporalInfo,
    #[serde(default)]
    pub valid_at: Option<String>,
    #[serde(default)]
    pub invalid_at: Option<String>,
    #[serde(default)]
    pub emotion_type: EmotionType,
    #[serde(default)]
    pub emotion_intensity: f32,
    #[serde(default)]
    pub importance_score: Option<f64>,
    #[serde(default)]
    pub entities: Vec<EntityMentionPayload>,
    #[serde(default)]
    pub relations: Vec<RelationPayload>,
}

/// Entity mention within a statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMentionPayload {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Entity-entity relation; indices point into the statement's `entities`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationPayload {
    pub subject_idx: usize,
    pub object_idx: usize,
    pub predicate: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub valid_at: Option<String>,
    #[serde(default)]
    pub invalid_at: Option<String>,
}

/// Whole-chunk extraction response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResponse {
    #[serde(default)]
    pub statements: Vec<StatementPayload>,
}

/// Summary + classification response (§C6)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub memory_type: MemoryType,
}

/// Dedup arbitration verdict for one candidate pair (§C5)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationVerdict {
    pub pair_index: usize,
    pub same_entity: bool,
    /// 0 = first of the pair survives, 1 = second
    pub canonical_idx: usize,
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationResponse {
    #[serde(default)]
    pub verdicts: Vec<ArbitrationVerdict>,
}

fn enum_values<T: Serialize>(values: &[T]) -> Vec<Value> {
    values.iter().map(|v| json!(v)).collect()
}

/// JSON Schema for `ExtractionResponse`
pub fn extraction_schema(ontology: &OntologyRegistry) -> Value {
    let stmt_types = enum_values(&[
        StatementType::Fact,
        StatementType::Opinion,
        StatementType::Prediction,
        StatementType::Event,
    ]);
    let temporal = enum_values(&[
        TemporalInfo::Static,
        TemporalInfo::Dynamic,
        TemporalInfo::Atemporal,
    ]);
    let emotions = enum_values(&[
        EmotionType::Neutral,
        EmotionType::Joy,
        EmotionType::Sadness,
        EmotionType::Anger,
        EmotionType::Fear,
        EmotionType::Surprise,
        EmotionType::Disgust,
    ]);
    let entity_types: Vec<Value> = ontology
        .classes()
        .iter()
        .map(|c| json!(c.name))
        .collect();
    let predicates: Vec<Value> = Predicate::all().iter().map(|p| json!(p.as_str())).collect();

    json!({
        "type": "object",
        "properties": {
            "statements": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "statement": {"type": "string", "minLength": 1},
                        "stmt_type": {"enum": stmt_types},
                        "temporal_info": {"enum": temporal},
                        "valid_at": {"type": ["string", "null"]},
                        "invalid_at": {"type": ["string", "null"]},
                        "emotion_type": {"enum": emotions},
                        "emotion_intensity": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                        "importance_score": {"type": ["number", "null"], "minimum": 0.0, "maximum": 1.0},
                        "entities": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": {"type": "string", "minLength": 1},
                                    "entity_type": {"enum": entity_types},
                                    "description": {"type": ["string", "null"]}
                                },
                                "required": ["name", "entity_type"]
                            }
                        },
                        "relations": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "subject_idx": {"type": "integer", "minimum": 0},
                                    "object_idx": {"type": "integer", "minimum": 0},
                                    "predicate": {"enum": predicates},
                                    "value": {"type": ["string", "null"]},
                                    "valid_at": {"type": ["string", "null"]},
                                    "invalid_at": {"type": ["string", "null"]}
                                },
                                "required": ["subject_idx", "object_idx", "predicate"]
                            }
                        }
                    },
                    "required": ["statement", "stmt_type", "temporal_info"]
                }
            }
        },
        "required": ["statements"]
    })
}

/// JSON Schema for `SummaryResponse`
pub fn summary_schema() -> Value {
    let memory_types = enum_values(&[
        MemoryType::Conversation,
        MemoryType::ProjectWork,
        MemoryType::Learning,
        MemoryType::Decision,
        MemoryType::ImportantEvent,
    ]);
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "summary": {"type": "string"},
            "memory_type": {"enum": memory_types}
        },
        "required": ["title", "summary", "memory_type"]
    })
}

/// JSON Schema for `ArbitrationResponse`
pub fn arbitration_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "verdicts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "pair_index": {"type": "integer", "minimum": 0},
                        "same_entity": {"type": "boolean"},
                        "canonical_idx": {"type": "integer", "minimum": 0, "maximum": 1},
                        "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                        "reason": {"type": "string"}
                    },
                    "required": ["pair_index", "same_entity", "canonical_idx", "confidence"]
                }
            }
        },
        "required": ["verdicts"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_response_round_trip() {
        let raw = json!({
            "statements": [{
                "statement": "Alice works at Acme",
                "stmt_type": "FACT",
                "temporal_info": "DYNAMIC",
                "valid_at": "2021-03-01",
                "emotion_type": "neutral",
                "emotion_intensity": 0.0,
                "entities": [
                    {"name": "Alice", "entity_type": "PERSON"},
                    {"name": "Acme", "entity_type": "ORGANIZATION"}
                ],
                "relations": [
                    {"subject_idx": 0, "object_idx": 1, "predicate": "WORKS_AT"}
                ]
            }]
        });
        let parsed: ExtractionResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.statements.len(), 1);
        let stmt = &parsed.statements[0];
        assert_eq!(stmt.stmt_type, StatementType::Fact);
        assert_eq!(stmt.entities.len(), 2);
        assert_eq!(stmt.relations[0].predicate, "WORKS_AT");
    }

    #[test]
    fn test_extraction_schema_enumerates_ontology() {
        let schema = extraction_schema(&OntologyRegistry::curated());
        let rendered = schema.to_string();
        assert!(rendered.contains("PERSON"));
        assert!(rendered.contains("WORKS_AT"));
        assert!(rendered.contains("ATEMPORAL"));
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let raw = json!({
            "statements": [{
                "statement": "likes tea",
                "stmt_type": "OPINION",
                "temporal_info": "ATEMPORAL"
            }]
        });
        let parsed: ExtractionResponse = serde_json::from_value(raw).unwrap();
        let stmt = &parsed.statements[0];
        assert!(stmt.entities.is_empty());
        assert_eq!(stmt.emotion_type, EmotionType::Neutral);
        assert!(stmt.importance_score.is_none());
    }
}
