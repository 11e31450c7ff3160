//! Statement & entity extraction
//!
//! Each chunk goes to the LLM with the extraction schema; replies are
//! normalised into draft values (dates parsed, ontology classes
//! canonicalised, predicates validated). Chunks are processed in parallel
//! up to the configured concurrency; results come back in chunk order.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use engram_config::{MemoryConfig, OntologyRegistry};
use engram_core::{
    normalize_date, ChatMessage, EmotionType, LanguageModel, Predicate, Result, RetryPolicy,
    StatementType, TemporalInfo,
};

use crate::preprocess::PreparedChunk;
use crate::prompts;
use crate::schema::{self, ExtractionResponse, StatementPayload};

/// Entity mention after validation
#[derive(Debug, Clone, PartialEq)]
pub struct DraftEntity {
    pub name: String,
    pub entity_type: String,
    pub description: String,
}

/// Relation after predicate validation; indices point into the parent
/// statement's `entities`
#[derive(Debug, Clone, PartialEq)]
pub struct DraftRelation {
    pub subject_idx: usize,
    pub object_idx: usize,
    pub predicate: Predicate,
    pub value: Option<String>,
    pub valid_at: Option<DateTime<Utc>>,
    pub invalid_at: Option<DateTime<Utc>>,
}

/// Statement after normalisation, before node construction
#[derive(Debug, Clone)]
pub struct DraftStatement {
    pub statement: String,
    pub stmt_type: StatementType,
    pub temporal_info: TemporalInfo,
    pub valid_at: Option<DateTime<Utc>>,
    pub invalid_at: Option<DateTime<Utc>>,
    pub emotion_type: EmotionType,
    pub emotion_intensity: f32,
    pub importance_score: f64,
    pub entities: Vec<DraftEntity>,
    pub relations: Vec<DraftRelation>,
}

/// All statements extracted from one chunk
#[derive(Debug, Clone)]
pub struct ChunkExtraction {
    pub chunk_index: usize,
    pub statements: Vec<DraftStatement>,
}

pub struct StatementExtractor {
    llm: Arc<dyn LanguageModel>,
    ontology: OntologyRegistry,
    retry: RetryPolicy,
}

impl StatementExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>, ontology: OntologyRegistry) -> Self {
        Self {
            llm,
            ontology,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Extract all chunks of one dialogue with bounded parallelism;
    /// the result vector is ordered by `chunk_index`.
    pub async fn extract_dialogue(
        &self,
        config: &MemoryConfig,
        chunks: &[PreparedChunk],
        session_context: Option<&str>,
    ) -> Result<Vec<ChunkExtraction>> {
        let context = if config.extraction.include_dialogue_context {
            session_context.map(|c| truncate_chars(c, config.extraction.max_dialogue_context_chars))
        } else {
            None
        };

        let mut extractions: Vec<ChunkExtraction> = stream::iter(chunks.iter())
            .map(|chunk| self.extract_chunk(config, chunk, context.as_deref()))
            .buffer_unordered(config.extraction.concurrency.max(1))
            .try_collect()
            .await?;

        extractions.sort_by_key(|e| e.chunk_index);
        Ok(extractions)
    }

    async fn extract_chunk(
        &self,
        config: &MemoryConfig,
        chunk: &PreparedChunk,
        context: Option<&str>,
    ) -> Result<ChunkExtraction> {
        let schema = schema::extraction_schema(&self.ontology);
        let messages = [
            ChatMessage::system(prompts::extraction_system_prompt(
                &self.ontology,
                config.extraction.statement_granularity,
            )),
            ChatMessage::user(prompts::extraction_user_prompt(
                &chunk.text,
                chunk.speaker.as_str(),
                context,
            )),
        ];

        let value = self
            .retry
            .run("extractor", || {
                self.llm.chat_structured(&messages, &schema)
            })
            .await?;
        let response: ExtractionResponse = serde_json::from_value(value).map_err(|e| {
            engram_core::MemoryError::permanent("extractor", format!("malformed response: {e}"))
        })?;

        let statements: Vec<DraftStatement> = response
            .statements
            .into_iter()
            .filter(|payload| !payload.statement.trim().is_empty())
            .map(|payload| self.normalize_statement(payload))
            .collect();

        debug!(
            chunk_index = chunk.sequence_index,
            statements = statements.len(),
            "chunk extracted"
        );

        Ok(ChunkExtraction {
            chunk_index: chunk.sequence_index,
            statements,
        })
    }

    fn normalize_statement(&self, payload: StatementPayload) -> DraftStatement {
        // Validate mentions against the ontology; dropped mentions take
        // their relations with them via the index remap.
        let mut index_map: Vec<Option<usize>> = Vec::with_capacity(payload.entities.len());
        let mut entities: Vec<DraftEntity> = Vec::with_capacity(payload.entities.len());
        for mention in &payload.entities {
            match self.ontology.canonical(&mention.entity_type) {
                Some(canonical) if !mention.name.trim().is_empty() => {
                    index_map.push(Some(entities.len()));
                    entities.push(DraftEntity {
                        name: mention.name.trim().to_string(),
                        entity_type: canonical.to_string(),
                        description: mention.description.clone().unwrap_or_default(),
                    });
                }
                _ => {
                    warn!(
                        name = %mention.name,
                        entity_type = %mention.entity_type,
                        "dropping entity mention outside the ontology"
                    );
                    index_map.push(None);
                }
            }
        }

        let mut relations: Vec<DraftRelation> = Vec::new();
        for relation in &payload.relations {
            let Ok(predicate) = Predicate::from_str(&relation.predicate) else {
                warn!(predicate = %relation.predicate, "dropping relation with unknown predicate");
                continue;
            };
            let remapped = index_map
                .get(relation.subject_idx)
                .copied()
                .flatten()
                .zip(index_map.get(relation.object_idx).copied().flatten());
            let Some((subject_idx, object_idx)) = remapped else {
                warn!(
                    subject_idx = relation.subject_idx,
                    object_idx = relation.object_idx,
                    "dropping relation referencing a dropped mention"
                );
                continue;
            };
            if subject_idx == object_idx {
                continue;
            }
            relations.push(DraftRelation {
                subject_idx,
                object_idx,
                predicate,
                value: relation.value.clone(),
                valid_at: relation.valid_at.as_deref().and_then(normalize_date),
                invalid_at: relation.invalid_at.as_deref().and_then(normalize_date),
            });
        }

        DraftStatement {
            statement: payload.statement.trim().to_string(),
            stmt_type: payload.stmt_type,
            temporal_info: payload.temporal_info,
            valid_at: payload.valid_at.as_deref().and_then(normalize_date),
            invalid_at: payload.invalid_at.as_deref().and_then(normalize_date),
            emotion_type: payload.emotion_type,
            emotion_intensity: payload.emotion_intensity.clamp(0.0, 1.0),
            importance_score: payload
                .importance_score
                .unwrap_or(engram_config::constants::activation::DEFAULT_IMPORTANCE)
                .clamp(0.0, 1.0),
            entities,
            relations,
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars()
            .skip(text.chars().count() - max_chars)
            .collect()
    }
}
