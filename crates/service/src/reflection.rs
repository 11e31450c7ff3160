//! Self-reflection enrichment
//!
//! An optional job that re-reads a tenant's recent memories and refreshes
//! two cached projections: emotion-memory suggestions (statements carrying
//! strong emotion, with an LLM-drafted care suggestion) and the implicit
//! profile (the entities the user keeps coming back to). Triggered every
//! `iteration_period` writes when enabled, or manually.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use engram_config::constants::cache_keys;
use engram_config::MemoryConfig;
use engram_core::{
    ChatMessage, Clock, EmotionType, GraphStore, KvCache, LanguageModel, NodeLabel, Result,
};

/// One cached emotion-memory suggestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionSuggestion {
    pub statement: String,
    pub emotion_type: EmotionType,
    pub emotion_intensity: f32,
    pub suggestion: String,
}

/// Cached implicit profile: recurring entities, strongest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImplicitProfile {
    pub interests: Vec<ProfileInterest>,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileInterest {
    pub name: String,
    pub entity_type: String,
    pub mentions: usize,
}

/// What a reflection pass did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflectionOutcome {
    pub statements_reviewed: usize,
    pub suggestions_written: usize,
    pub profile_interests: usize,
}

pub struct ReflectionEngine {
    store: Arc<dyn GraphStore>,
    llm: Arc<dyn LanguageModel>,
    kv: Arc<dyn KvCache>,
    clock: Arc<dyn Clock>,
}

impl ReflectionEngine {
    pub fn new(
        store: Arc<dyn GraphStore>,
        llm: Arc<dyn LanguageModel>,
        kv: Arc<dyn KvCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            llm,
            kv,
            clock,
        }
    }

    fn counter_key(end_user_id: &str) -> String {
        format!("cache:memory:reflection:counter:{end_user_id}")
    }

    /// Bump the per-tenant write counter; returns true when this write
    /// crosses the iteration period and a pass should run.
    pub async fn record_write(&self, end_user_id: &str, config: &MemoryConfig) -> Result<bool> {
        if !config.reflection.reflection_enabled {
            return Ok(false);
        }
        let key = Self::counter_key(end_user_id);
        let count: u64 = self
            .kv
            .get(&key)
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0)
            + 1;
        self.kv.set(&key, &count.to_string(), None).await?;
        Ok(count % config.reflection.iteration_period.max(1) as u64 == 0)
    }

    /// One reflection pass over the tenant's recent memories
    pub async fn reflect(
        &self,
        end_user_id: &str,
        config: &MemoryConfig,
    ) -> Result<ReflectionOutcome> {
        let now = self.clock.now();
        let lookback = Duration::days(7 * config.reflection.reflexion_range.max(1) as i64);

        let statements = self
            .store
            .search_temporal(
                end_user_id,
                &[NodeLabel::Statement],
                now - lookback,
                now,
                200,
            )
            .await?;
        let entities = self
            .store
            .search_temporal(
                end_user_id,
                &[NodeLabel::ExtractedEntity],
                now - lookback,
                now,
                200,
            )
            .await?;

        let statement_nodes = self
            .store
            .fetch_by_ids(&statements.iter().map(|h| h.id.clone()).collect::<Vec<_>>())
            .await?;

        // Emotion suggestions for strongly felt statements.
        let mut suggestions: Vec<EmotionSuggestion> = Vec::new();
        for node in &statement_nodes {
            let engram_core::GraphNode::Statement(stmt) = node else {
                continue;
            };
            if f64::from(stmt.emotion_intensity) < config.reflection.baseline
                || stmt.emotion_type == EmotionType::Neutral
            {
                continue;
            }
            let suggestion = match self.draft_suggestion(stmt).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "suggestion drafting failed, using statement verbatim");
                    stmt.statement.clone()
                }
            };
            suggestions.push(EmotionSuggestion {
                statement: stmt.statement.clone(),
                emotion_type: stmt.emotion_type,
                emotion_intensity: stmt.emotion_intensity,
                suggestion,
            });
        }
        if !suggestions.is_empty() {
            self.kv
                .set(
                    &cache_keys::emotion_suggestions(end_user_id),
                    &serde_json::to_string(&suggestions).unwrap_or_default(),
                    None,
                )
                .await?;
        }

        // Implicit profile from recurring entity mentions.
        let entity_nodes = self
            .store
            .fetch_by_ids(&entities.iter().map(|h| h.id.clone()).collect::<Vec<_>>())
            .await?;
        let mut interests: Vec<ProfileInterest> = entity_nodes
            .iter()
            .filter_map(|node| match node {
                engram_core::GraphNode::ExtractedEntity(e) => Some(ProfileInterest {
                    name: e.name.clone(),
                    entity_type: e.entity_type.clone(),
                    mentions: e.access_history.len(),
                }),
                _ => None,
            })
            .collect();
        interests.sort_by(|a, b| b.mentions.cmp(&a.mentions).then_with(|| a.name.cmp(&b.name)));
        interests.truncate(20);

        let profile = ImplicitProfile {
            interests,
            updated_at_ms: now.timestamp_millis(),
        };
        self.kv
            .set(
                &cache_keys::implicit_profile(end_user_id),
                &serde_json::to_string(&profile).unwrap_or_default(),
                None,
            )
            .await?;

        let outcome = ReflectionOutcome {
            statements_reviewed: statement_nodes.len(),
            suggestions_written: suggestions.len(),
            profile_interests: profile.interests.len(),
        };
        debug!(
            end_user_id,
            reviewed = outcome.statements_reviewed,
            suggestions = outcome.suggestions_written,
            "reflection pass complete"
        );
        Ok(outcome)
    }

    async fn draft_suggestion(&self, stmt: &engram_core::StatementNode) -> Result<String> {
        let messages = [
            ChatMessage::system(
                "Given an emotionally charged memory, write one short, caring \
                 follow-up suggestion an assistant could act on later.",
            ),
            ChatMessage::user(format!(
                "Memory: {} (emotion: {})",
                stmt.statement,
                json!(stmt.emotion_type)
            )),
        ];
        self.llm.chat(&messages).await
    }
}
