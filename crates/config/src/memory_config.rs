//! Per-tenant memory configuration
//!
//! A `MemoryConfig` is the resolved configuration generation identified by
//! `config_id`. Storage is owned by an external collaborator; the engine
//! sees it through the `ConfigProvider` port.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use engram_core::{MemoryError, Result};

use crate::constants::{activation, chunking, dedup, forgetting};

/// Which chunker splits oversize messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkerStrategy {
    #[default]
    Recursive,
    Semantic,
    Llm,
}

/// Scene profile for semantic pruning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PruningScene {
    #[default]
    Education,
    OnlineService,
    Outbound,
}

/// Output language for summaries and answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Zh,
    En,
}

/// Semantic pruning knobs (§C3)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningConfig {
    pub pruning_switch: bool,
    pub pruning_scene: PruningScene,
    /// Importance score below which non-pattern messages are dropped, 0.0–0.9
    pub pruning_threshold: f64,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            pruning_switch: false,
            pruning_scene: PruningScene::default(),
            pruning_threshold: 0.3,
        }
    }
}

/// Dedup thresholds and gates (§C5)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    pub enable_llm_dedup_blockwise: bool,
    pub enable_llm_disambiguation: bool,
    pub fuzzy_name_threshold_strict: f64,
    pub fuzzy_type_threshold_strict: f64,
    pub fuzzy_overall_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enable_llm_dedup_blockwise: false,
            enable_llm_disambiguation: false,
            fuzzy_name_threshold_strict: dedup::DEFAULT_NAME_THRESHOLD_STRICT,
            fuzzy_type_threshold_strict: dedup::DEFAULT_TYPE_THRESHOLD_STRICT,
            fuzzy_overall_threshold: dedup::DEFAULT_OVERALL_THRESHOLD,
        }
    }
}

/// Extraction sizing (§C4)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Granularity hint rendered into the extraction prompt: `fine` splits
    /// aggressively into atomic statements, `coarse` keeps compound ones
    pub statement_granularity: StatementGranularity,
    pub include_dialogue_context: bool,
    pub max_dialogue_context_chars: usize,
    /// Parallel chunk extractions per dialogue
    pub concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatementGranularity {
    #[default]
    Fine,
    Coarse,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            statement_granularity: StatementGranularity::default(),
            include_dialogue_context: false,
            max_dialogue_context_chars: 2000,
            concurrency: 4,
        }
    }
}

/// ACT-R forgetting parameters (§C8/C9), CRUD-able per config generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgettingConfig {
    /// Minimum retention rate
    pub offset: f64,
    /// λ applied to memory-node activation
    pub lambda_mem: f64,
    /// λ used for forgetting-curve projection
    pub lambda_time: f64,
    /// Power-law decay constant d
    pub decay_constant: f64,
    pub max_batch: usize,
    pub min_days: i64,
    /// Mean pair activation below which a pair qualifies for merging
    pub activation_threshold: f64,
}

impl Default for ForgettingConfig {
    fn default() -> Self {
        Self {
            offset: activation::DEFAULT_OFFSET,
            lambda_mem: activation::DEFAULT_FORGETTING_RATE,
            lambda_time: activation::DEFAULT_FORGETTING_RATE,
            decay_constant: activation::DEFAULT_DECAY_CONSTANT,
            max_batch: forgetting::DEFAULT_MAX_BATCH,
            min_days: forgetting::DEFAULT_MIN_DAYS,
            activation_threshold: forgetting::DEFAULT_ACTIVATION_THRESHOLD,
        }
    }
}

impl ForgettingConfig {
    /// Field validation applied on CRUD updates
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.offset) {
            return Err(MemoryError::validation("offset must be in [0, 1)"));
        }
        if self.lambda_mem <= 0.0 || self.lambda_time <= 0.0 {
            return Err(MemoryError::validation("lambda must be positive"));
        }
        if !(0.0..=1.0).contains(&self.decay_constant) || self.decay_constant == 0.0 {
            return Err(MemoryError::validation("decay constant must be in (0, 1]"));
        }
        if self.max_batch == 0 {
            return Err(MemoryError::validation("max_batch must be at least 1"));
        }
        if self.min_days < 0 {
            return Err(MemoryError::validation("min_days must be non-negative"));
        }
        Ok(())
    }

    /// Partial update from a JSON object of field values
    pub fn apply_fields(&mut self, fields: &serde_json::Value) -> Result<()> {
        let obj = fields
            .as_object()
            .ok_or_else(|| MemoryError::validation("fields must be an object"))?;
        let mut updated = self.clone();
        for (key, value) in obj {
            match key.as_str() {
                "offset" => updated.offset = as_f64(value, key)?,
                "lambda_mem" | "lambda" => updated.lambda_mem = as_f64(value, key)?,
                "lambda_time" => updated.lambda_time = as_f64(value, key)?,
                "decay_constant" | "d" => updated.decay_constant = as_f64(value, key)?,
                "max_batch" => {
                    updated.max_batch = as_f64(value, key)? as usize;
                }
                "min_days" => {
                    updated.min_days = as_f64(value, key)? as i64;
                }
                "activation_threshold" => updated.activation_threshold = as_f64(value, key)?,
                other => {
                    return Err(MemoryError::validation(format!(
                        "unknown forgetting config field: {other}"
                    )))
                }
            }
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

fn as_f64(value: &serde_json::Value, key: &str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| MemoryError::validation(format!("field {key} must be numeric")))
}

/// Self-reflection enrichment job knobs (optional)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    pub reflection_enabled: bool,
    /// Writes between reflection passes
    pub iteration_period: usize,
    /// How many recent dialogues each pass re-reads
    pub reflexion_range: usize,
    /// Importance baseline newly reflected statements start from
    pub baseline: f64,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            reflection_enabled: false,
            iteration_period: 10,
            reflexion_range: 5,
            baseline: 0.5,
        }
    }
}

/// The resolved configuration generation for one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub config_id: String,
    pub chunker_strategy: ChunkerStrategy,
    pub chunk_size: usize,
    pub min_characters_per_chunk: usize,
    pub language: Language,
    pub pruning: PruningConfig,
    pub dedup: DedupConfig,
    pub extraction: ExtractionConfig,
    pub forgetting: ForgettingConfig,
    pub reflection: ReflectionConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            config_id: "default".into(),
            chunker_strategy: ChunkerStrategy::default(),
            chunk_size: chunking::DEFAULT_CHUNK_SIZE,
            min_characters_per_chunk: chunking::DEFAULT_MIN_CHARACTERS_PER_CHUNK,
            language: Language::default(),
            pruning: PruningConfig::default(),
            dedup: DedupConfig::default(),
            extraction: ExtractionConfig::default(),
            forgetting: ForgettingConfig::default(),
            reflection: ReflectionConfig::default(),
        }
    }
}

/// Port to the collaborator that owns configuration storage
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn get(&self, config_id: &str) -> Result<MemoryConfig>;

    /// Persist an updated generation (used by forgetting-config CRUD)
    async fn put(&self, config: MemoryConfig) -> Result<()>;
}

/// In-process provider backed by a map; the default for embedded use and
/// tests. Unknown ids resolve to the default generation.
#[derive(Default)]
pub struct StaticConfigProvider {
    configs: RwLock<HashMap<String, Arc<MemoryConfig>>>,
}

impl StaticConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        let provider = Self::new();
        provider
            .configs
            .write()
            .insert(config.config_id.clone(), Arc::new(config));
        provider
    }
}

#[async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn get(&self, config_id: &str) -> Result<MemoryConfig> {
        if let Some(found) = self.configs.read().get(config_id) {
            return Ok(found.as_ref().clone());
        }
        Ok(MemoryConfig {
            config_id: config_id.to_string(),
            ..MemoryConfig::default()
        })
    }

    async fn put(&self, config: MemoryConfig) -> Result<()> {
        config.forgetting.validate()?;
        self.configs
            .write()
            .insert(config.config_id.clone(), Arc::new(config));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_forgetting_validation() {
        let mut cfg = ForgettingConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.offset = 1.0;
        assert!(cfg.validate().is_err());

        cfg.offset = 0.1;
        cfg.max_batch = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_apply_fields_partial_update() {
        let mut cfg = ForgettingConfig::default();
        cfg.apply_fields(&json!({"offset": 0.2, "max_batch": 50}))
            .unwrap();
        assert_eq!(cfg.offset, 0.2);
        assert_eq!(cfg.max_batch, 50);
        assert_eq!(cfg.lambda_mem, 0.3);
    }

    #[test]
    fn test_apply_fields_rejects_invalid() {
        let mut cfg = ForgettingConfig::default();
        let before = cfg.clone();
        assert!(cfg.apply_fields(&json!({"offset": 2.0})).is_err());
        assert_eq!(cfg.offset, before.offset);
        assert!(cfg.apply_fields(&json!({"nonsense": 1.0})).is_err());
    }

    #[tokio::test]
    async fn test_static_provider_falls_back_to_default() {
        let provider = StaticConfigProvider::new();
        let cfg = provider.get("cfg-404").await.unwrap();
        assert_eq!(cfg.config_id, "cfg-404");
        assert_eq!(cfg.chunk_size, chunking::DEFAULT_CHUNK_SIZE);
    }
}
