//! Configuration for the memory engine
//!
//! Two layers:
//! - `Settings`: process-wide wiring (provider endpoints, cache backend,
//!   logging), loaded once at startup
//! - `MemoryConfig`: the per-tenant configuration generation resolved by
//!   `config_id` through the `ConfigProvider` port
//!
//! Plus the centralized `constants` module and the entity-type
//! `OntologyRegistry`.

pub mod constants;
pub mod memory_config;
pub mod ontology;
pub mod settings;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub use memory_config::{
    ChunkerStrategy, ConfigProvider, DedupConfig, ExtractionConfig, ForgettingConfig, Language,
    MemoryConfig, PruningConfig, PruningScene, ReflectionConfig, StatementGranularity,
    StaticConfigProvider,
};
pub use ontology::{OntologyClass, OntologyRegistry};
pub use settings::{
    CacheSettings, ObservabilitySettings, ProviderSettings, RuntimeEnvironment, Settings,
};
