//! Centralized constants
//!
//! Single source of truth for defaults shared across crates. Tunables that
//! vary per tenant belong in `MemoryConfig`; values here are engine-wide.

/// Activation & forgetting defaults
pub mod activation {
    /// Minimum retention rate: activation never decays below this
    pub const DEFAULT_OFFSET: f64 = 0.1;
    /// Forgetting rate λ
    pub const DEFAULT_FORGETTING_RATE: f64 = 0.3;
    /// Power-law decay constant d
    pub const DEFAULT_DECAY_CONSTANT: f64 = 0.5;
    /// Bound on `access_history` length
    pub const MAX_HISTORY: usize = engram_core::limits::MAX_ACCESS_HISTORY;
    /// Exponent clamp for the activation formula
    pub const EXPONENT_CLAMP: f64 = 100.0;
    /// Default importance when the extractor does not assign one
    pub const DEFAULT_IMPORTANCE: f64 = 0.5;
}

/// Forgetting-cycle defaults
pub mod forgetting {
    /// Pairs merged per cycle
    pub const DEFAULT_MAX_BATCH: usize = 100;
    /// Days a node must be untouched before qualifying
    pub const DEFAULT_MIN_DAYS: i64 = 30;
    /// Mean pair activation below which the pair qualifies
    pub const DEFAULT_ACTIVATION_THRESHOLD: f64 = 0.3;
    /// Named lock key for multi-process deployments
    pub const LOCK_KEY: &str = "cache:memory:forgetting:lock";
    /// Lock TTL; must outlast the longest plausible cycle
    pub const LOCK_TTL_SECS: u64 = 3600;
}

/// Deduplication defaults
pub mod dedup {
    /// Weight of name-embedding cosine in the fuzzy score
    pub const EMBEDDING_WEIGHT: f64 = 0.7;
    /// Weight of normalised edit distance in the fuzzy score
    pub const NAME_WEIGHT: f64 = 0.3;
    /// Overall fuzzy-merge threshold
    pub const DEFAULT_OVERALL_THRESHOLD: f64 = 0.85;
    /// Strict per-field thresholds
    pub const DEFAULT_NAME_THRESHOLD_STRICT: f64 = 0.9;
    pub const DEFAULT_TYPE_THRESHOLD_STRICT: f64 = 0.95;
    /// Borderline band below the overall threshold sent to LLM arbitration
    pub const LLM_BORDERLINE_DELTA: f64 = 0.1;
    /// Pairs per arbitration block
    pub const LLM_BLOCK_SIZE: usize = 8;
    /// Minimum arbitration confidence to apply a merge
    pub const LLM_MIN_CONFIDENCE: f64 = 0.8;
    /// Byte cap for merged entity descriptions
    pub const MAX_DESCRIPTION_BYTES: usize = 2048;
}

/// Retrieval defaults
pub mod retrieval {
    pub const DEFAULT_TOP_K: usize = 10;
    pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.3;
    /// Weight of vector scores in hybrid fusion (keyword gets 1 − α)
    pub const HYBRID_VECTOR_WEIGHT: f32 = 0.6;
    /// Temporal search window when the caller gives no start
    pub const DEFAULT_TEMPORAL_WINDOW_DAYS: i64 = 7;
}

/// Read-runtime defaults
pub mod runtime {
    /// Bounded fan-out for sub-question retrieval
    pub const DEFAULT_RETRIEVAL_CONCURRENCY: usize = 5;
    /// Overall read deadline
    pub const DEFAULT_READ_DEADLINE_SECS: u64 = 60;
    /// Sentinel answers when no evidence survives
    pub const SENTINEL_ANSWER_ZH: &str = "信息不足，无法回答";
    pub const SENTINEL_ANSWER_EN: &str = "Insufficient information to answer.";
}

/// Session-store defaults
pub mod session {
    /// Rolling buffer TTL
    pub const DEFAULT_TTL_SECS: u64 = 86_400;
    /// Retained (user, assistant) pairs
    pub const DEFAULT_MAX_TURNS: usize = 20;
    pub fn key(end_user_id: &str) -> String {
        format!("session:{end_user_id}")
    }
}

/// KV cache key formats for the perceptual/implicit projections
pub mod cache_keys {
    pub fn emotion_suggestions(end_user_id: &str) -> String {
        format!("cache:memory:emotion_memory:suggestions:{end_user_id}")
    }

    pub fn implicit_profile(end_user_id: &str) -> String {
        format!("cache:memory:implicit_memory:profile:{end_user_id}")
    }
}

/// Provider call budgets (seconds)
pub mod timeouts {
    pub const LLM_SECS: u64 = 120;
    pub const EMBEDDER_SECS: u64 = 120;
    pub const RERANKER_SECS: u64 = 30;
    pub const GRAPH_SECS: u64 = 30;
    pub const KV_SECS: u64 = 5;
}

/// Chunking defaults
pub mod chunking {
    pub const DEFAULT_CHUNK_SIZE: usize = 1024;
    pub const DEFAULT_MIN_CHARACTERS_PER_CHUNK: usize = 24;
}

/// Summariser defaults
pub mod summary {
    pub const MAX_WORDS: usize = 200;
    pub const EMPTY_TITLE_ZH: &str = "空内容";
    pub const EMPTY_TITLE_EN: &str = "Empty Content";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuzzy_weights_sum_to_one() {
        assert!((dedup::EMBEDDING_WEIGHT + dedup::NAME_WEIGHT - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_key_formats() {
        assert_eq!(session::key("u1"), "session:u1");
        assert_eq!(
            cache_keys::emotion_suggestions("u1"),
            "cache:memory:emotion_memory:suggestions:u1"
        );
        assert_eq!(
            cache_keys::implicit_profile("u1"),
            "cache:memory:implicit_memory:profile:u1"
        );
    }
}
