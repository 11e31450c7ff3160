//! Error taxonomy shared across the memory engine
//!
//! Every subsystem error converts into `MemoryError` so callers can apply a
//! uniform retry/abort policy:
//! - `Validation`, `InvariantViolated`: never retried, abort the operation
//! - `ExternalTransient`: retried with capped exponential backoff
//! - `ExternalPermanent`: surfaced as failure of the enclosing operation
//! - `ConcurrencyConflict`: treated as a skip by the forgetting cycle
//! - `Cancelled`: propagates; running transactions roll back

use thiserror::Error;

/// Unified error type for the memory engine
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Malformed input (empty dialogue, unknown role, no chunks after cleaning)
    #[error("validation error: {0}")]
    Validation(String),

    /// Timeouts, 429/503, broken connections from LLM/Embedder/GraphStore
    #[error("transient failure in {context}: {message}")]
    ExternalTransient { context: String, message: String },

    /// Auth failures, invalid model ids, schema violations after retries
    #[error("permanent failure in {context}: {message}")]
    ExternalPermanent { context: String, message: String },

    /// A node expected during a merge has already been deleted
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// A data-model invariant would be broken by continuing
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    /// Deadline exceeded or caller cancelled
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl MemoryError {
    /// Transient external failure, eligible for retry
    pub fn transient(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalTransient {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Permanent external failure, not retried
    pub fn permanent(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalPermanent {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolated(message.into())
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled(message.into())
    }

    /// Whether the retry policy may re-attempt the failed call
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ExternalTransient { .. })
    }

    /// Whether the error aborts an entire write without partial persistence
    pub fn is_fatal_to_write(&self) -> bool {
        !matches!(self, Self::ConcurrencyConflict(_))
    }

    /// Stable machine-readable code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::ExternalTransient { .. } => "external_transient",
            Self::ExternalPermanent { .. } => "external_permanent",
            Self::ConcurrencyConflict(_) => "concurrency_conflict",
            Self::InvariantViolated(_) => "invariant_violated",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = MemoryError::transient("embedder", "503 service unavailable");
        assert!(err.is_transient());
        assert_eq!(err.code(), "external_transient");

        let err = MemoryError::validation("empty dialogue");
        assert!(!err.is_transient());
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn test_conflict_is_not_write_fatal() {
        let err = MemoryError::ConcurrencyConflict("statement already merged".into());
        assert!(!err.is_fatal_to_write());
        assert!(MemoryError::invariant("statement without chunk").is_fatal_to_write());
    }
}
