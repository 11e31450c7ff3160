//! Language model port

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::ChatMessage;

/// Chat-completion capability consumed by extraction, summarisation,
/// deduplication arbitration and the read runtime.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Free-form completion over a system/user message sequence
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Structured completion: the returned value conforms to `schema`
    /// (a JSON Schema document) or the call fails with
    /// `ExternalPermanent` after the provider's internal retries.
    async fn chat_structured(&self, messages: &[ChatMessage], schema: &Value) -> Result<Value>;

    /// Identifier used for client caching and logging
    fn model_id(&self) -> &str;
}
