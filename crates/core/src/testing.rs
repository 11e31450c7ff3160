//! Test doubles for the capability ports
//!
//! Used by in-crate unit tests and downstream scenario tests. Nothing here
//! is wired into production paths.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{MemoryError, Result};
use crate::traits::{Embedder, LanguageModel, Reranker, RerankResult};
use crate::types::ChatMessage;

/// Language model double that replays queued structured responses (FIFO).
/// When the queue is empty it falls back to `default_response`, or fails if
/// none is set.
pub struct MockLlm {
    structured: Mutex<VecDeque<Value>>,
    default_response: Option<Value>,
    chat_reply: String,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            structured: Mutex::new(VecDeque::new()),
            default_response: None,
            chat_reply: "ok".to_string(),
        }
    }

    pub fn with_default(default_response: Value) -> Self {
        Self {
            default_response: Some(default_response),
            ..Self::new()
        }
    }

    pub fn push_structured(&self, value: Value) {
        self.structured.lock().unwrap().push_back(value);
    }

    pub fn set_chat_reply(&mut self, reply: impl Into<String>) {
        self.chat_reply = reply.into();
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for MockLlm {
    async fn chat(&self, _messages: &[ChatMessage]) -> Result<String> {
        Ok(self.chat_reply.clone())
    }

    async fn chat_structured(&self, _messages: &[ChatMessage], _schema: &Value) -> Result<Value> {
        if let Some(next) = self.structured.lock().unwrap().pop_front() {
            return Ok(next);
        }
        self.default_response
            .clone()
            .ok_or_else(|| MemoryError::permanent("mock_llm", "no canned response queued"))
    }

    fn model_id(&self) -> &str {
        "mock-llm"
    }
}

/// Language model double that picks its reply by inspecting the requested
/// schema's top-level properties. Useful when several structured calls
/// interleave concurrently and a FIFO queue would be racy.
pub struct SchemaRoutingLlm {
    routes: Vec<(String, Value)>,
    chat_reply: String,
}

impl SchemaRoutingLlm {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            chat_reply: "ok".to_string(),
        }
    }

    /// Route calls whose schema declares `property` to `response`
    pub fn route(mut self, property: &str, response: Value) -> Self {
        self.routes.push((property.to_string(), response));
        self
    }

    pub fn with_chat_reply(mut self, reply: impl Into<String>) -> Self {
        self.chat_reply = reply.into();
        self
    }
}

impl Default for SchemaRoutingLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for SchemaRoutingLlm {
    async fn chat(&self, _messages: &[ChatMessage]) -> Result<String> {
        Ok(self.chat_reply.clone())
    }

    async fn chat_structured(&self, _messages: &[ChatMessage], schema: &Value) -> Result<Value> {
        let properties = schema.get("properties").and_then(Value::as_object);
        for (property, response) in &self.routes {
            if properties.map_or(false, |p| p.contains_key(property)) {
                return Ok(response.clone());
            }
        }
        Err(MemoryError::permanent(
            "routing_llm",
            "no route matches the requested schema",
        ))
    }

    fn model_id(&self) -> &str {
        "schema-routing-llm"
    }
}

/// Deterministic character-trigram embedder. Similar strings land close in
/// cosine space, which is what the fuzzy-dedup and retrieval tests need.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        if chars.is_empty() {
            return vector;
        }
        for window in chars.windows(3.min(chars.len())) {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for c in window {
                hash ^= *c as u64;
                hash = hash.wrapping_mul(0x100_0000_01b3);
            }
            vector[(hash % self.dimension as u64) as usize] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Reranker double: keeps input order, assigns linearly decaying scores
pub struct PassthroughReranker;

#[async_trait]
impl Reranker for PassthroughReranker {
    async fn rerank(
        &self,
        _query: &str,
        docs: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankResult>> {
        Ok(docs
            .iter()
            .enumerate()
            .take(top_k)
            .map(|(index, _)| RerankResult {
                index,
                score: 1.0 - index as f32 * 0.01,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_similarity_ordering() {
        let embedder = HashEmbedder::default();
        let vectors = embedder
            .embed_many(&[
                "Acme Incorporated".to_string(),
                "Acme Inc".to_string(),
                "completely unrelated words".to_string(),
            ])
            .await
            .unwrap();

        let close = crate::cosine_similarity(&vectors[0], &vectors[1]);
        let far = crate::cosine_similarity(&vectors[0], &vectors[2]);
        assert!(close > far);
        assert!(close > 0.5);
    }

    #[tokio::test]
    async fn test_mock_llm_replays_in_order() {
        let llm = MockLlm::new();
        llm.push_structured(serde_json::json!({"n": 1}));
        llm.push_structured(serde_json::json!({"n": 2}));

        let schema = serde_json::json!({});
        let first = llm.chat_structured(&[], &schema).await.unwrap();
        let second = llm.chat_structured(&[], &schema).await.unwrap();
        assert_eq!(first["n"], 1);
        assert_eq!(second["n"], 2);
        assert!(llm.chat_structured(&[], &schema).await.is_err());
    }
}
