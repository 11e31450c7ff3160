//! Provider adapters for the capability ports
//!
//! - `openai`: OpenAI-compatible `/chat/completions` backend
//! - `claude`: Anthropic Messages API backend
//! - `structured`: schema-validated structured output with bounded repair
//! - `embeddings`: batched HTTP embedder with dimension enforcement
//! - `reranker`: HTTP reranker + lexical-overlap fallback
//! - `factory`: construction and per-model client caching

pub mod claude;
pub mod embeddings;
pub mod factory;
pub mod openai;
pub mod reranker;
pub mod structured;

pub use claude::{ClaudeBackend, ClaudeConfig};
pub use embeddings::{HttpEmbedder, HttpEmbedderConfig};
pub use factory::ProviderFactory;
pub use openai::{OpenAiBackend, OpenAiConfig};
pub use reranker::{HttpReranker, HttpRerankerConfig, LexicalScorer};
pub use structured::{extract_json, structured_via_chat};
