//! Capability ports consumed by the engine
//!
//! Each port is a narrow async trait so subsystems can be wired with
//! production providers, embedded engines, or test doubles:
//!
//! - `LanguageModel`: chat + schema-conformant structured completion
//! - `Embedder`: batched dense embeddings, fixed dimension
//! - `Reranker`: cross-encoder reranking for hybrid retrieval
//! - `Chunker`: sub-chunking of oversize messages
//! - `GraphStore`: the labelled-property-graph contract
//! - `KvCache`: TTL'd string cache + named locks
//! - `Clock` (in `crate::time`): injectable time source

mod chunker;
mod embedder;
mod graph;
mod kv;
mod llm;
mod reranker;

pub use chunker::{Chunker, TextChunk};
pub use embedder::Embedder;
pub use graph::GraphStore;
pub use kv::{InMemoryKvCache, KvCache};
pub use llm::LanguageModel;
pub use reranker::{Reranker, RerankResult};
