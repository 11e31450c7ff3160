//! Retrieval over the memory graph
//!
//! Keyword (escaped full-text), embedding (cosine), hybrid (parallel union
//! with weighted fusion and optional reranking) and temporal (range scan)
//! search, always tenant-scoped.

pub mod escape;
pub mod retriever;

pub use escape::escape_query;
pub use retriever::{Retriever, RetrieverConfig, SearchRequest};
