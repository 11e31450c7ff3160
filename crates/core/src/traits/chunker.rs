//! Text chunking port

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A sub-chunk produced by splitting an oversize message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    /// Position within the source text
    pub index: usize,
}

/// Splits oversize message text into sub-chunks. Implementations honour
/// `chunk_size` (target characters per chunk) and
/// `min_characters_per_chunk` from the memory config.
#[async_trait]
pub trait Chunker: Send + Sync {
    async fn chunk(&self, text: &str) -> Result<Vec<TextChunk>>;
}
