//! Embedding port

use async_trait::async_trait;

use crate::error::Result;

/// Dense embedding capability. Dimension is fixed per provider; vectors are
/// stored verbatim in the graph. Failures are fatal to the enclosing write.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Deterministic output dimension
    fn dimension(&self) -> usize;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_many(std::slice::from_ref(&text.to_string())).await?;
        vectors.pop().ok_or_else(|| {
            crate::error::MemoryError::permanent("embedder", "empty batch response")
        })
    }
}
