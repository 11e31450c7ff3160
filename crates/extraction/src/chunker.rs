//! Chunker implementations
//!
//! Splits oversize message text into sub-chunks. `RecursiveChunker` tries
//! paragraph boundaries, then sentences, then hard character splits;
//! `SentenceChunker` packs whole sentences; `LlmChunker` asks the model for
//! topic boundaries and falls back to recursive splitting when the call
//! fails.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

use engram_config::{ChunkerStrategy, MemoryConfig};
use engram_core::{ChatMessage, Chunker, LanguageModel, Result, TextChunk};

/// Greedy sentence packing shared by the splitting strategies
fn pack_sentences(sentences: &[&str], chunk_size: usize, min_chars: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        let candidate_len = current.chars().count() + sentence.chars().count() + 1;
        if !current.is_empty() && candidate_len > chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    // Fold a trailing runt into its predecessor.
    if chunks.len() > 1 {
        if let Some(last) = chunks.last() {
            if last.chars().count() < min_chars {
                let runt = chunks.pop().unwrap();
                if let Some(prev) = chunks.last_mut() {
                    prev.push(' ');
                    prev.push_str(&runt);
                }
            }
        }
    }
    chunks
}

/// Hard split for text without usable boundaries
fn hard_split(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size.max(1))
        .map(|c| c.iter().collect::<String>())
        .collect()
}

/// Paragraphs → sentences → hard split
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    min_characters_per_chunk: usize,
}

impl RecursiveChunker {
    pub fn new(chunk_size: usize, min_characters_per_chunk: usize) -> Self {
        Self {
            chunk_size,
            min_characters_per_chunk,
        }
    }

    fn split(&self, text: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for paragraph in text.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }
            if paragraph.chars().count() <= self.chunk_size {
                out.push(paragraph.to_string());
                continue;
            }
            let sentences: Vec<&str> = paragraph.unicode_sentences().collect();
            for piece in pack_sentences(&sentences, self.chunk_size, self.min_characters_per_chunk)
            {
                if piece.chars().count() <= self.chunk_size {
                    out.push(piece);
                } else {
                    out.extend(hard_split(&piece, self.chunk_size));
                }
            }
        }
        out
    }
}

#[async_trait]
impl Chunker for RecursiveChunker {
    async fn chunk(&self, text: &str) -> Result<Vec<TextChunk>> {
        Ok(self
            .split(text)
            .into_iter()
            .enumerate()
            .map(|(index, text)| TextChunk { text, index })
            .collect())
    }
}

/// Whole-sentence packing without the paragraph pass
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    chunk_size: usize,
    min_characters_per_chunk: usize,
}

impl SentenceChunker {
    pub fn new(chunk_size: usize, min_characters_per_chunk: usize) -> Self {
        Self {
            chunk_size,
            min_characters_per_chunk,
        }
    }
}

#[async_trait]
impl Chunker for SentenceChunker {
    async fn chunk(&self, text: &str) -> Result<Vec<TextChunk>> {
        let sentences: Vec<&str> = text.unicode_sentences().collect();
        Ok(
            pack_sentences(&sentences, self.chunk_size, self.min_characters_per_chunk)
                .into_iter()
                .enumerate()
                .map(|(index, text)| TextChunk { text, index })
                .collect(),
        )
    }
}

/// Model-guided topic splitting with recursive fallback
pub struct LlmChunker {
    llm: Arc<dyn LanguageModel>,
    fallback: RecursiveChunker,
}

impl LlmChunker {
    pub fn new(llm: Arc<dyn LanguageModel>, chunk_size: usize, min_chars: usize) -> Self {
        Self {
            llm,
            fallback: RecursiveChunker::new(chunk_size, min_chars),
        }
    }
}

#[async_trait]
impl Chunker for LlmChunker {
    async fn chunk(&self, text: &str) -> Result<Vec<TextChunk>> {
        let schema = json!({
            "type": "object",
            "properties": {
                "chunks": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 1
                }
            },
            "required": ["chunks"]
        });
        let messages = [
            ChatMessage::system(
                "Split the given text into coherent topic chunks. Return every \
                 character of the input exactly once, in order, as a JSON object \
                 {\"chunks\": [...]}.",
            ),
            ChatMessage::user(text.to_string()),
        ];

        match self.llm.chat_structured(&messages, &schema).await {
            Ok(value) => {
                let chunks: Vec<String> = value
                    .get("chunks")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default();
                if chunks.is_empty() {
                    return self.fallback.chunk(text).await;
                }
                Ok(chunks
                    .into_iter()
                    .enumerate()
                    .map(|(index, text)| TextChunk { text, index })
                    .collect())
            }
            Err(e) => {
                warn!(error = %e, "llm chunker failed, falling back to recursive");
                self.fallback.chunk(text).await
            }
        }
    }
}

/// Build the chunker selected by the config generation
pub fn chunker_for(
    config: &MemoryConfig,
    llm: Option<Arc<dyn LanguageModel>>,
) -> Box<dyn Chunker> {
    match (config.chunker_strategy, llm) {
        (ChunkerStrategy::Llm, Some(llm)) => Box::new(LlmChunker::new(
            llm,
            config.chunk_size,
            config.min_characters_per_chunk,
        )),
        (ChunkerStrategy::Semantic, _) => Box::new(SentenceChunker::new(
            config.chunk_size,
            config.min_characters_per_chunk,
        )),
        _ => Box::new(RecursiveChunker::new(
            config.chunk_size,
            config.min_characters_per_chunk,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_short_text_is_one_chunk() {
        let chunker = RecursiveChunker::new(100, 5);
        let chunks = chunker.chunk("A short message.").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "A short message.");
    }

    #[tokio::test]
    async fn test_recursive_respects_chunk_size() {
        let chunker = RecursiveChunker::new(50, 5);
        let text = "First sentence here. Second sentence here. Third sentence here. \
                    Fourth sentence here.";
        let chunks = chunker.chunk(text).await.unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 60);
        }
    }

    #[tokio::test]
    async fn test_paragraph_boundaries_preferred() {
        let chunker = RecursiveChunker::new(60, 5);
        let text = "First paragraph content.\n\nSecond paragraph content.";
        let chunks = chunker.chunk(text).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "First paragraph content.");
    }

    #[tokio::test]
    async fn test_hard_split_for_unbroken_text() {
        let chunker = RecursiveChunker::new(10, 1);
        let text = "a".repeat(35);
        let chunks = chunker.chunk(&text).await.unwrap();
        assert_eq!(chunks.len(), 4);
        let total: usize = chunks.iter().map(|c| c.text.chars().count()).sum();
        assert_eq!(total, 35);
    }

    #[tokio::test]
    async fn test_runt_tail_folded_into_predecessor() {
        let chunker = SentenceChunker::new(40, 10);
        let text = "A fairly long opening sentence sits here. Tiny end.";
        let chunks = chunker.chunk(text).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Tiny end."));
    }
}
