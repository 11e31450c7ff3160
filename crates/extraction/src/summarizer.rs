//! Episodic summarisation
//!
//! One `MemorySummary` per surviving chunk: a single structured call
//! returns summary text, title and `memory_type`. A failed call is not
//! fatal; the chunk simply contributes no summary.

use std::sync::Arc;

use tracing::warn;

use engram_config::constants::summary as summary_constants;
use engram_config::Language;
use engram_core::{ChatMessage, LanguageModel, MemoryType, Result, RetryPolicy};

use crate::preprocess::PreparedChunk;
use crate::prompts;
use crate::schema::{self, SummaryResponse};

/// Summary draft before node construction
#[derive(Debug, Clone)]
pub struct DraftSummary {
    pub chunk_index: usize,
    pub title: String,
    pub content: String,
    pub memory_type: MemoryType,
}

pub struct Summarizer {
    llm: Arc<dyn LanguageModel>,
    language: Language,
    retry: RetryPolicy,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LanguageModel>, language: Language) -> Self {
        Self {
            llm,
            language,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn empty_title(&self) -> &'static str {
        match self.language {
            Language::Zh => summary_constants::EMPTY_TITLE_ZH,
            Language::En => summary_constants::EMPTY_TITLE_EN,
        }
    }

    /// Summarise one chunk; `None` when the provider fails
    pub async fn summarize_chunk(&self, chunk: &PreparedChunk) -> Option<DraftSummary> {
        match self.try_summarize(chunk).await {
            Ok(draft) => Some(draft),
            Err(e) => {
                warn!(
                    chunk_index = chunk.sequence_index,
                    error = %e,
                    "chunk summarisation failed, continuing without a summary"
                );
                None
            }
        }
    }

    async fn try_summarize(&self, chunk: &PreparedChunk) -> Result<DraftSummary> {
        let messages = [
            ChatMessage::system(prompts::summary_system_prompt(self.language)),
            ChatMessage::user(format!(
                "{speaker} said:\n{text}",
                speaker = chunk.speaker.as_str(),
                text = chunk.text
            )),
        ];

        let schema = schema::summary_schema();
        let value = self
            .retry
            .run("summarizer", || {
                self.llm.chat_structured(&messages, &schema)
            })
            .await?;
        let response: SummaryResponse = serde_json::from_value(value).map_err(|e| {
            engram_core::MemoryError::permanent("summarizer", format!("malformed response: {e}"))
        })?;

        let content = clamp_words(response.summary.trim(), summary_constants::MAX_WORDS);
        let title = if content.is_empty() || response.title.trim().is_empty() {
            self.empty_title().to_string()
        } else {
            response.title.trim().to_string()
        };

        Ok(DraftSummary {
            chunk_index: chunk.sequence_index,
            title,
            content,
            memory_type: response.memory_type,
        })
    }

    /// Consolidation summary for the forgetting engine: statement text plus
    /// the entity's accumulated fact summary collapse into one episodic
    /// record.
    pub async fn consolidate(
        &self,
        statement_text: &str,
        entity_name: &str,
        entity_fact_summary: &str,
    ) -> Result<DraftSummary> {
        let messages = [
            ChatMessage::system(prompts::consolidation_system_prompt(self.language)),
            ChatMessage::user(format!(
                "Statement: {statement_text}\nEntity: {entity_name}\nKnown about the entity: {entity_fact_summary}"
            )),
        ];

        let schema = schema::summary_schema();
        let value = self
            .retry
            .run("summarizer", || {
                self.llm.chat_structured(&messages, &schema)
            })
            .await?;
        let response: SummaryResponse = serde_json::from_value(value).map_err(|e| {
            engram_core::MemoryError::permanent("summarizer", format!("malformed response: {e}"))
        })?;

        let content = clamp_words(response.summary.trim(), summary_constants::MAX_WORDS);
        let fallback = format!("{statement_text}；{entity_name}");
        Ok(DraftSummary {
            chunk_index: 0,
            title: if response.title.trim().is_empty() {
                self.empty_title().to_string()
            } else {
                response.title.trim().to_string()
            },
            content: if content.is_empty() { fallback } else { content },
            memory_type: response.memory_type,
        })
    }
}

fn clamp_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        text.to_string()
    } else {
        words[..max_words].join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::testing::MockLlm;
    use engram_core::Role;
    use serde_json::json;

    fn chunk(text: &str) -> PreparedChunk {
        PreparedChunk {
            speaker: Role::User,
            text: text.into(),
            sequence_index: 3,
        }
    }

    #[tokio::test]
    async fn test_summarize_chunk_happy_path() {
        let llm = MockLlm::new();
        llm.push_structured(json!({
            "title": "Job talk",
            "summary": "Alice described her new role at Acme.",
            "memory_type": "conversation"
        }));
        let summarizer = Summarizer::new(Arc::new(llm), Language::En);

        let draft = summarizer
            .summarize_chunk(&chunk("I just started at Acme"))
            .await
            .unwrap();
        assert_eq!(draft.chunk_index, 3);
        assert_eq!(draft.title, "Job talk");
        assert_eq!(draft.memory_type, MemoryType::Conversation);
    }

    #[tokio::test]
    async fn test_empty_summary_gets_language_default_title() {
        let llm = MockLlm::new();
        llm.push_structured(json!({
            "title": "",
            "summary": "",
            "memory_type": "conversation"
        }));
        let summarizer = Summarizer::new(Arc::new(llm), Language::Zh);

        let draft = summarizer.summarize_chunk(&chunk("……")).await.unwrap();
        assert_eq!(draft.title, "空内容");

        let llm = MockLlm::new();
        llm.push_structured(json!({
            "title": "",
            "summary": "",
            "memory_type": "conversation"
        }));
        let summarizer = Summarizer::new(Arc::new(llm), Language::En);
        let draft = summarizer.summarize_chunk(&chunk("...")).await.unwrap();
        assert_eq!(draft.title, "Empty Content");
    }

    #[tokio::test]
    async fn test_failure_is_not_fatal() {
        // No canned responses queued: every structured call fails.
        let llm = MockLlm::new();
        let summarizer =
            Summarizer::new(Arc::new(llm), Language::En).with_retry(RetryPolicy {
                max_retries: 0,
                ..Default::default()
            });

        assert!(summarizer.summarize_chunk(&chunk("text")).await.is_none());
    }

    #[tokio::test]
    async fn test_overlong_summary_clamped_to_word_budget() {
        let long_summary = vec!["word"; 300].join(" ");
        let llm = MockLlm::new();
        llm.push_structured(json!({
            "title": "Long",
            "summary": long_summary,
            "memory_type": "learning"
        }));
        let summarizer = Summarizer::new(Arc::new(llm), Language::En);

        let draft = summarizer.summarize_chunk(&chunk("lots of text")).await.unwrap();
        assert_eq!(draft.content.split_whitespace().count(), 200);
    }
}
