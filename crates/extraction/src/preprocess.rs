//! Dialogue preprocessing
//!
//! Normalises roles, cleans message text, drops empty and duplicate
//! messages, optionally applies semantic pruning, and cuts the dialogue
//! into one chunk per message (sub-chunking oversize messages through the
//! configured chunker). Producing zero non-trivial chunks fails the write.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use engram_config::MemoryConfig;
use engram_core::{
    Chunker, DialoguePayload, MemoryError, Result, Role,
};

use crate::pruning::SemanticPruner;

/// A cleaned message ready for chunking
#[derive(Debug, Clone, PartialEq)]
pub struct CleanMessage {
    pub role: Role,
    pub text: String,
}

/// One preprocessed chunk: a speaker turn or sub-turn
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedChunk {
    pub speaker: Role,
    pub text: String,
    pub sequence_index: usize,
}

/// Output of the preprocessor, input to extraction and summarisation
#[derive(Debug, Clone)]
pub struct PreparedDialogue {
    pub ref_id: String,
    /// Cleaned transcript, one `role: text` line per message
    pub transcript: String,
    pub chunks: Vec<PreparedChunk>,
}

static ROLE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:user|assistant|human|ai|bot|system|用户|助手)\s*[:：]\s*").unwrap());
static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s]+").unwrap());
static BANGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"!{3,}|！{3,}").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Clean one raw message: strip role prefixes and URLs, normalise repeated
/// exclamations to a full stop, normalise the half-width comma between CJK
/// text, collapse whitespace.
pub fn clean_text(raw: &str) -> String {
    let mut text = ROLE_PREFIX
        .replace(raw.trim(), "")
        .to_string();
    text = URL.replace_all(&text, "").to_string();
    text = BANGS.replace_all(&text, "。").to_string();
    if contains_cjk(&text) {
        text = text.replace(',', "，");
    }
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

fn contains_cjk(text: &str) -> bool {
    text.chars()
        .any(|c| matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}'))
}

pub struct Preprocessor<'a> {
    config: &'a MemoryConfig,
    chunker: &'a dyn Chunker,
    pruner: SemanticPruner,
}

impl<'a> Preprocessor<'a> {
    pub fn new(config: &'a MemoryConfig, chunker: &'a dyn Chunker) -> Self {
        Self {
            config,
            chunker,
            pruner: SemanticPruner::new(config.pruning.clone()),
        }
    }

    pub async fn prepare(&self, payload: &DialoguePayload) -> Result<PreparedDialogue> {
        if payload.messages.is_empty() {
            return Err(MemoryError::validation("dialogue has no messages"));
        }

        // Normalise, clean, drop empties and adjacent exact duplicates.
        let mut cleaned: Vec<CleanMessage> = Vec::with_capacity(payload.messages.len());
        for message in &payload.messages {
            let role = Role::normalize(&message.role);
            let text = clean_text(&message.msg);
            if text.is_empty() {
                continue;
            }
            if let Some(last) = cleaned.last() {
                if last.role == role && last.text == text {
                    continue;
                }
            }
            cleaned.push(CleanMessage { role, text });
        }

        // Optional semantic pruning per scene.
        let kept: Vec<CleanMessage> = if self.config.pruning.pruning_switch {
            cleaned
                .into_iter()
                .filter(|m| self.pruner.keep(&m.text))
                .collect()
        } else {
            cleaned
        };

        // One chunk per message; oversize messages are sub-chunked and
        // inherit the speaker.
        let mut chunks: Vec<PreparedChunk> = Vec::new();
        for message in &kept {
            if message.text.chars().count() > self.config.chunk_size {
                let sub_chunks = self.chunker.chunk(&message.text).await?;
                for sub in sub_chunks {
                    if sub.text.chars().count() >= self.config.min_characters_per_chunk {
                        chunks.push(PreparedChunk {
                            speaker: message.role,
                            text: sub.text,
                            sequence_index: chunks.len(),
                        });
                    }
                }
            } else {
                chunks.push(PreparedChunk {
                    speaker: message.role,
                    text: message.text.clone(),
                    sequence_index: chunks.len(),
                });
            }
        }

        if chunks.is_empty() {
            return Err(MemoryError::validation(
                "no non-trivial chunks remain after cleaning",
            ));
        }

        let transcript = kept
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.text))
            .collect::<Vec<_>>()
            .join("\n");

        debug!(
            ref_id = %payload.ref_id,
            messages_in = payload.messages.len(),
            messages_kept = kept.len(),
            chunks = chunks.len(),
            "dialogue prepared"
        );

        Ok(PreparedDialogue {
            ref_id: payload.ref_id.clone(),
            transcript,
            chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::RecursiveChunker;
    use engram_core::DialogueMessage;

    fn payload(messages: &[(&str, &str)]) -> DialoguePayload {
        DialoguePayload {
            ref_id: "r1".into(),
            messages: messages
                .iter()
                .map(|(role, msg)| DialogueMessage {
                    role: (*role).to_string(),
                    msg: (*msg).to_string(),
                })
                .collect(),
        }
    }

    fn chunker() -> RecursiveChunker {
        RecursiveChunker::new(1024, 1)
    }

    #[test]
    fn test_clean_text_strips_role_prefix_and_urls() {
        assert_eq!(clean_text("user: hello there"), "hello there");
        assert_eq!(clean_text("用户：你好"), "你好");
        let cleaned = clean_text("see https://example.com/docs for more");
        assert!(!cleaned.contains("example.com"));
        assert_eq!(cleaned, "see for more");
    }

    #[test]
    fn test_clean_text_normalises_punctuation() {
        assert_eq!(clean_text("太好了!!!"), "太好了。");
        assert_eq!(clean_text("苹果,香蕉"), "苹果，香蕉");
        // Half-width comma stays in plain latin text
        assert_eq!(clean_text("apples, bananas"), "apples, bananas");
    }

    #[tokio::test]
    async fn test_prepare_drops_adjacent_duplicates() {
        let config = MemoryConfig::default();
        let chunker = chunker();
        let pre = Preprocessor::new(&config, &chunker);

        let prepared = pre
            .prepare(&payload(&[
                ("user", "hello"),
                ("user", "hello"),
                ("assistant", "hi, how can I help?"),
            ]))
            .await
            .unwrap();

        assert_eq!(prepared.chunks.len(), 2);
        assert_eq!(prepared.chunks[0].text, "hello");
        assert_eq!(prepared.chunks[1].speaker, Role::Assistant);
    }

    #[tokio::test]
    async fn test_prepare_fails_on_empty_dialogue() {
        let config = MemoryConfig::default();
        let chunker = chunker();
        let pre = Preprocessor::new(&config, &chunker);

        let err = pre.prepare(&payload(&[])).await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));

        let err = pre
            .prepare(&payload(&[("user", "   "), ("user", "http://only.a.url")]))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_prepare_subchunks_oversize_messages() {
        let mut config = MemoryConfig::default();
        config.chunk_size = 40;
        config.min_characters_per_chunk = 1;
        let chunker = RecursiveChunker::new(40, 1);
        let pre = Preprocessor::new(&config, &chunker);

        let long = "This is the first sentence. This is the second sentence. \
                    This is the third sentence.";
        let prepared = pre.prepare(&payload(&[("user", long)])).await.unwrap();

        assert!(prepared.chunks.len() > 1);
        for chunk in &prepared.chunks {
            assert_eq!(chunk.speaker, Role::User);
        }
        let indices: Vec<usize> = prepared.chunks.iter().map(|c| c.sequence_index).collect();
        let expected: Vec<usize> = (0..prepared.chunks.len()).collect();
        assert_eq!(indices, expected);
    }

    #[tokio::test]
    async fn test_prepare_unknown_role_defaults_to_user() {
        let config = MemoryConfig::default();
        let chunker = chunker();
        let pre = Preprocessor::new(&config, &chunker);

        let prepared = pre
            .prepare(&payload(&[("narrator", "once upon a time")]))
            .await
            .unwrap();
        assert_eq!(prepared.chunks[0].speaker, Role::User);
    }
}
