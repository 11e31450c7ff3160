//! Anthropic Messages API backend
//!
//! Uses the native system-prompt field and text content blocks. Structured
//! mode goes through the shared schema-validation layer.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use engram_config::constants::timeouts;
use engram_core::{ChatMessage, LanguageModel, MemoryError, Result};

use crate::openai::{classify_status, split_system};
use crate::structured::structured_via_chat;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Configuration for the Claude backend
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout: Duration,
    /// Override for proxies and tests
    pub endpoint: String,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            timeout: Duration::from_secs(timeouts::LLM_SECS),
            endpoint: "https://api.anthropic.com".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

pub struct ClaudeBackend {
    client: Client,
    config: ClaudeConfig,
}

impl ClaudeBackend {
    pub fn new(config: ClaudeConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(MemoryError::permanent("llm", "missing Anthropic API key"));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MemoryError::permanent("llm", format!("client build failed: {e}")))?;
        Ok(Self { client, config })
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let (system, rest) = split_system(messages);
        let wire: Vec<WireMessage> = rest
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system,
            messages: wire,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.endpoint))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    MemoryError::transient("llm", e.to_string())
                } else {
                    MemoryError::permanent("llm", e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::permanent("llm", format!("malformed response: {e}")))?;
        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect::<String>();
        if text.is_empty() {
            return Err(MemoryError::permanent("llm", "empty completion"));
        }
        Ok(text)
    }
}

#[async_trait]
impl LanguageModel for ClaudeBackend {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        self.complete(messages).await
    }

    async fn chat_structured(&self, messages: &[ChatMessage], schema: &Value) -> Result<Value> {
        structured_via_chat("llm", messages, schema, |conversation| async move {
            self.complete(&conversation).await
        })
        .await
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_rejected() {
        let config = ClaudeConfig {
            api_key: String::new(),
            ..Default::default()
        };
        assert!(ClaudeBackend::new(config).is_err());
    }

    #[test]
    fn test_request_puts_system_in_own_field() {
        let request = MessagesRequest {
            model: "claude-sonnet-4-20250514",
            max_tokens: 100,
            temperature: 0.0,
            system: "be terse".to_string(),
            messages: vec![WireMessage {
                role: "user",
                content: "hi",
            }],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["system"], "be terse");
        assert_eq!(value["messages"][0]["role"], "user");
    }
}
