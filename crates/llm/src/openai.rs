//! OpenAI-compatible chat backend
//!
//! Talks to any endpoint speaking the `/chat/completions` protocol
//! (OpenAI, Ollama, vLLM, …). Structured mode requests JSON output and
//! validates it through the shared structured layer.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use engram_config::constants::timeouts;
use engram_core::{ChatMessage, LanguageModel, MemoryError, Result, Role};

use crate::structured::structured_via_chat;

/// Configuration for an OpenAI-compatible backend
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL up to and including `/v1`
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1".to_string(),
            model: "qwen2.5:14b".to_string(),
            api_key: String::new(),
            max_tokens: 2048,
            temperature: 0.2,
            timeout: Duration::from_secs(timeouts::LLM_SECS),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct OpenAiBackend {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MemoryError::permanent("llm", format!("client build failed: {e}")))?;
        Ok(Self { client, config })
    }

    async fn complete(&self, messages: &[ChatMessage], json_mode: bool) -> Result<String> {
        let wire: Vec<WireMessage> = messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();
        let request = ChatRequest {
            model: &self.config.model,
            messages: wire,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            response_format: json_mode.then(|| serde_json::json!({"type": "json_object"})),
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.config.endpoint))
            .json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder.send().await.map_err(|e| {
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

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::permanent("llm", format!("malformed response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| MemoryError::permanent("llm", "empty completion"))
    }
}

/// HTTP status → error taxonomy
pub(crate) fn classify_status(status: u16, body: &str) -> MemoryError {
    match status {
        429 | 500 | 502 | 503 | 504 => {
            MemoryError::transient("llm", format!("status {status}: {body}"))
        }
        _ => MemoryError::permanent("llm", format!("status {status}: {body}")),
    }
}

#[async_trait]
impl LanguageModel for OpenAiBackend {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        self.complete(messages, false).await
    }

    async fn chat_structured(&self, messages: &[ChatMessage], schema: &Value) -> Result<Value> {
        structured_via_chat("llm", messages, schema, |conversation| async move {
            self.complete(&conversation, true).await
        })
        .await
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }
}

/// Render a message sequence for providers that want one system string
pub fn split_system(messages: &[ChatMessage]) -> (String, Vec<&ChatMessage>) {
    let system = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let rest = messages.iter().filter(|m| m.role != Role::System).collect();
    (system, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(classify_status(429, "rate limited").is_transient());
        assert!(classify_status(503, "overloaded").is_transient());
        assert!(!classify_status(401, "bad key").is_transient());
        assert!(!classify_status(404, "no such model").is_transient());
    }

    #[test]
    fn test_split_system_collects_all_system_turns() {
        let messages = [
            ChatMessage::system("a"),
            ChatMessage::user("hi"),
            ChatMessage::system("b"),
        ];
        let (system, rest) = split_system(&messages);
        assert_eq!(system, "a\n\nb");
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_request_serialization_shape() {
        let request = ChatRequest {
            model: "m",
            messages: vec![WireMessage {
                role: "user",
                content: "hello",
            }],
            max_tokens: 10,
            temperature: 0.0,
            response_format: Some(serde_json::json!({"type": "json_object"})),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["response_format"]["type"], "json_object");
    }
}
