//! HTTP embedder
//!
//! Speaks the Ollama-style `/api/embed` batch protocol. The configured
//! dimension is enforced on every response; a mismatch is a permanent
//! failure (a wrong model id, not a flaky call).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use engram_config::constants::timeouts;
use engram_core::{Embedder, MemoryError, Result};

#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    pub endpoint: String,
    pub model: String,
    pub dimension: usize,
    pub timeout: Duration,
}

impl Default for HttpEmbedderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen3-embedding:0.6b".to_string(),
            dimension: 1024,
            timeout: Duration::from_secs(timeouts::EMBEDDER_SECS),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct HttpEmbedder {
    client: Client,
    config: HttpEmbedderConfig,
}

impl HttpEmbedder {
    pub fn new(config: HttpEmbedderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MemoryError::permanent("embedder", format!("client build failed: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/api/embed", self.config.endpoint))
            .json(&EmbedRequest {
                model: &self.config.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    MemoryError::transient("embedder", e.to_string())
                } else {
                    MemoryError::permanent("embedder", e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 | 500 | 502 | 503 | 504 => {
                    MemoryError::transient("embedder", format!("status {status}: {body}"))
                }
                _ => MemoryError::permanent("embedder", format!("status {status}: {body}")),
            });
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::permanent("embedder", format!("malformed response: {e}")))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(MemoryError::permanent(
                "embedder",
                format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    parsed.embeddings.len()
                ),
            ));
        }
        for vector in &parsed.embeddings {
            if vector.len() != self.config.dimension {
                return Err(MemoryError::permanent(
                    "embedder",
                    format!(
                        "dimension mismatch: expected {}, got {}",
                        self.config.dimension,
                        vector.len()
                    ),
                ));
            }
        }
        Ok(parsed.embeddings)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
