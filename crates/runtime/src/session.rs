//! Short-term session store
//!
//! Rolling buffer of recent (user, assistant) pairs per end user, kept as
//! JSON in the KV cache with a TTL. Consecutive identical turns are
//! dropped before persisting. The buffer feeds the read runtime's
//! summarise node and, when enabled, extraction context.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use engram_config::constants::session as session_constants;
use engram_core::{Clock, KvCache, Result};

/// One stored exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTurn {
    pub user: String,
    pub assistant: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl: Duration,
    pub max_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(session_constants::DEFAULT_TTL_SECS),
            max_turns: session_constants::DEFAULT_MAX_TURNS,
        }
    }
}

pub struct SessionStore {
    kv: Arc<dyn KvCache>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvCache>, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        Self { kv, clock, config }
    }

    pub async fn history(&self, end_user_id: &str) -> Result<Vec<SessionTurn>> {
        let key = session_constants::key(end_user_id);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(turns) => Ok(turns),
            Err(e) => {
                warn!(end_user_id, error = %e, "corrupt session buffer, resetting");
                Ok(Vec::new())
            }
        }
    }

    /// Append one exchange, dropping it when identical to the previous one
    pub async fn append(&self, end_user_id: &str, user: &str, assistant: &str) -> Result<()> {
        let mut turns = self.history(end_user_id).await?;

        if let Some(last) = turns.last() {
            if last.user == user && last.assistant == assistant {
                return Ok(());
            }
        }

        turns.push(SessionTurn {
            user: user.to_string(),
            assistant: assistant.to_string(),
            timestamp: self.clock.now(),
        });
        if turns.len() > self.config.max_turns {
            let excess = turns.len() - self.config.max_turns;
            turns.drain(..excess);
        }

        let key = session_constants::key(end_user_id);
        let raw = serde_json::to_string(&turns)
            .map_err(|e| engram_core::MemoryError::permanent("session", e.to_string()))?;
        self.kv.set(&key, &raw, Some(self.config.ttl)).await
    }

    pub async fn clear(&self, end_user_id: &str) -> Result<()> {
        self.kv.del(&session_constants::key(end_user_id)).await
    }

    /// Render history for a prompt, oldest first
    pub fn render(turns: &[SessionTurn]) -> String {
        turns
            .iter()
            .map(|t| format!("user: {}\nassistant: {}", t.user, t.assistant))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::{InMemoryKvCache, SystemClock};

    fn store() -> SessionStore {
        SessionStore::new(
            Arc::new(InMemoryKvCache::new()),
            Arc::new(SystemClock),
            SessionConfig {
                max_turns: 3,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_append_and_history_round_trip() {
        let store = store();
        store.append("u1", "hi", "hello").await.unwrap();
        store.append("u1", "how are you", "fine").await.unwrap();

        let turns = store.history("u1").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].user, "hi");
        assert!(SessionStore::render(&turns).contains("assistant: fine"));
    }

    #[tokio::test]
    async fn test_consecutive_duplicates_dropped() {
        let store = store();
        store.append("u1", "hi", "hello").await.unwrap();
        store.append("u1", "hi", "hello").await.unwrap();
        assert_eq!(store.history("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_buffer_bounded_by_max_turns() {
        let store = store();
        for i in 0..5 {
            store
                .append("u1", &format!("q{i}"), &format!("a{i}"))
                .await
                .unwrap();
        }
        let turns = store.history("u1").await.unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].user, "q2");
    }

    #[tokio::test]
    async fn test_sessions_are_per_user() {
        let store = store();
        store.append("u1", "hi", "hello").await.unwrap();
        assert!(store.history("u2").await.unwrap().is_empty());

        store.clear("u1").await.unwrap();
        assert!(store.history("u1").await.unwrap().is_empty());
    }
}
