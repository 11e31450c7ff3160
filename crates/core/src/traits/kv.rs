//! KV cache port

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// String-to-string cache with TTLs. Backs the session store, the
/// perceptual suggestion caches and the distributed forgetting lock.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set with optional expiry; `None` means no expiry
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Remaining time-to-live, `None` when the key is absent or unexpiring
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Set-if-absent with expiry; returns true when the lock was acquired.
    /// Used as a named lock when the forgetting scheduler runs on more than
    /// one process.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
}

/// Process-local cache for embedded deployments and tests
#[derive(Default)]
pub struct InMemoryKvCache {
    entries: std::sync::Mutex<std::collections::HashMap<String, Entry>>,
}

struct Entry {
    value: String,
    expires_at: Option<std::time::Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at
            .map_or(false, |at| std::time::Instant::now() >= at)
    }
}

impl InMemoryKvCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvCache for InMemoryKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| std::time::Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).filter(|e| !e.expired()).and_then(|e| {
            e.expires_at
                .map(|at| at.saturating_duration_since(std::time::Instant::now()))
        }))
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if !entry.expired() => Ok(false),
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        expires_at: Some(std::time::Instant::now() + ttl),
                    },
                );
                Ok(true)
            }
        }
    }
}
