//! Key-value store interfaces and implementations.
//!
//! The relay keeps all room state in a string key-value store with per-key
//! expiry. The [`KvStore`] trait is the only surface the signaling layer
//! touches, so any backend with `get` and `set`-with-TTL semantics can sit
//! behind the relay. [`MemoryStore`] is the bundled in-process backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;

/// String key-value store with per-key time-to-live.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Retrieve the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value and
    /// restarting the expiry window at `ttl` from now.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory key-value store with lazy expiry.
///
/// Expired entries are dropped when read; [`MemoryStore::purge_expired`]
/// exists for a periodic sweep so abandoned rooms do not accumulate.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of entries currently held, including not-yet-purged expired ones.
    pub async fn len(&self) -> usize {
        self.data.lock().await.len()
    }

    /// Remove every expired entry, returning how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut data = self.data.lock().await;
        let before = data.len();
        data.retain(|_, entry| entry.expires_at > now);
        before - data.len()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut data = self.data.lock().await;
        match data.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                Ok(Some(entry.value.clone()))
            }
            Some(_) => {
                data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.data.lock().await.insert(key.to_string(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = MemoryStore::new();
        store.set("room:X:offer", "sdp-offer", TTL).await.unwrap();

        let value = store.get("room:X:offer").await.unwrap();
        assert_eq!(value.as_deref(), Some("sdp-offer"));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let store = MemoryStore::new();
        store.set("k", "v", TTL).await.unwrap();

        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_restarts_expiry_window() {
        let store = MemoryStore::new();
        store.set("k", "v1", TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(200)).await;
        store.set("k", "v2", TTL).await.unwrap();

        // 200s into the original window plus 250s is past the first
        // deadline but inside the refreshed one.
        tokio::time::advance(Duration::from_secs(250)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        store.set("old", "v", Duration::from_secs(10)).await.unwrap();
        store.set("fresh", "v", TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        let dropped = store.purge_expired().await;

        assert_eq!(dropped, 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("fresh").await.unwrap().as_deref(), Some("v"));
    }
}
