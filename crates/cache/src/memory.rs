use std::{collections::HashMap, time::Duration};

use {
    async_trait::async_trait,
    tokio::{sync::Mutex, time::Instant},
};

use crate::{Cache, Result};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process cache with lazy TTL expiry.
///
/// Single-node stand-in for the shared cache: set-if-absent is atomic under
/// the map mutex, which is all the creation-lock and dedup paths need.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn expiry(ttl: Option<Duration>) -> Option<Instant> {
        ttl.map(|ttl| Instant::now() + ttl)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Self::expiry(ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(key)
            && existing.is_live(now)
        {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Self::expiry(ttl),
            },
        );
        Ok(true)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get() {
        let cache = MemoryCache::new();
        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let cache = MemoryCache::new();
        assert!(cache.get("nope").await.unwrap().is_none());
        assert!(!cache.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn del_removes_value() {
        let cache = MemoryCache::new();
        cache.set("k", "v", None).await.unwrap();
        cache.del("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expires_value() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(cache.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!cache.exists("k").await.unwrap());
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_if_absent_wins_once() {
        let cache = MemoryCache::new();
        assert!(cache.set_if_absent("k", "a", None).await.unwrap());
        assert!(!cache.set_if_absent("k", "b", None).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_succeeds_after_expiry() {
        let cache = MemoryCache::new();
        assert!(
            cache
                .set_if_absent("k", "a", Some(Duration::from_secs(5)))
                .await
                .unwrap()
        );
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(
            cache
                .set_if_absent("k", "b", Some(Duration::from_secs(5)))
                .await
                .unwrap()
        );
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("b"));
    }
}
