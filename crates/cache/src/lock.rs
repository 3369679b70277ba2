use std::{sync::Arc, time::Duration};

use tracing::warn;

use crate::Cache;

/// Default TTL for creation locks. Bounds the blast radius of a crashed
/// lock holder.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);

/// Distributed mutual-exclusion primitive guarding first-contact
/// conversation creation.
///
/// Built on the cache's atomic set-if-absent. Release is explicit (no async
/// drop); callers must release on every exit path. A cache failure during
/// acquisition is reported as `true` — the caller proceeds fail-open rather
/// than deadlocking the relay on a cache outage.
pub struct CreationLock {
    cache: Arc<dyn Cache>,
    key: String,
    ttl: Duration,
}

impl CreationLock {
    pub fn new(cache: Arc<dyn Cache>, key: impl Into<String>) -> Self {
        Self {
            cache,
            key: key.into(),
            ttl: DEFAULT_LOCK_TTL,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Try to take the lock. `true` means held; `false` means a concurrent
    /// holder exists.
    pub async fn try_acquire(&self) -> bool {
        match self.cache.set_if_absent(&self.key, "1", Some(self.ttl)).await {
            Ok(won) => won,
            Err(e) => {
                warn!(key = %self.key, error = %e, "lock cache unavailable, proceeding without lock");
                true
            },
        }
    }

    /// Best-effort release. The TTL cleans up after us if this fails.
    pub async fn release(&self) {
        if let Err(e) = self.cache.del(&self.key).await {
            warn!(key = %self.key, error = %e, "failed to release creation lock");
        }
    }
}
