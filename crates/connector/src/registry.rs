use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock},
};

use {
    tokio::sync::Mutex,
    tracing::{info, warn},
};

use {courier_cache::Cache, courier_common::SessionKey, courier_store::ConnectionStore};

use crate::{
    client::ClientFactory,
    connector::Connector,
    error::Result,
    session_store::DurableSessionStore,
};

/// Everything a freshly constructed connector needs.
#[derive(Clone)]
pub struct ConnectorDeps {
    pub cache: Arc<dyn Cache>,
    pub connections: Arc<dyn ConnectionStore>,
    pub sessions: DurableSessionStore,
    pub factory: Arc<dyn ClientFactory>,
}

/// Process-wide map from session key to live connector.
///
/// Holds at most one connector per key. Forced replacement is serialized
/// per key: teardown of the old client strictly precedes the artifact
/// purge, which strictly precedes construction of the new client —
/// otherwise the new client could adopt a half-deleted credential set.
pub struct ConnectorRegistry {
    deps: ConnectorDeps,
    connectors: StdRwLock<HashMap<String, Arc<Connector>>>,
    /// Per-key serialization of acquire/replace sequences.
    acquire_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new(deps: ConnectorDeps) -> Self {
        Self {
            deps,
            connectors: StdRwLock::new(HashMap::new()),
            acquire_locks: StdMutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        let mut locks = self
            .acquire_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Current live connector, if any. Never constructs.
    #[must_use]
    pub fn get(&self, key: &SessionKey) -> Option<Arc<Connector>> {
        self.connectors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key.to_string())
            .cloned()
    }

    /// Get-or-create the connector for `key`.
    ///
    /// With `force_new` false this is idempotent reuse: an existing live
    /// connector is returned unchanged. With `force_new` true the old
    /// connector is torn down best-effort, its registry entry removed
    /// unconditionally, the durable artifacts purged, and a fresh connector
    /// constructed only after the purge settles.
    pub async fn acquire(&self, key: &SessionKey, force_new: bool) -> Result<Arc<Connector>> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        if !force_new
            && let Some(existing) = self.get(key)
        {
            return Ok(existing);
        }

        if let Some(existing) = self.remove_entry(key) {
            info!(session_key = %key, "replacing live connector");
            existing.disconnect().await;
        }

        if force_new
            && let Err(e) = self.deps.sessions.purge(key).await
        {
            // The new client may re-adopt stale credentials; surface loudly
            // but keep going so the key does not wedge.
            warn!(session_key = %key, error = %e, "artifact purge failed during forced replacement");
        }

        let connector = Connector::new(
            key.clone(),
            Arc::clone(&self.deps.cache),
            Arc::clone(&self.deps.connections),
            self.deps.sessions.clone(),
            Arc::clone(&self.deps.factory),
        );

        self.connectors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), Arc::clone(&connector));

        Ok(connector)
    }

    /// Tear down and forget the connector for `key`.
    ///
    /// The entry is removed even when the underlying teardown fails, so a
    /// zombie entry can never block future acquisition. Returns `true` if a
    /// live connector existed.
    pub async fn disconnect(&self, key: &SessionKey) -> bool {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let Some(connector) = self.remove_entry(key) else {
            return false;
        };

        connector.disconnect().await;
        if let Err(e) = self.deps.sessions.purge(key).await {
            warn!(session_key = %key, error = %e, "artifact purge failed during disconnect");
        }
        true
    }

    /// Tear down every live connector without unpairing: artifacts and
    /// connection records survive for reconnection after restart.
    pub async fn shutdown_all(&self) {
        let connectors: Vec<Arc<Connector>> = {
            let mut map = self.connectors.write().unwrap_or_else(|e| e.into_inner());
            map.drain().map(|(_, c)| c).collect()
        };
        for connector in connectors {
            info!(session_key = %connector.session_key(), "shutting down connector");
            connector.shutdown().await;
        }
    }

    /// Session keys with a live connector.
    #[must_use]
    pub fn live_keys(&self) -> Vec<String> {
        self.connectors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    fn remove_entry(&self, key: &SessionKey) -> Option<Arc<Connector>> {
        self.connectors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key.to_string())
    }
}
