use std::sync::Arc;

use tracing::debug;

use {
    courier_common::SessionKey,
    courier_connector::ConnectionStatus,
    courier_store::{ConnectionState, ConnectionStore},
};

/// Where a status report was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    /// A live connector answered the probe.
    Live,
    /// Derived from the persisted connection record only.
    Persisted,
    /// Neither a live connector nor a record exists.
    Unknown,
}

/// Reconciled connection status for one session key.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusReport {
    pub connected: bool,
    pub qr_pending: bool,
    pub phone_number: Option<String>,
    pub platform: Option<String>,
    pub display_name: Option<String>,
    pub source: StatusSource,
}

impl StatusReport {
    fn disconnected(source: StatusSource) -> Self {
        Self {
            connected: false,
            qr_pending: false,
            phone_number: None,
            platform: None,
            display_name: None,
            source,
        }
    }
}

/// Merges live connector state with the persisted connection record.
///
/// The persisted record is a hint, never an authority: a record claiming
/// `connected` with no live connector behind it is unverifiable — the
/// process that held the client may have restarted — so it is reported as
/// disconnected rather than luring callers into sends that cannot happen.
pub struct StatusReconciler {
    connections: Arc<dyn ConnectionStore>,
}

impl StatusReconciler {
    #[must_use]
    pub fn new(connections: Arc<dyn ConnectionStore>) -> Self {
        Self { connections }
    }

    /// Report derived from a live connector's probed status.
    #[must_use]
    pub fn from_live(status: &ConnectionStatus) -> StatusReport {
        StatusReport {
            connected: status.is_connected,
            qr_pending: status.has_qr,
            phone_number: status.phone_number.clone(),
            platform: status.platform.clone(),
            display_name: status.display_name.clone(),
            source: StatusSource::Live,
        }
    }

    /// Report for a session key with no live connector.
    pub async fn reconcile_absent(&self, session_key: &SessionKey) -> anyhow::Result<StatusReport> {
        let Some(record) = self.connections.get(session_key).await? else {
            return Ok(StatusReport::disconnected(StatusSource::Unknown));
        };

        let report = match record.state {
            // A persisted "connected" cannot be verified without a client.
            ConnectionState::Connected => {
                debug!(
                    session_key = %session_key,
                    "persisted connected record with no live connector, reporting disconnected"
                );
                StatusReport {
                    connected: false,
                    qr_pending: false,
                    phone_number: record.phone_number,
                    platform: record.platform,
                    display_name: record.display_name,
                    source: StatusSource::Persisted,
                }
            },
            ConnectionState::Pending => StatusReport {
                connected: false,
                qr_pending: true,
                phone_number: None,
                platform: None,
                display_name: None,
                source: StatusSource::Persisted,
            },
            ConnectionState::Disconnected => StatusReport::disconnected(StatusSource::Persisted),
        };
        Ok(report)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex as StdMutex};

    use {async_trait::async_trait, courier_store::ConnectionRecord};

    use super::*;

    #[derive(Default)]
    struct MockConnectionStore {
        records: StdMutex<HashMap<String, ConnectionRecord>>,
    }

    #[async_trait]
    impl ConnectionStore for MockConnectionStore {
        async fn get(&self, session_key: &SessionKey) -> anyhow::Result<Option<ConnectionRecord>> {
            Ok(self.records.lock().unwrap().get(&session_key.to_string()).cloned())
        }

        async fn upsert(&self, record: ConnectionRecord) -> anyhow::Result<()> {
            self.records
                .lock()
                .unwrap()
                .insert(record.session_key.to_string(), record);
            Ok(())
        }

        async fn delete(&self, session_key: &SessionKey) -> anyhow::Result<()> {
            self.records.lock().unwrap().remove(&session_key.to_string());
            Ok(())
        }
    }

    fn key() -> SessionKey {
        SessionKey::new("t1", "a1")
    }

    async fn reconciler_with_state(state: ConnectionState) -> StatusReconciler {
        let store = Arc::new(MockConnectionStore::default());
        let mut record = ConnectionRecord::pending(key());
        record.state = state;
        record.phone_number = Some("+15550009999".into());
        store.upsert(record).await.unwrap();
        StatusReconciler::new(store)
    }

    #[tokio::test]
    async fn no_record_reports_unknown_disconnected() {
        let reconciler = StatusReconciler::new(Arc::new(MockConnectionStore::default()));
        let report = reconciler.reconcile_absent(&key()).await.unwrap();
        assert!(!report.connected);
        assert_eq!(report.source, StatusSource::Unknown);
    }

    #[tokio::test]
    async fn persisted_connected_without_live_connector_is_disconnected() {
        let reconciler = reconciler_with_state(ConnectionState::Connected).await;
        let report = reconciler.reconcile_absent(&key()).await.unwrap();

        assert!(!report.connected, "stale connected record must not be trusted");
        assert_eq!(report.source, StatusSource::Persisted);
        // Last-known identity is still surfaced for display.
        assert_eq!(report.phone_number.as_deref(), Some("+15550009999"));
    }

    #[tokio::test]
    async fn persisted_pending_reports_qr_pending() {
        let reconciler = reconciler_with_state(ConnectionState::Pending).await;
        let report = reconciler.reconcile_absent(&key()).await.unwrap();
        assert!(!report.connected);
        assert!(report.qr_pending);
    }

    #[tokio::test]
    async fn persisted_disconnected_reports_disconnected() {
        let reconciler = reconciler_with_state(ConnectionState::Disconnected).await;
        let report = reconciler.reconcile_absent(&key()).await.unwrap();
        assert!(!report.connected);
        assert!(!report.qr_pending);
    }

    #[test]
    fn live_status_maps_through() {
        let report = StatusReconciler::from_live(&ConnectionStatus {
            is_connected: true,
            is_active: true,
            has_qr: false,
            qr_image: None,
            phone_number: Some("+15550009999".into()),
            platform: Some("android".into()),
            display_name: None,
        });
        assert!(report.connected);
        assert_eq!(report.source, StatusSource::Live);
    }
}
