use {async_trait::async_trait, serde::Serialize, tracing::info};

use crate::key::SessionKey;

/// Events recorded to the activity log sink.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityEvent {
    ChannelConnected {
        session_key: SessionKey,
        phone_number: Option<String>,
    },
    ChannelDisconnected {
        session_key: SessionKey,
        reason: String,
    },
    QrIssued {
        session_key: SessionKey,
    },
    MessageRelayed {
        session_key: SessionKey,
        contact: String,
        conversation_id: String,
    },
    RelayFailed {
        session_key: SessionKey,
        contact: String,
        error: String,
    },
}

/// Fire-and-forget sink for activity events.
///
/// Implementations must never let a recording failure propagate into the
/// calling path; callers do not await delivery guarantees.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn record(&self, event: ActivityEvent);
}

/// Default sink: emits each event as a structured tracing line.
pub struct TracingActivityLog;

#[async_trait]
impl ActivityLog for TracingActivityLog {
    async fn record(&self, event: ActivityEvent) {
        info!(target: "courier_activity", event = ?event, "activity");
    }
}

/// Sink that drops every event. Useful in tests.
pub struct NullActivityLog;

#[async_trait]
impl ActivityLog for NullActivityLog {
    async fn record(&self, _event: ActivityEvent) {}
}
