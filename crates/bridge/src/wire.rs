use serde::{Deserialize, Serialize};

/// Commands sent to the bridge process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Start (or restore) a session. The bridge persists credentials under
    /// `artifact_dir`.
    Login {
        session_key: String,
        artifact_dir: String,
    },
    /// Tear the session down.
    Logout { session_key: String },
    /// Send a text message; answered with a `send_result` event.
    Send {
        session_key: String,
        request_id: String,
        to: String,
        body: String,
    },
    /// Probe session identity; answered with a `session_info` event.
    Status {
        session_key: String,
        request_id: String,
    },
}

/// Events received from the bridge process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    Qr {
        session_key: String,
        payload: String,
    },
    Authenticated {
        session_key: String,
    },
    Ready {
        session_key: String,
    },
    AuthFailure {
        session_key: String,
        reason: String,
    },
    Disconnected {
        session_key: String,
        reason: String,
    },
    Message {
        session_key: String,
        id: String,
        chat_address: String,
        sender_address: String,
        sender_name: Option<String>,
        #[serde(default)]
        body: String,
        #[serde(default)]
        has_media: bool,
        #[serde(default)]
        self_sent: bool,
        #[serde(default)]
        timestamp: i64,
    },
    SendResult {
        request_id: String,
        message_id: Option<String>,
        error: Option<String>,
    },
    SessionInfo {
        request_id: String,
        paired: bool,
        phone_number: Option<String>,
        platform: Option<String>,
        display_name: Option<String>,
    },
}

impl BridgeEvent {
    /// Request id for request/response events, `None` for lifecycle events.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::SendResult { request_id, .. } | Self::SessionInfo { request_id, .. } => {
                Some(request_id)
            },
            _ => None,
        }
    }
}
