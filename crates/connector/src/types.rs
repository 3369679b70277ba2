use serde::{Deserialize, Serialize};

/// Connector state machine.
///
/// `Uninitialized → Initializing → (AwaitingQr | Ready) → Disconnected`,
/// `Disconnected → Initializing` on the next acquire, `Destroyed` terminal
/// from any state via explicit disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    Uninitialized,
    Initializing,
    AwaitingQr,
    Ready,
    Disconnected,
    Destroyed,
}

/// Identity of a paired session as reported by the protocol client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub phone_number: Option<String>,
    pub platform: Option<String>,
    pub display_name: Option<String>,
}

/// Snapshot returned by `Connector::connection_status`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    /// A protocol client exists (session initialized, possibly unpaired).
    pub is_active: bool,
    pub has_qr: bool,
    pub qr_image: Option<String>,
    pub phone_number: Option<String>,
    pub platform: Option<String>,
    pub display_name: Option<String>,
}

/// Result of a QR generation request.
#[derive(Debug, Clone, Serialize)]
pub struct QrResult {
    /// The session was already paired; no QR is needed.
    pub already_connected: bool,
    pub qr_payload: Option<String>,
    /// PNG data URL rendered from the pairing payload.
    pub qr_image: Option<String>,
}

impl QrResult {
    #[must_use]
    pub fn already_connected() -> Self {
        Self {
            already_connected: true,
            qr_payload: None,
            qr_image: None,
        }
    }
}

/// An inbound message delivered by the protocol client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Protocol-unique message identifier (dedup key).
    pub id: String,
    /// Chat the message arrived in; replies go back here.
    pub chat_address: String,
    /// Wire address of the sender.
    pub sender_address: String,
    pub sender_name: Option<String>,
    pub body: String,
    pub has_media: bool,
    /// Sent by our own session (echoed back by the network).
    pub self_sent: bool,
    pub timestamp: i64,
}

/// Events delivered by the protocol client, in delivery order.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A pairing payload is available for rendering.
    Qr(String),
    /// Credentials accepted (fires before `Ready` on cached sessions).
    Authenticated,
    /// The session is paired and can send/receive.
    Ready,
    /// Pairing or credential restore failed terminally.
    AuthFailure(String),
    /// The session dropped.
    Disconnected(String),
    /// An inbound message arrived.
    Message(InboundMessage),
}
