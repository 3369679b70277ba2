use serde::{Deserialize, Serialize};

use courier_common::{SessionKey, Turn, unix_now};

/// Lifecycle of a persisted connection record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Pending,
    Connected,
    Disconnected,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            other => anyhow::bail!("unknown connection state: {other}"),
        }
    }
}

/// One persisted connection record per session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub session_key: SessionKey,
    pub state: ConnectionState,
    pub phone_number: Option<String>,
    pub platform: Option<String>,
    pub display_name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ConnectionRecord {
    #[must_use]
    pub fn pending(session_key: SessionKey) -> Self {
        let now = unix_now();
        Self {
            session_key,
            state: ConnectionState::Pending,
            phone_number: None,
            platform: None,
            display_name: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status of a logical conversation with one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Ongoing,
    Ended,
}

impl ConversationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ongoing => "ongoing",
            Self::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "ongoing" => Ok(Self::Ongoing),
            "ended" => Ok(Self::Ended),
            other => anyhow::bail!("unknown conversation status: {other}"),
        }
    }
}

/// A logical back-and-forth with one contact, tracked against the remote
/// agent backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Local document id.
    pub id: String,
    pub session_key: SessionKey,
    pub contact_address: String,
    pub contact_name: Option<String>,
    /// Id assigned by the remote agent backend.
    pub conversation_id: String,
    pub status: ConversationStatus,
    pub transcript: Vec<Turn>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    #[must_use]
    pub fn ongoing(
        session_key: SessionKey,
        contact_address: impl Into<String>,
        contact_name: Option<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        let now = unix_now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_key,
            contact_address: contact_address.into(),
            contact_name,
            conversation_id: conversation_id.into(),
            status: ConversationStatus::Ongoing,
            transcript: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_round_trips() {
        for state in [
            ConnectionState::Pending,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ] {
            assert_eq!(ConnectionState::parse(state.as_str()).unwrap(), state);
        }
        assert!(ConnectionState::parse("bogus").is_err());
    }

    #[test]
    fn conversation_status_round_trips() {
        for status in [ConversationStatus::Ongoing, ConversationStatus::Ended] {
            assert_eq!(ConversationStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn new_conversation_starts_ongoing_and_empty() {
        let conv = Conversation::ongoing(
            SessionKey::new("t1", "a1"),
            "+15550001111",
            Some("Ada".into()),
            "c-1",
        );
        assert_eq!(conv.status, ConversationStatus::Ongoing);
        assert!(conv.transcript.is_empty());
        assert!(!conv.id.is_empty());
    }
}
