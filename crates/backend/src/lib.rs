//! Remote conversational-agent backend client.
//!
//! The backend owns conversation state on its side: `create_conversation`
//! provisions a conversation for one contact against an agent, `send_turn`
//! forwards a user turn and returns the full turn list including the
//! agent-authored reply.

pub mod error;
pub mod http;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

pub use courier_common::Turn;

pub use {
    error::{Error, Result},
    http::HttpAgentBackend,
};

/// Response to a forwarded turn: the transcript as the backend now sees it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnResponse {
    pub turns: Vec<Turn>,
}

impl TurnResponse {
    /// Latest agent-authored turn. Prefers the last `assistant` turn and
    /// falls back to the final turn of any role if none matches.
    #[must_use]
    pub fn latest_reply(&self) -> Option<&Turn> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == "assistant")
            .or_else(|| self.turns.last())
    }
}

/// Contact metadata passed to the backend as dynamic context at
/// conversation-creation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    pub contact_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    pub channel: String,
}

/// Remote conversational-agent backend.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Provision a conversation for one contact. Returns the backend's
    /// conversation id.
    async fn create_conversation(
        &self,
        agent_id: &str,
        context: &ConversationContext,
    ) -> Result<String>;

    /// Forward a user turn and return the updated turn list.
    async fn send_turn(&self, conversation_id: &str, text: &str) -> Result<TurnResponse>;
}
