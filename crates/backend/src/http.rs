use {
    async_trait::async_trait,
    serde::Deserialize,
    tracing::debug,
};

use crate::{AgentBackend, ConversationContext, Error, Result, TurnResponse};

/// HTTP JSON client for the remote agent backend.
///
/// `POST {base}/agents/{agent_id}/conversations` creates a conversation;
/// `POST {base}/conversations/{id}/turns` forwards a turn.
pub struct HttpAgentBackend {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Deserialize)]
struct CreateConversationResponse {
    conversation_id: String,
}

impl HttpAgentBackend {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_token: None,
        }
    }

    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let mut request = self.http.post(self.url(path)).json(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                Error::unavailable(e)
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::unavailable(format!("backend returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl AgentBackend for HttpAgentBackend {
    async fn create_conversation(
        &self,
        agent_id: &str,
        context: &ConversationContext,
    ) -> Result<String> {
        debug!(agent_id, contact = %context.contact_address, "creating backend conversation");

        let body = serde_json::json!({ "context": context });
        let value = self
            .post_json(&format!("agents/{agent_id}/conversations"), &body)
            .await?;
        let created: CreateConversationResponse = serde_json::from_value(value)?;
        Ok(created.conversation_id)
    }

    async fn send_turn(&self, conversation_id: &str, text: &str) -> Result<TurnResponse> {
        debug!(conversation_id, "forwarding turn to backend");

        let body = serde_json::json!({ "text": text });
        let value = self
            .post_json(&format!("conversations/{conversation_id}/turns"), &body)
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}
