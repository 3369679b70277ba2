//! Persistence for connection records and conversations.
//!
//! The traits are the seam toward tenant-provisioned database handles; the
//! provided implementations are SQLite via sqlx. Connection records are
//! reconciliation hints only — they are never authoritative over a live
//! connector's actual state.

pub mod sqlite;
pub mod types;

use {anyhow::Result, async_trait::async_trait};

use courier_common::SessionKey;

pub use {
    sqlite::{SqliteConnectionStore, SqliteConversationStore, init_schema},
    types::{ConnectionRecord, ConnectionState, Conversation, ConversationStatus},
};

/// Persisted connection record, one per session key.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn get(&self, session_key: &SessionKey) -> Result<Option<ConnectionRecord>>;

    async fn upsert(&self, record: ConnectionRecord) -> Result<()>;

    async fn delete(&self, session_key: &SessionKey) -> Result<()>;
}

/// Persisted conversations, at most one `ongoing` per (session key, contact).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_ongoing(
        &self,
        session_key: &SessionKey,
        contact_address: &str,
    ) -> Result<Option<Conversation>>;

    async fn insert(&self, conversation: Conversation) -> Result<()>;

    /// Replace the stored transcript of one conversation.
    async fn update_transcript(
        &self,
        id: &str,
        transcript: &[courier_common::Turn],
    ) -> Result<()>;

    /// Mark one conversation ended.
    async fn end(&self, id: &str) -> Result<()>;

    /// Force-end every ongoing conversation for a session. Returns how many
    /// were ended.
    async fn end_all_ongoing(&self, session_key: &SessionKey) -> Result<u64>;

    /// Page of conversations for a session, newest activity first.
    async fn list_page(
        &self,
        session_key: &SessionKey,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Conversation>>;
}
