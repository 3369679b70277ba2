use {anyhow::Result, async_trait::async_trait, sqlx::SqlitePool};

use courier_common::{SessionKey, Turn, unix_now};

use crate::{
    ConnectionStore, ConversationStore,
    types::{ConnectionRecord, ConnectionState, Conversation, ConversationStatus},
};

/// Initialize the connections and conversations schema.
///
/// Called at application startup; also used by tests against in-memory
/// databases.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS connections (
            session_key  TEXT    PRIMARY KEY,
            state        TEXT    NOT NULL,
            phone_number TEXT,
            platform     TEXT,
            display_name TEXT,
            created_at   INTEGER NOT NULL,
            updated_at   INTEGER NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT    PRIMARY KEY,
            session_key     TEXT    NOT NULL,
            contact_address TEXT    NOT NULL,
            contact_name    TEXT,
            conversation_id TEXT    NOT NULL,
            status          TEXT    NOT NULL,
            transcript      TEXT    NOT NULL,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_lookup
         ON conversations (session_key, contact_address, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ── Connection records ──────────────────────────────────────────────────────

/// Internal row type for sqlx mapping.
#[derive(sqlx::FromRow)]
struct ConnectionRow {
    session_key: String,
    state: String,
    phone_number: Option<String>,
    platform: Option<String>,
    display_name: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ConnectionRow> for ConnectionRecord {
    type Error = anyhow::Error;

    fn try_from(r: ConnectionRow) -> Result<Self> {
        Ok(Self {
            session_key: r.session_key.parse().map_err(anyhow::Error::msg)?,
            state: ConnectionState::parse(&r.state)?,
            phone_number: r.phone_number,
            platform: r.platform,
            display_name: r.display_name,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// SQLite-backed connection record store.
pub struct SqliteConnectionStore {
    pool: SqlitePool,
}

impl SqliteConnectionStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionStore for SqliteConnectionStore {
    async fn get(&self, session_key: &SessionKey) -> Result<Option<ConnectionRecord>> {
        let row = sqlx::query_as::<_, ConnectionRow>(
            "SELECT * FROM connections WHERE session_key = ?",
        )
        .bind(session_key.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn upsert(&self, record: ConnectionRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO connections
                 (session_key, state, phone_number, platform, display_name, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(session_key) DO UPDATE SET
                 state        = excluded.state,
                 phone_number = excluded.phone_number,
                 platform     = excluded.platform,
                 display_name = excluded.display_name,
                 updated_at   = excluded.updated_at"#,
        )
        .bind(record.session_key.to_string())
        .bind(record.state.as_str())
        .bind(&record.phone_number)
        .bind(&record.platform)
        .bind(&record.display_name)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, session_key: &SessionKey) -> Result<()> {
        sqlx::query("DELETE FROM connections WHERE session_key = ?")
            .bind(session_key.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ── Conversations ───────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    session_key: String,
    contact_address: String,
    contact_name: Option<String>,
    conversation_id: String,
    status: String,
    transcript: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = anyhow::Error;

    fn try_from(r: ConversationRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            session_key: r.session_key.parse().map_err(anyhow::Error::msg)?,
            contact_address: r.contact_address,
            contact_name: r.contact_name,
            conversation_id: r.conversation_id,
            status: ConversationStatus::parse(&r.status)?,
            transcript: serde_json::from_str(&r.transcript)?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// SQLite-backed conversation store.
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn find_ongoing(
        &self,
        session_key: &SessionKey,
        contact_address: &str,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT * FROM conversations
             WHERE session_key = ? AND contact_address = ? AND status = 'ongoing'
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(session_key.to_string())
        .bind(contact_address)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn insert(&self, conversation: Conversation) -> Result<()> {
        let transcript = serde_json::to_string(&conversation.transcript)?;
        sqlx::query(
            r#"INSERT INTO conversations
                 (id, session_key, contact_address, contact_name, conversation_id,
                  status, transcript, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&conversation.id)
        .bind(conversation.session_key.to_string())
        .bind(&conversation.contact_address)
        .bind(&conversation.contact_name)
        .bind(&conversation.conversation_id)
        .bind(conversation.status.as_str())
        .bind(&transcript)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_transcript(&self, id: &str, transcript: &[Turn]) -> Result<()> {
        let json = serde_json::to_string(transcript)?;
        sqlx::query("UPDATE conversations SET transcript = ?, updated_at = ? WHERE id = ?")
            .bind(&json)
            .bind(unix_now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn end(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE conversations SET status = 'ended', updated_at = ? WHERE id = ?")
            .bind(unix_now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn end_all_ongoing(&self, session_key: &SessionKey) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE conversations SET status = 'ended', updated_at = ?
             WHERE session_key = ? AND status = 'ongoing'",
        )
        .bind(unix_now())
        .bind(session_key.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_page(
        &self,
        session_key: &SessionKey,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Conversation>> {
        let offset = i64::from(page) * i64::from(page_size);
        let rows = sqlx::query_as::<_, ConversationRow>(
            "SELECT * FROM conversations WHERE session_key = ?
             ORDER BY updated_at DESC LIMIT ? OFFSET ?",
        )
        .bind(session_key.to_string())
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
