use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{FlowError, Result};
use crate::quote::{Quote, QuoteStatus};

/// One persisted conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Durable storage for quotes and conversation history.
#[async_trait]
pub trait QuoteRepository: Send + Sync {
    async fn upsert_quote(&self, quote: Quote) -> Result<Quote>;
    async fn get_quote(&self, quote_id: &str) -> Result<Option<Quote>>;
    /// The single non-abandoned quote for a (session, flow), if any.
    async fn find_active(&self, session_id: &str, flow_id: &str) -> Result<Option<Quote>>;
    async fn append_message(&self, session_id: &str, role: &str, content: &str) -> Result<()>;
    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;
}

/// In-memory implementation of [`QuoteRepository`] for tests and
/// DATABASE_URL-less runs.
pub struct InMemoryQuoteRepository {
    quotes: DashMap<String, Quote>,
    messages: DashMap<String, Vec<ChatMessage>>,
}

impl InMemoryQuoteRepository {
    pub fn new() -> Self {
        Self {
            quotes: DashMap::new(),
            messages: DashMap::new(),
        }
    }
}

impl Default for InMemoryQuoteRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteRepository for InMemoryQuoteRepository {
    async fn upsert_quote(&self, quote: Quote) -> Result<Quote> {
        self.quotes.insert(quote.quote_id.clone(), quote.clone());
        Ok(quote)
    }

    async fn get_quote(&self, quote_id: &str) -> Result<Option<Quote>> {
        Ok(self.quotes.get(quote_id).map(|entry| entry.clone()))
    }

    async fn find_active(&self, session_id: &str, flow_id: &str) -> Result<Option<Quote>> {
        Ok(self
            .quotes
            .iter()
            .find(|entry| {
                entry.session_id == session_id
                    && entry.flow_id == flow_id
                    && entry.status != QuoteStatus::Abandoned
            })
            .map(|entry| entry.clone()))
    }

    async fn append_message(&self, session_id: &str, role: &str, content: &str) -> Result<()> {
        self.messages
            .entry(session_id.to_string())
            .or_default()
            .push(ChatMessage {
                id: Uuid::new_v4().to_string(),
                session_id: session_id.to_string(),
                role: role.to_string(),
                content: content.to_string(),
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        Ok(self
            .messages
            .get(session_id)
            .map(|entry| {
                let messages = entry.value();
                let start = messages.len().saturating_sub(limit);
                messages[start..].to_vec()
            })
            .unwrap_or_default())
    }
}

/// PostgreSQL implementation of [`QuoteRepository`].
///
/// Quotes live in one row per quote with the lookup keys as columns and the
/// full record as JSONB; a partial unique index enforces "at most one
/// non-abandoned quote per (session, flow)" at the database level.
pub struct PostgresQuoteRepository {
    pool: PgPool,
}

impl PostgresQuoteRepository {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| FlowError::Storage(format!("failed to connect to PostgreSQL: {e}")))?;

        let repo = Self { pool };
        repo.migrate().await?;
        info!("connected to PostgreSQL quote repository");
        Ok(repo)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quotes (
                quote_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                flow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FlowError::Storage(format!("failed to create quotes table: {e}")))?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS quotes_active_per_flow
            ON quotes (session_id, flow_id)
            WHERE status <> 'abandoned'
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FlowError::Storage(format!("failed to create quotes index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FlowError::Storage(format!("failed to create chat_messages table: {e}")))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS chat_messages_session
            ON chat_messages (session_id, created_at)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FlowError::Storage(format!("failed to create chat_messages index: {e}")))?;

        Ok(())
    }

    fn status_str(status: QuoteStatus) -> &'static str {
        match status {
            QuoteStatus::Draft => "draft",
            QuoteStatus::Finalized => "finalized",
            QuoteStatus::Abandoned => "abandoned",
        }
    }

    fn quote_from_row(row: &sqlx::postgres::PgRow) -> Result<Quote> {
        let data: serde_json::Value = row
            .try_get("data")
            .map_err(|e| FlowError::Storage(format!("failed to read quote payload: {e}")))?;
        serde_json::from_value(data)
            .map_err(|e| FlowError::Storage(format!("failed to decode quote payload: {e}")))
    }
}

#[async_trait]
impl QuoteRepository for PostgresQuoteRepository {
    async fn upsert_quote(&self, quote: Quote) -> Result<Quote> {
        let data = serde_json::to_value(&quote)
            .map_err(|e| FlowError::Storage(format!("failed to encode quote: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO quotes (quote_id, session_id, flow_id, status, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (quote_id) DO UPDATE
            SET status = EXCLUDED.status,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&quote.quote_id)
        .bind(&quote.session_id)
        .bind(&quote.flow_id)
        .bind(Self::status_str(quote.status))
        .bind(&data)
        .bind(quote.created_at)
        .bind(quote.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(quote_id = %quote.quote_id, "failed to upsert quote: {e}");
            FlowError::Storage(format!("failed to upsert quote: {e}"))
        })?;

        debug!(quote_id = %quote.quote_id, status = ?quote.status, "quote upserted");
        Ok(quote)
    }

    async fn get_quote(&self, quote_id: &str) -> Result<Option<Quote>> {
        let row = sqlx::query("SELECT data FROM quotes WHERE quote_id = $1")
            .bind(quote_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| FlowError::Storage(format!("failed to fetch quote: {e}")))?;

        row.as_ref().map(Self::quote_from_row).transpose()
    }

    async fn find_active(&self, session_id: &str, flow_id: &str) -> Result<Option<Quote>> {
        let row = sqlx::query(
            r#"
            SELECT data FROM quotes
            WHERE session_id = $1 AND flow_id = $2 AND status <> 'abandoned'
            "#,
        )
        .bind(session_id)
        .bind(flow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlowError::Storage(format!("failed to fetch active quote: {e}")))?;

        row.as_ref().map(Self::quote_from_row).transpose()
    }

    async fn append_message(&self, session_id: &str, role: &str, content: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, session_id, role, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| FlowError::Storage(format!("failed to append message: {e}")))?;
        Ok(())
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, role, content, created_at
            FROM chat_messages
            WHERE session_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FlowError::Storage(format!("failed to fetch messages: {e}")))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            messages.push(ChatMessage {
                id: row
                    .try_get("id")
                    .map_err(|e| FlowError::Storage(e.to_string()))?,
                session_id: row
                    .try_get("session_id")
                    .map_err(|e| FlowError::Storage(e.to_string()))?,
                role: row
                    .try_get("role")
                    .map_err(|e| FlowError::Storage(e.to_string()))?,
                content: row
                    .try_get("content")
                    .map_err(|e| FlowError::Storage(e.to_string()))?,
                created_at: row
                    .try_get("created_at")
                    .map_err(|e| FlowError::Storage(e.to_string()))?,
            });
        }
        messages.reverse();
        Ok(messages)
    }
}
