//! SQLite Message Store Implementation
//!
//! Used for local runs and tests. Timestamps are stored as epoch millis.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use md_common::{Message, MessageStatus, MessageUpdate};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::error::{DispatchError, Result};
use crate::store::{MessageStore, MESSAGES_TABLE};

const SELECT_COLUMNS: &str =
    "id, recipient_phone, content, status, message_id, sent_at, created_on";

pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Queue a pending message. Producers normally live outside this service.
    pub async fn insert_pending(&self, recipient: &str, content: &str) -> Result<i64> {
        let now = Utc::now().timestamp_millis();
        let query = format!(
            "INSERT INTO {} (recipient_phone, content, status, created_on, updated_on) VALUES (?, ?, ?, ?, ?)",
            MESSAGES_TABLE
        );

        let result = sqlx::query(&query)
            .bind(recipient)
            .bind(content)
            .bind(MessageStatus::Pending.as_str())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<Message> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<MessageStatus>()
            .map_err(|e| DispatchError::Store(e.to_string()))?;

        let sent_at: Option<i64> = row.try_get("sent_at")?;
        let created_on: Option<i64> = row.try_get("created_on")?;

        Ok(Message {
            id: row.try_get("id")?,
            recipient_address: row.try_get("recipient_phone")?,
            content: row.try_get("content")?,
            status,
            provider_message_id: row.try_get("message_id")?,
            sent_at: sent_at.and_then(DateTime::from_timestamp_millis),
            created_at: created_on.and_then(DateTime::from_timestamp_millis),
        })
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn fetch_pending(&self) -> Result<Vec<Message>> {
        let query = format!(
            "SELECT {} FROM {} WHERE status = ? ORDER BY id ASC",
            SELECT_COLUMNS, MESSAGES_TABLE
        );

        let rows = sqlx::query(&query)
            .bind(MessageStatus::Pending.as_str())
            .fetch_all(&self.pool)
            .await?;

        let messages = rows.iter().map(Self::parse_row).collect::<Result<Vec<_>>>()?;
        debug!(count = messages.len(), "Fetched pending messages");
        Ok(messages)
    }

    async fn update(&self, update: &MessageUpdate) -> Result<()> {
        let query = format!(
            "UPDATE {} SET content = COALESCE(?, content), status = COALESCE(?, status), \
             message_id = COALESCE(?, message_id), sent_at = COALESCE(?, sent_at), updated_on = ? \
             WHERE id = ?",
            MESSAGES_TABLE
        );

        sqlx::query(&query)
            .bind(update.content.as_deref())
            .bind(update.status.map(|s| s.as_str()))
            .bind(update.provider_message_id.as_deref())
            .bind(update.sent_at.map(|t| t.timestamp_millis()))
            .bind(Utc::now().timestamp_millis())
            .bind(update.id)
            .execute(&self.pool)
            .await?;

        debug!(message_id = update.id, status = ?update.status, "Updated message");
        Ok(())
    }

    async fn fetch_sent(&self, limit: Option<u32>, offset: u32) -> Result<Vec<Message>> {
        let query = format!(
            "SELECT {} FROM {} WHERE status = ? ORDER BY id ASC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, MESSAGES_TABLE
        );

        // LIMIT -1 means no limit in SQLite
        let rows = sqlx::query(&query)
            .bind(MessageStatus::Sent.as_str())
            .bind(limit.map(i64::from).unwrap_or(-1))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn count_sent(&self) -> Result<i64> {
        let query = format!("SELECT COUNT(*) FROM {} WHERE status = ?", MESSAGES_TABLE);
        let count: i64 = sqlx::query_scalar(&query)
            .bind(MessageStatus::Sent.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn init_schema(&self) -> Result<()> {
        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient_phone TEXT NOT NULL,
                content TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                message_id TEXT,
                sent_at INTEGER,
                created_on INTEGER,
                updated_on INTEGER
            )
            "#,
            MESSAGES_TABLE
        );
        sqlx::query(&query).execute(&self.pool).await?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_status ON {} (status)",
            MESSAGES_TABLE, MESSAGES_TABLE
        );
        sqlx::query(&index).execute(&self.pool).await?;

        info!(table = MESSAGES_TABLE, "SQLite message schema initialized");
        Ok(())
    }
}
