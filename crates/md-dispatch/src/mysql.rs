//! MySQL Message Store Implementation
//!
//! Production backend for the `messages` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use md_common::{Message, MessageStatus, MessageUpdate};
use sqlx::{MySqlPool, Row};
use tracing::{debug, info};

use crate::error::{DispatchError, Result};
use crate::store::{MessageStore, MESSAGES_TABLE};

const SELECT_COLUMNS: &str =
    "id, recipient_phone, content, status, message_id, sent_at, created_on";

pub struct MySqlMessageStore {
    pool: MySqlPool,
}

impl MySqlMessageStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Queue a pending message. Producers normally live outside this service.
    pub async fn insert_pending(&self, recipient: &str, content: &str) -> Result<i64> {
        let query = format!(
            "INSERT INTO {} (recipient_phone, content, status) VALUES (?, ?, ?)",
            MESSAGES_TABLE
        );

        let result = sqlx::query(&query)
            .bind(recipient)
            .bind(content)
            .bind(MessageStatus::Pending.as_str())
            .execute(&self.pool)
            .await?;

        i64::try_from(result.last_insert_id())
            .map_err(|_| DispatchError::Store("message id out of range".to_string()))
    }

    fn parse_row(row: &sqlx::mysql::MySqlRow) -> Result<Message> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<MessageStatus>()
            .map_err(|e| DispatchError::Store(e.to_string()))?;

        Ok(Message {
            id: row.try_get("id")?,
            recipient_address: row.try_get("recipient_phone")?,
            content: row.try_get("content")?,
            status,
            provider_message_id: row.try_get("message_id")?,
            sent_at: row.try_get::<Option<DateTime<Utc>>, _>("sent_at")?,
            created_at: row.try_get::<Option<DateTime<Utc>>, _>("created_on")?,
        })
    }
}

#[async_trait]
impl MessageStore for MySqlMessageStore {
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
             message_id = COALESCE(?, message_id), sent_at = COALESCE(?, sent_at) \
             WHERE id = ?",
            MESSAGES_TABLE
        );

        sqlx::query(&query)
            .bind(update.content.as_deref())
            .bind(update.status.map(|s| s.as_str()))
            .bind(update.provider_message_id.as_deref())
            .bind(update.sent_at)
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

        // MySQL has no unbounded LIMIT, u64::MAX stands in for it
        let rows = sqlx::query(&query)
            .bind(MessageStatus::Sent.as_str())
            .bind(limit.map(u64::from).unwrap_or(u64::MAX))
            .bind(u64::from(offset))
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
                id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                recipient_phone VARCHAR(255) NOT NULL,
                content TEXT NOT NULL,
                status VARCHAR(16) NOT NULL DEFAULT 'pending',
                message_id VARCHAR(255) NULL,
                sent_at TIMESTAMP NULL,
                created_on TIMESTAMP NULL DEFAULT CURRENT_TIMESTAMP,
                updated_on TIMESTAMP NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                INDEX idx_messages_status (status)
            )
            "#,
            MESSAGES_TABLE
        );
        sqlx::query(&query).execute(&self.pool).await?;

        info!(table = MESSAGES_TABLE, "MySQL message schema initialized");
        Ok(())
    }
}
