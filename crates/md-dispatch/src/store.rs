//! Message Store Trait
//!
//! Persistence interface consumed by the dispatch engine. Implementations
//! handle their own connection pooling.

use async_trait::async_trait;
use md_common::{Message, MessageUpdate};

use crate::error::Result;

/// Table holding outbound messages
pub const MESSAGES_TABLE: &str = "messages";

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// All messages with status `pending`, in store order.
    async fn fetch_pending(&self) -> Result<Vec<Message>>;

    /// Apply a partial update. Fields left as `None` are untouched.
    async fn update(&self, update: &MessageUpdate) -> Result<()>;

    /// A page of `sent` messages. `limit = None` returns every row after `offset`.
    async fn fetch_sent(&self, limit: Option<u32>, offset: u32) -> Result<Vec<Message>>;

    async fn count_sent(&self) -> Result<i64>;

    /// Create the messages table if it does not exist
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }
}
