//! In-memory message store for dev mode and tests

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use md_common::{Message, MessageStatus, MessageUpdate};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{DispatchError, Result};
use crate::store::MessageStore;

#[derive(Default)]
struct Inner {
    next_id: i64,
    messages: BTreeMap<i64, Message>,
}

/// Message store backed by an ordered map; ids are assigned sequentially.
#[derive(Default)]
pub struct InMemoryMessageStore {
    inner: Mutex<Inner>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a new pending message and return its id
    pub fn insert_pending(&self, recipient: &str, content: &str) -> i64 {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        let mut message = Message::pending(id, recipient, content);
        message.created_at = Some(Utc::now());
        inner.messages.insert(id, message);
        id
    }

    /// Insert a message as-is, keeping its id
    pub fn insert(&self, message: Message) {
        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.max(message.id);
        inner.messages.insert(message.id, message);
    }

    pub fn get(&self, id: i64) -> Option<Message> {
        self.inner.lock().messages.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_status(&self, status: MessageStatus) -> Vec<Message> {
        self.inner
            .lock()
            .messages
            .values()
            .filter(|m| m.status == status)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn fetch_pending(&self) -> Result<Vec<Message>> {
        Ok(self.with_status(MessageStatus::Pending))
    }

    async fn update(&self, update: &MessageUpdate) -> Result<()> {
        let mut inner = self.inner.lock();
        let message = inner
            .messages
            .get_mut(&update.id)
            .ok_or_else(|| DispatchError::Store(format!("message {} not found", update.id)))?;
        message.apply(update);
        debug!(message_id = update.id, status = ?update.status, "Updated message");
        Ok(())
    }

    async fn fetch_sent(&self, limit: Option<u32>, offset: u32) -> Result<Vec<Message>> {
        let sent = self.with_status(MessageStatus::Sent).into_iter().skip(offset as usize);
        Ok(match limit {
            Some(limit) => sent.take(limit as usize).collect(),
            None => sent.collect(),
        })
    }

    async fn count_sent(&self) -> Result<i64> {
        Ok(self.with_status(MessageStatus::Sent).len() as i64)
    }
}
