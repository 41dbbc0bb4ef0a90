//! Paged listing of sent messages. Read only, no cache involvement.

use std::sync::Arc;

use md_common::Message;
use serde::Serialize;

use crate::error::Result;
use crate::store::MessageStore;

/// One page of sent messages
#[derive(Debug, Clone, Serialize)]
pub struct SentPage {
    pub messages: Vec<Message>,
    /// `None` when the caller asked for no limit
    pub limit: Option<u32>,
    pub offset: u32,
    pub total: i64,
    pub has_more: bool,
}

/// Normalize raw paging input: `limit <= 0` means no limit, negative
/// offsets become 0. Values beyond `u32::MAX` saturate.
pub fn normalize_paging(limit: i64, offset: i64) -> (Option<u32>, u32) {
    let limit = (limit > 0).then(|| u32::try_from(limit).unwrap_or(u32::MAX));
    let offset = u32::try_from(offset.max(0)).unwrap_or(u32::MAX);
    (limit, offset)
}

/// Whether rows remain past this page. An unlimited page never has more.
pub fn has_more(limit: Option<u32>, offset: u32, total: i64) -> bool {
    match limit {
        Some(limit) => i64::from(offset) + i64::from(limit) < total,
        None => false,
    }
}

pub struct SentMessageLister {
    store: Arc<dyn MessageStore>,
}

impl SentMessageLister {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    pub async fn list_sent(&self, limit: i64, offset: i64) -> Result<SentPage> {
        let (limit, offset) = normalize_paging(limit, offset);

        let messages = self.store.fetch_sent(limit, offset).await?;
        let total = self.store.count_sent().await?;

        Ok(SentPage {
            messages,
            limit,
            offset,
            total,
            has_more: has_more(limit, offset, total),
        })
    }
}
