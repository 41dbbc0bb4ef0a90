//! Idempotency Cache
//!
//! Records "already delivered" markers so a message whose send succeeded but
//! whose store update did not is never sent twice while the marker lives.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::Result;

/// Prefix for idempotency keys, followed by the message id
pub const IDEMPOTENCY_KEY_PREFIX: &str = "messageSent_";

/// Default marker lifetime
pub const DEFAULT_MARKER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Timestamp layout used for `sentAt` inside a marker
pub const SENT_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn idempotency_key(prefix: &str, message_id: i64) -> String {
    format!("{}{}", prefix, message_id)
}

#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    /// Raw marker bytes, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
}

/// Cached evidence of a confirmed delivery.
///
/// Serialized as `{"providerMessageId": "...", "sentAt": "YYYY-MM-DD HH:MM:SS"}`.
/// The older `response_message_id` / `message_sent_at` field names are still
/// accepted when decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyMarker {
    #[serde(alias = "response_message_id", default)]
    pub provider_message_id: String,
    #[serde(alias = "message_sent_at", default)]
    pub sent_at: String,
}

impl IdempotencyMarker {
    pub fn new(provider_message_id: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            provider_message_id: provider_message_id.into(),
            sent_at: sent_at.format(SENT_AT_FORMAT).to_string(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a cached value. Returns `None` for anything that is not a
    /// usable marker, including one with an empty provider id.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let marker: IdempotencyMarker = serde_json::from_slice(bytes).ok()?;
        if marker.provider_message_id.trim().is_empty() {
            return None;
        }
        Some(marker)
    }

    /// Parsed `sent_at`, `None` if the stored text does not match the format
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.sent_at, SENT_AT_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// Process-local cache with per-entry expiry, for dev mode and tests.
#[derive(Default)]
pub struct InMemoryIdempotencyCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
}

impl InMemoryIdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|(_, expires)| expires.map_or(true, |at| at > now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdempotencyCache for InMemoryIdempotencyCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, Some(expires))) if *expires <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        // Zero TTL means no expiry, as with Redis SET
        let expires = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.entries.lock().insert(key.to_string(), (value.to_vec(), expires));
        Ok(())
    }
}
