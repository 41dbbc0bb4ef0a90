use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod logging;

// ============================================================================
// Message Types
// ============================================================================

/// Delivery status of an outbound message.
///
/// `Pending` is the only non-terminal state. The dispatch engine moves a
/// message to `Sent` or `Failed` exactly once and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Sent | MessageStatus::Failed)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown message status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for MessageStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(MessageStatus::Pending),
            "sent" => Ok(MessageStatus::Sent),
            "failed" => Ok(MessageStatus::Failed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// An outbound SMS or push message as persisted by the message store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    /// Phone number or device token
    pub recipient_address: String,
    pub content: String,
    pub status: MessageStatus,
    /// Provider-assigned id, present only once the message is sent
    pub provider_message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    /// A freshly queued message, as a producer would insert it.
    pub fn pending(id: i64, recipient_address: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            recipient_address: recipient_address.into(),
            content: content.into(),
            status: MessageStatus::Pending,
            provider_message_id: None,
            sent_at: None,
            created_at: None,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == MessageStatus::Sent
    }

    /// Apply a partial update. Unset fields are left untouched.
    pub fn apply(&mut self, update: &MessageUpdate) {
        if let Some(content) = &update.content {
            self.content = content.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(provider_message_id) = &update.provider_message_id {
            self.provider_message_id = Some(provider_message_id.clone());
        }
        if let Some(sent_at) = update.sent_at {
            self.sent_at = Some(sent_at);
        }
    }
}

/// Partial update of a stored message, keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageUpdate {
    pub id: i64,
    pub content: Option<String>,
    pub status: Option<MessageStatus>,
    pub provider_message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl MessageUpdate {
    pub fn failed(id: i64) -> Self {
        Self {
            id,
            status: Some(MessageStatus::Failed),
            ..Default::default()
        }
    }

    /// Terminal `sent` update. `sent_at` may be missing when it was recovered
    /// from an idempotency marker whose timestamp could not be parsed.
    pub fn sent(id: i64, provider_message_id: Option<String>, sent_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id,
            status: Some(MessageStatus::Sent),
            provider_message_id,
            sent_at,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [MessageStatus::Pending, MessageStatus::Sent, MessageStatus::Failed] {
            assert_eq!(status.as_str().parse::<MessageStatus>().unwrap(), status);
        }
        assert_eq!("SENT".parse::<MessageStatus>().unwrap(), MessageStatus::Sent);
        assert!("queued".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!MessageStatus::Pending.is_terminal());
        assert!(MessageStatus::Sent.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
    }

    #[test]
    fn test_apply_leaves_unset_fields() {
        let mut msg = Message::pending(7, "+15550100", "hello");
        msg.apply(&MessageUpdate::failed(7));

        assert_eq!(msg.status, MessageStatus::Failed);
        assert_eq!(msg.content, "hello");
        assert!(msg.provider_message_id.is_none());
        assert!(msg.sent_at.is_none());
    }

    #[test]
    fn test_apply_sent_update() {
        let now = Utc::now();
        let mut msg = Message::pending(1, "+15550100", "hello");
        msg.apply(&MessageUpdate::sent(1, Some("prov-1".to_string()), Some(now)));

        assert!(msg.is_sent());
        assert_eq!(msg.provider_message_id.as_deref(), Some("prov-1"));
        assert_eq!(msg.sent_at, Some(now));
    }

    #[test]
    fn test_status_serde_lowercase() {
        let json = serde_json::to_string(&MessageStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }
}
