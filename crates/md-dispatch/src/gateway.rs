//! Delivery Gateway
//!
//! Sends a single message to the external SMS / push provider.
//!
//! The provider accepts `POST {base_url}` with `{"to": ..., "content": ...}`
//! and answers `202 Accepted` with `{"message": "Accepted", "messageId": ...}`.
//! Any other status code, or a body reporting `"Failed"`, is a non-success.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DispatchError, Result};

/// Outcome of a send call that reached the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub provider_message_id: String,
    pub accepted: bool,
}

impl DeliveryReceipt {
    pub fn accepted(provider_message_id: impl Into<String>) -> Self {
        Self {
            provider_message_id: provider_message_id.into(),
            accepted: true,
        }
    }

    pub fn rejected() -> Self {
        Self {
            provider_message_id: String::new(),
            accepted: false,
        }
    }

    /// A receipt counts as delivered only with a provider id to record
    pub fn is_success(&self) -> bool {
        self.accepted && !self.provider_message_id.is_empty()
    }
}

#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    async fn send(&self, recipient: &str, content: &str) -> Result<DeliveryReceipt>;
}

#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub base_url: String,
    pub api_key: String,
    /// Header carrying `api_key`
    pub api_key_header: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000/messages".to_string(),
            api_key: String::new(),
            api_key_header: "x-ins-auth-key".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SendRequest<'a> {
    pub to: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub message_id: String,
}

pub struct HttpDeliveryGateway {
    config: HttpGatewayConfig,
    client: reqwest::Client,
}

impl HttpDeliveryGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl DeliveryGateway for HttpDeliveryGateway {
    async fn send(&self, recipient: &str, content: &str) -> Result<DeliveryReceipt> {
        let request = SendRequest { to: recipient, content };

        let mut builder = self.client.post(&self.config.base_url).json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.header(self.config.api_key_header.as_str(), self.config.api_key.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();

        if status != reqwest::StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Provider did not accept message");
            return Err(DispatchError::Rejected(format!("HTTP {}: {}", status, body)));
        }

        let body: SendResponse = response.json().await?;
        debug!(message = %body.message, provider_message_id = %body.message_id, "Provider response");

        if body.message == "Accepted" {
            Ok(DeliveryReceipt::accepted(body.message_id))
        } else {
            Ok(DeliveryReceipt::rejected())
        }
    }
}
