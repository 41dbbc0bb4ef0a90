//! Dispatch Orchestrator
//!
//! Runs one poll-and-deliver cycle over every pending message:
//!
//! 1. Fetch pending messages (a fetch failure aborts the cycle)
//! 2. Per message, independently:
//!    - a live idempotency marker means the message was already delivered:
//!      mark it `sent` from the marker, skip the gateway
//!    - otherwise send through the gateway; on success write the marker
//!      first, then mark `sent`; on failure mark `failed`
//! 3. Cache and store write errors are logged and counted, never fatal

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use md_common::{Message, MessageUpdate};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::cache::{
    idempotency_key, IdempotencyCache, IdempotencyMarker, DEFAULT_MARKER_TTL,
    IDEMPOTENCY_KEY_PREFIX,
};
use crate::error::Result;
use crate::gateway::DeliveryGateway;
use crate::poller::DispatchCycle;
use crate::store::MessageStore;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub key_prefix: String,
    pub marker_ttl: Duration,
    /// Messages processed concurrently within a cycle; 1 is strictly sequential
    pub concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            key_prefix: IDEMPOTENCY_KEY_PREFIX.to_string(),
            marker_ttl: DEFAULT_MARKER_TTL,
            concurrency: 1,
        }
    }
}

/// Terminal result for one message within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Delivered by the gateway during this cycle
    Sent,
    /// Already delivered earlier; status restored from the idempotency marker
    Recovered,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageResult {
    pub message_id: i64,
    pub outcome: MessageOutcome,
    pub cache_write_failed: bool,
    pub store_write_failed: bool,
}

/// Summary of one dispatch cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub sent: usize,
    pub recovered: usize,
    pub failed: usize,
    pub cache_write_errors: usize,
    pub store_write_errors: usize,
}

impl CycleReport {
    fn record(&mut self, result: &MessageResult) {
        match result.outcome {
            MessageOutcome::Sent => self.sent += 1,
            MessageOutcome::Recovered => self.recovered += 1,
            MessageOutcome::Failed => self.failed += 1,
        }
        if result.cache_write_failed {
            self.cache_write_errors += 1;
        }
        if result.store_write_failed {
            self.store_write_errors += 1;
        }
    }
}

pub struct DispatchOrchestrator {
    store: Arc<dyn MessageStore>,
    cache: Arc<dyn IdempotencyCache>,
    gateway: Arc<dyn DeliveryGateway>,
    config: OrchestratorConfig,
}

impl DispatchOrchestrator {
    pub fn new(
        store: Arc<dyn MessageStore>,
        cache: Arc<dyn IdempotencyCache>,
        gateway: Arc<dyn DeliveryGateway>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { store, cache, gateway, config }
    }

    /// Execute one cycle. Only a failed fetch is returned as an error.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        metrics::counter!("dispatcher.cycles_total").increment(1);

        let messages = match self.store.fetch_pending().await {
            Ok(messages) => messages,
            Err(e) => {
                metrics::counter!("dispatcher.fetch_errors_total").increment(1);
                return Err(e);
            }
        };

        metrics::gauge!("dispatcher.pending_messages").set(messages.len() as f64);

        let mut report = CycleReport {
            fetched: messages.len(),
            ..Default::default()
        };

        if messages.is_empty() {
            trace!("No pending messages");
            return Ok(report);
        }

        debug!(count = messages.len(), "Processing pending messages");

        let results: Vec<MessageResult> = stream::iter(messages)
            .map(|message| {
                let span = info_span!("dispatch_message", message_id = message.id);
                self.process_message(message).instrument(span)
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        for result in &results {
            report.record(result);
        }

        metrics::counter!("dispatcher.messages.sent_total").increment(report.sent as u64);
        metrics::counter!("dispatcher.messages.recovered_total").increment(report.recovered as u64);
        metrics::counter!("dispatcher.messages.failed_total").increment(report.failed as u64);
        metrics::counter!("dispatcher.cache.write_errors_total").increment(report.cache_write_errors as u64);
        metrics::counter!("dispatcher.store.write_errors_total").increment(report.store_write_errors as u64);

        info!(
            fetched = report.fetched,
            sent = report.sent,
            recovered = report.recovered,
            failed = report.failed,
            cache_write_errors = report.cache_write_errors,
            store_write_errors = report.store_write_errors,
            "Dispatch cycle complete"
        );

        Ok(report)
    }

    async fn process_message(&self, message: Message) -> MessageResult {
        let key = idempotency_key(&self.config.key_prefix, message.id);

        if let Some(marker) = self.lookup_marker(&key).await {
            return self.restore_from_marker(message.id, marker).await;
        }

        match self.gateway.send(&message.recipient_address, &message.content).await {
            Ok(receipt) if receipt.is_success() => {
                let sent_at = Utc::now();
                let marker = IdempotencyMarker::new(receipt.provider_message_id.clone(), sent_at);

                // Marker goes in before the store write so a crash in between
                // still leaves evidence of the send
                let cache_write_failed = !self.write_marker(&key, &marker).await;

                let update = MessageUpdate::sent(message.id, Some(receipt.provider_message_id), Some(sent_at));
                let store_write_failed = !self.write_status(&update).await;

                if store_write_failed {
                    error!(
                        cached = !cache_write_failed,
                        "Message delivered but status update failed"
                    );
                } else {
                    info!("Message sent");
                }

                MessageResult {
                    message_id: message.id,
                    outcome: MessageOutcome::Sent,
                    cache_write_failed,
                    store_write_failed,
                }
            }
            Ok(_) => {
                warn!("Provider rejected message");
                self.mark_failed(message.id).await
            }
            Err(e) => {
                warn!(error = %e, "Failed to send message");
                self.mark_failed(message.id).await
            }
        }
    }

    /// A usable marker, or `None` when delivery should be attempted
    async fn lookup_marker(&self, key: &str) -> Option<IdempotencyMarker> {
        match self.cache.get(key).await {
            Ok(Some(bytes)) => {
                let marker = IdempotencyMarker::decode(&bytes);
                if marker.is_none() {
                    warn!(key = %key, "Ignoring malformed idempotency marker");
                }
                marker
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Idempotency cache read failed, attempting delivery");
                None
            }
        }
    }

    async fn restore_from_marker(&self, message_id: i64, marker: IdempotencyMarker) -> MessageResult {
        let sent_at = marker.sent_at();
        if sent_at.is_none() {
            warn!(sent_at = %marker.sent_at, "Unparseable sentAt in marker, leaving sent_at unset");
        }
        info!(provider_message_id = %marker.provider_message_id, "Message already sent, skipping delivery");

        let update = MessageUpdate::sent(message_id, Some(marker.provider_message_id), sent_at);
        let store_write_failed = !self.write_status(&update).await;

        MessageResult {
            message_id,
            outcome: MessageOutcome::Recovered,
            cache_write_failed: false,
            store_write_failed,
        }
    }

    async fn mark_failed(&self, message_id: i64) -> MessageResult {
        let store_write_failed = !self.write_status(&MessageUpdate::failed(message_id)).await;
        MessageResult {
            message_id,
            outcome: MessageOutcome::Failed,
            cache_write_failed: false,
            store_write_failed,
        }
    }

    async fn write_marker(&self, key: &str, marker: &IdempotencyMarker) -> bool {
        let encoded = match marker.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(error = %e, "Failed to encode idempotency marker");
                return false;
            }
        };

        match self.cache.set(key, &encoded, self.config.marker_ttl).await {
            Ok(()) => true,
            Err(e) => {
                error!(key = %key, error = %e, "Failed to cache idempotency marker");
                false
            }
        }
    }

    async fn write_status(&self, update: &MessageUpdate) -> bool {
        match self.store.update(update).await {
            Ok(()) => true,
            Err(e) => {
                error!(status = ?update.status, error = %e, "Failed to update message status");
                false
            }
        }
    }
}

#[async_trait]
impl DispatchCycle for DispatchOrchestrator {
    async fn run(&self) {
        if let Err(e) = self.run_cycle().await {
            error!(error = %e, "Failed to fetch pending messages, skipping cycle");
        }
    }
}
