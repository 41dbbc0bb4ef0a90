//! Message Dispatcher
//!
//! This crate provides the message dispatch engine:
//! - MessagePoller: start/stop lifecycle around the recurring dispatch cycle
//! - DispatchOrchestrator: fetch pending messages, deliver, record status
//! - IdempotencyCache: markers preventing a second delivery after a partial failure
//! - SentMessageLister: paged read of sent messages
//! - api: operator HTTP endpoints

pub mod api;
pub mod cache;
pub mod error;
pub mod gateway;
pub mod listing;
pub mod memory;
pub mod orchestrator;
pub mod poller;
pub mod redis_cache;
pub mod store;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cache::{
    idempotency_key, IdempotencyCache, IdempotencyMarker, InMemoryIdempotencyCache,
    DEFAULT_MARKER_TTL, IDEMPOTENCY_KEY_PREFIX,
};
pub use error::{DispatchError, Result};
pub use gateway::{DeliveryGateway, DeliveryReceipt, HttpDeliveryGateway, HttpGatewayConfig};
pub use listing::{SentMessageLister, SentPage};
pub use memory::InMemoryMessageStore;
pub use orchestrator::{CycleReport, DispatchOrchestrator, MessageOutcome, OrchestratorConfig};
pub use poller::{DispatchCycle, MessagePoller};
pub use redis_cache::RedisIdempotencyCache;
pub use store::MessageStore;

#[cfg(feature = "mysql")]
pub use mysql::MySqlMessageStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteMessageStore;
