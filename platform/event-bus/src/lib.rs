//! # EventBus Abstraction
//!
//! Platform-level pub/sub used to move domain events between the billing
//! service's producers (the transactional outbox relay) and its consumers
//! (the webhook dispatcher and any other observer).
//!
//! ## Implementations
//!
//! - **NatsBus**: production transport backed by a NATS client
//! - **InMemoryBus**: in-process transport for dev and tests
//!
//! Both are selected at startup from config, so the service code only ever
//! sees `Arc<dyn EventBus>`.
//!
//! ## Delivery semantics
//!
//! The bus is at-least-once and carries no ordering guarantee across
//! publishers. Events are durably stored in the outbox before they are
//! published, and consumers dedupe on `event_id`, so duplicates and
//! republishes are safe.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EventBus, InMemoryBus};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//!
//! let payload = serde_json::to_vec(&serde_json::json!({
//!     "event_type": "invoice.paid",
//! }))?;
//! bus.publish("billing.events.invoice.paid", payload).await?;
//!
//! let mut stream = bus.subscribe("billing.events.>").await?;
//! while let Some(msg) = futures::StreamExt::next(&mut stream).await {
//!     println!("{} bytes on {}", msg.payload.len(), msg.subject);
//! }
//! # Ok(())
//! # }
//! ```

pub mod consumer_retry;
mod envelope;
mod inmemory_bus;
mod nats_bus;

pub use envelope::EventEnvelope;
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self { subject, payload }
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core publish-subscribe abstraction.
///
/// Subjects are dot-separated (e.g. `billing.events.invoice.paid`) and
/// subscriptions accept NATS-style wildcards:
/// - `*` matches a single token
/// - `>` matches one or more trailing tokens
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a payload to a subject.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Subscribe to messages matching a subject pattern.
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}
