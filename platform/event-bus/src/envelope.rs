//! # Event Envelope
//!
//! The envelope wraps every event that crosses the bus. It carries the
//! metadata consumers need for idempotency (`event_id`), auditing
//! (`occurred_at`, `source_module`, `source_version`) and causality
//! (`correlation_id`, `causation_id`); the event-specific data rides in
//! `payload`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard envelope for events published across module boundaries.
///
/// # Type Parameter
///
/// * `T` - The event-specific payload type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Unique event identifier (idempotency key)
    pub event_id: Uuid,

    /// Timestamp when the event was generated
    pub occurred_at: DateTime<Utc>,

    /// Module that generated the event (e.g. "billing")
    pub source_module: String,

    /// Semantic version of the source module
    pub source_version: String,

    /// Links related events in a business transaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Links this event to the command/event that caused it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,

    /// Event-specific payload
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    /// Create an envelope with a fresh `event_id` stamped `Utc::now()`.
    ///
    /// Callers should override `source_version` with their own
    /// `CARGO_PKG_VERSION` via [`with_source_version`].
    ///
    /// [`with_source_version`]: EventEnvelope::with_source_version
    pub fn new(source_module: String, payload: T) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            source_module,
            source_version: "1.0.0".to_string(),
            correlation_id: None,
            causation_id: None,
            payload,
        }
    }

    /// Create an envelope with an explicit event_id (useful for testing)
    pub fn with_event_id(event_id: Uuid, source_module: String, payload: T) -> Self {
        Self {
            event_id,
            occurred_at: Utc::now(),
            source_module,
            source_version: "1.0.0".to_string(),
            correlation_id: None,
            causation_id: None,
            payload,
        }
    }

    pub fn with_source_version(mut self, version: String) -> Self {
        self.source_version = version;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_causation_id(mut self, causation_id: Option<String>) -> Self {
        self.causation_id = causation_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_creation_defaults() {
        let envelope = EventEnvelope::new("billing".to_string(), json!({"test": "data"}));

        assert_eq!(envelope.source_module, "billing");
        assert!(envelope.correlation_id.is_none());
        assert!(envelope.causation_id.is_none());
    }

    #[test]
    fn envelope_builder_overrides() {
        let envelope = EventEnvelope::new("billing".to_string(), json!({"test": "data"}))
            .with_source_version("2.1.0".to_string())
            .with_correlation_id(Some("corr-456".to_string()))
            .with_causation_id(Some("cause-789".to_string()));

        assert_eq!(envelope.source_version, "2.1.0");
        assert_eq!(envelope.correlation_id, Some("corr-456".to_string()));
        assert_eq!(envelope.causation_id, Some("cause-789".to_string()));
    }

    #[test]
    fn envelope_roundtrips_through_json() {
        let envelope = EventEnvelope::new("billing".to_string(), json!({"amount": "10.00"}));
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let back: EventEnvelope<serde_json::Value> = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(back.event_id, envelope.event_id);
        assert_eq!(back.payload, envelope.payload);
    }
}
