//! In-memory implementation of the EventBus trait for tests and local runs

use crate::{BusMessage, BusResult, EventBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;

/// EventBus backed by a tokio broadcast channel.
///
/// Every subscriber sees every published message; subject filtering happens
/// on the subscriber side against the subscription pattern. Suitable for
/// unit tests and single-process runs without a broker.
#[derive(Clone)]
pub struct InMemoryBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
}

impl InMemoryBus {
    /// Create a bus with the default buffer (1024 messages). Subscribers
    /// that lag behind the buffer skip the overwritten messages.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Check whether a subject matches a subscription pattern.
    ///
    /// NATS-style wildcards:
    /// - `*` matches exactly one token
    /// - `>` matches one or more trailing tokens
    fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split('.').collect();
        let pattern_tokens: Vec<&str> = pattern.split('.').collect();

        let mut s_idx = 0;
        let mut p_idx = 0;

        while s_idx < subject_tokens.len() && p_idx < pattern_tokens.len() {
            let pattern_token = pattern_tokens[p_idx];

            if pattern_token == ">" {
                return true;
            } else if pattern_token == "*" || subject_tokens[s_idx] == pattern_token {
                s_idx += 1;
                p_idx += 1;
            } else {
                return false;
            }
        }

        // Both must be exhausted for a full match (a trailing `>` returned above)
        s_idx == subject_tokens.len() && p_idx == pattern_tokens.len()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        let msg = BusMessage::new(subject.to_string(), payload);

        // A send error only means there are currently no subscribers
        let _ = self.sender.send(msg);

        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::matches_pattern(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "in-memory bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[test]
    fn pattern_matching() {
        // Exact
        assert!(InMemoryBus::matches_pattern(
            "billing.events.invoice.paid",
            "billing.events.invoice.paid"
        ));

        // Single-token wildcard
        assert!(InMemoryBus::matches_pattern(
            "billing.events.invoice.paid",
            "billing.events.*.paid"
        ));
        assert!(!InMemoryBus::matches_pattern(
            "billing.events.invoice.paid",
            "billing.*.paid"
        ));

        // Multi-token wildcard
        assert!(InMemoryBus::matches_pattern(
            "billing.events.invoice.paid",
            "billing.events.>"
        ));
        assert!(!InMemoryBus::matches_pattern(
            "billing.events.invoice.paid",
            "payments.>"
        ));

        // Edge cases
        assert!(InMemoryBus::matches_pattern("single", "*"));
        assert!(InMemoryBus::matches_pattern("single", ">"));
        assert!(!InMemoryBus::matches_pattern("one.two", "one"));
    }

    #[tokio::test]
    async fn publish_and_subscribe() {
        let bus = InMemoryBus::new();

        let mut stream = bus.subscribe("billing.events.>").await.unwrap();

        let payload = b"invoice paid".to_vec();
        bus.publish("billing.events.invoice.paid", payload.clone())
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(msg.subject, "billing.events.invoice.paid");
        assert_eq!(msg.payload, payload);
    }

    #[tokio::test]
    async fn wildcard_filtering() {
        let bus = InMemoryBus::new();

        let mut stream = bus.subscribe("billing.events.invoice.*").await.unwrap();

        bus.publish("billing.events.invoice.created", b"match".to_vec())
            .await
            .unwrap();
        bus.publish("billing.events.payment.completed", b"no match".to_vec())
            .await
            .unwrap();
        bus.publish("billing.events.invoice.paid", b"match".to_vec())
            .await
            .unwrap();

        let msg1 = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert_eq!(msg1.subject, "billing.events.invoice.created");

        let msg2 = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert_eq!(msg2.subject, "billing.events.invoice.paid");

        let result = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
        assert!(result.is_err(), "should timeout, no more messages");
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let bus = InMemoryBus::new();

        let mut stream1 = bus.subscribe("billing.>").await.unwrap();
        let mut stream2 = bus.subscribe("billing.>").await.unwrap();

        let payload = b"broadcast".to_vec();
        bus.publish("billing.events.refund.completed", payload.clone())
            .await
            .unwrap();

        let msg1 = tokio::time::timeout(Duration::from_secs(1), stream1.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        let msg2 = tokio::time::timeout(Duration::from_secs(1), stream2.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(msg1.payload, payload);
        assert_eq!(msg2.payload, payload);
    }
}
