//! NATS-based implementation of the EventBus trait

use crate::{BusError, BusMessage, BusResult, EventBus};
use async_nats::Client;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

/// EventBus backed by a NATS server.
///
/// Wraps an already-connected `async_nats::Client`. Subject wildcards are
/// handled by the server, so `subscribe` passes patterns through verbatim.
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Direct access to the underlying client, for callers that need NATS
    /// features not exposed through the trait (e.g. connection state).
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let stream = subscriber
            .map(|nats_msg| BusMessage::new(nats_msg.subject.to_string(), nats_msg.payload.to_vec()));

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Requires a running NATS server; CI relies on the InMemoryBus tests.
    // Manual run: docker run -p 4222:4222 nats:2.10-alpine

    #[tokio::test]
    #[ignore]
    async fn nats_bus_publish_subscribe() {
        let client = async_nats::connect("nats://localhost:4222")
            .await
            .expect("NATS server must be running on localhost:4222");

        let bus = NatsBus::new(client);

        let mut stream = bus.subscribe("test.nats.>").await.unwrap();

        let payload = b"test message".to_vec();
        bus.publish("test.nats.hello", payload.clone())
            .await
            .unwrap();

        let msg = tokio::time::timeout(std::time::Duration::from_secs(2), stream.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended");

        assert_eq!(msg.subject, "test.nats.hello");
        assert_eq!(msg.payload, payload);
    }
}
