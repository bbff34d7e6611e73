use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_stream::StreamExt;

use crate::envelope::Payload;
use crate::error::ProtocolError;
use crate::transport::Transport;

/// A handler callback for one type tag. Handlers run on their own spawned
/// task (never on the reader loop) but are still expected to return
/// quickly — in practice every handler in this system does nothing more
/// than forward the decoded payload onto a bounded internal channel.
pub type Handler = Arc<dyn Fn(Payload) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Decodes envelopes off a [`Transport`] queue and dispatches them to
/// per-type handlers; encodes and publishes outgoing payloads.
pub struct QueueChannel {
    transport: Arc<dyn Transport>,
    queue: String,
    handlers: RwLock<HashMap<&'static str, Handler>>,
}

impl QueueChannel {
    pub fn new(transport: Arc<dyn Transport>, queue: impl Into<String>) -> Self {
        Self {
            transport,
            queue: queue.into(),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Install the callback for `tag`. Not meant to be called once
    /// [`Self::consume`] is running.
    pub async fn register_handler(&self, tag: &'static str, handler: Handler) {
        self.handlers.write().await.insert(tag, handler);
    }

    /// Begin delivery: subscribes to the configured queue and, for every
    /// frame, either discards it (decode failure or no handler for its
    /// type) or spawns a dispatch task that runs the registered handler.
    /// Runs until the underlying stream ends (the transport closed).
    pub async fn consume(self: Arc<Self>) -> Result<(), ProtocolError> {
        let mut stream = self.transport.subscribe(&self.queue).await?;

        while let Some(envelope) = stream.next().await {
            let payload = match Payload::decode(&envelope) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::debug!(error = %err, tag = envelope.type_tag(), "discarding undecodable frame");
                    continue;
                }
            };

            let tag = envelope.type_tag();
            let handler = self.handlers.read().await.get(tag).cloned();
            match handler {
                Some(handler) => {
                    tokio::spawn(handler(payload));
                }
                None => {
                    tracing::debug!(tag, "discarding frame with no registered handler");
                }
            }
        }

        Ok(())
    }

    /// Resolve the outgoing tag from the payload's variant and publish it.
    pub async fn send(&self, payload: Payload) -> Result<(), ProtocolError> {
        let envelope = payload.encode()?;
        self.transport.publish(&self.queue, envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_transport::InMemoryTransport;
    use crate::messages::{FanoutHeader, StatusUpdate};
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    #[tokio::test]
    async fn registered_handler_receives_decoded_payload() {
        let transport = Arc::new(InMemoryTransport::new());
        let channel = Arc::new(QueueChannel::new(transport, "control"));

        let seen = Arc::new(AtomicBool::new(false));
        let seen_writer = seen.clone();
        channel
            .register_handler(
                "statusUpdate",
                Arc::new(move |_payload: Payload| {
                    let seen = seen_writer.clone();
                    Box::pin(async move {
                        seen.store(true, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        let consumer = tokio::spawn(channel.clone().consume());

        channel
            .send(Payload::StatusUpdate(StatusUpdate {
                header: FanoutHeader { sender_id: Uuid::new_v4() },
                available_for_work: true,
            }))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(seen.load(Ordering::SeqCst));
        consumer.abort();
    }

    #[tokio::test]
    async fn frame_with_no_handler_is_silently_discarded() {
        let transport = Arc::new(InMemoryTransport::new());
        let channel = Arc::new(QueueChannel::new(transport, "control"));
        let consumer = tokio::spawn(channel.clone().consume());

        channel
            .send(Payload::StatusUpdate(StatusUpdate {
                header: FanoutHeader { sender_id: Uuid::new_v4() },
                available_for_work: true,
            }))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());
        consumer.abort();
    }
}
