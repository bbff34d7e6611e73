use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use crate::envelope::Envelope;
use crate::error::ProtocolError;
use crate::transport::Transport;

const QUEUE_CAPACITY: usize = 256;

/// In-process [`Transport`] for tests and local development. One broadcast
/// channel per queue name; every subscriber sees every envelope published
/// after it subscribed, in publish order — there is no competing-consumer
/// semantics, matching the single shared broker queue the hub and every
/// worker both publish to and subscribe from.
#[derive(Default)]
pub struct InMemoryTransport {
    queues: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, queue: &str) -> broadcast::Sender<Envelope> {
        let mut queues = self.queues.lock().expect("queue map mutex poisoned");
        queues
            .entry(queue.to_string())
            .or_insert_with(|| broadcast::channel(QUEUE_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn subscribe(&self, queue: &str) -> Result<ReceiverStream<Envelope>, ProtocolError> {
        let mut broadcast_rx = self.sender_for(queue).subscribe();
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "in-memory transport subscriber fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    async fn publish(&self, queue: &str, envelope: Envelope) -> Result<(), ProtocolError> {
        let sender = self.sender_for(queue);
        // No active subscribers is not an error — mirrors a broker accepting
        // a publish with no consumer currently attached.
        let _ = sender.send(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{FanoutHeader, StatusUpdate};
    use crate::envelope::Payload;
    use tokio_stream::StreamExt;
    use uuid::Uuid;

    #[tokio::test]
    async fn subscriber_receives_messages_published_after_it_subscribes() {
        let transport = InMemoryTransport::new();
        let mut stream = transport.subscribe("control").await.unwrap();

        let payload = Payload::StatusUpdate(StatusUpdate {
            header: FanoutHeader { sender_id: Uuid::new_v4() },
            available_for_work: true,
        });
        transport
            .publish("control", payload.encode().unwrap())
            .await
            .unwrap();

        let received = stream.next().await.expect("expected one envelope");
        assert_eq!(received.type_tag(), "statusUpdate");
    }

    #[tokio::test]
    async fn preserves_fifo_order_per_queue() {
        let transport = InMemoryTransport::new();
        let mut stream = transport.subscribe("control").await.unwrap();

        for i in 0..5u32 {
            let payload = Payload::StatusUpdate(StatusUpdate {
                header: FanoutHeader { sender_id: Uuid::from_u128(i as u128) },
                available_for_work: i % 2 == 0,
            });
            transport
                .publish("control", payload.encode().unwrap())
                .await
                .unwrap();
        }

        for i in 0..5u32 {
            let envelope = stream.next().await.unwrap();
            let Payload::StatusUpdate(su) = Payload::decode(&envelope).unwrap() else {
                panic!("expected StatusUpdate");
            };
            assert_eq!(su.header.sender_id, Uuid::from_u128(i as u128));
        }
    }
}
