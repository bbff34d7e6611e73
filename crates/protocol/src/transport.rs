use async_trait::async_trait;
use tokio_stream::wrappers::ReceiverStream;

use crate::envelope::Envelope;
use crate::error::ProtocolError;

/// The broker driver, abstracted down to the two operations the core
/// actually needs. A real implementation wraps an AMQP client; tests and
/// local development use [`crate::memory_transport::InMemoryTransport`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to `queue`, yielding every envelope published to it from
    /// the moment of subscription onward, in publish order.
    async fn subscribe(&self, queue: &str) -> Result<ReceiverStream<Envelope>, ProtocolError>;

    async fn publish(&self, queue: &str, envelope: Envelope) -> Result<(), ProtocolError>;
}
