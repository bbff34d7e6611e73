pub mod channel;
pub mod envelope;
pub mod error;
pub mod memory_transport;
pub mod messages;
pub mod transport;

pub use channel::{Handler, QueueChannel};
pub use envelope::{Envelope, Payload};
pub use error::ProtocolError;
pub use transport::Transport;
