use thiserror::Error;

/// Errors raised while encoding/decoding envelopes or driving a
/// [`crate::transport::Transport`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no type tag registered for payload: {0}")]
    UnknownType(String),

    #[error("failed to decode envelope content: {0}")]
    Decode(String),

    #[error("broker transport error: {0}")]
    Transport(String),
}

impl From<ProtocolError> for scrape_common::ScrapeError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::UnknownType(t) => scrape_common::ScrapeError::UnknownType(t),
            ProtocolError::Decode(d) => scrape_common::ScrapeError::Decode(d),
            ProtocolError::Transport(t) => scrape_common::ScrapeError::Transport(t),
        }
    }
}
