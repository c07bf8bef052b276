/// Errors that can occur in client and server operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid setup: bad route registration, transport name or parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] coapline_transport::TransportError),

    /// Codec-level error.
    #[error("codec error: {0}")]
    Codec(#[from] coapline_message::CodecError),

    /// A confirmable exchange ran out of retransmissions without a reply.
    #[error("no reply after {transmissions} transmission(s)")]
    Timeout { transmissions: u32 },

    /// The peer answered with a Reset.
    #[error("rejected by peer (reset for message {message_id})")]
    Rejected { message_id: u16 },
}

pub type Result<T> = std::result::Result<T, Error>;
