use std::io::ErrorKind;
use std::time::Duration;

use coapline_message::CodecError;

use crate::addr::Network;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No message arrived before the read deadline.
    #[error("receive timed out after {0:?}")]
    Timeout(Duration),

    /// The peer closed the stream.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The handle was closed locally.
    #[error("transport closed")]
    Closed,

    /// A datagram send had neither a destination nor a connected peer.
    #[error("no destination address and no connected peer")]
    NoPeer,

    /// The operation or address does not match the handle's transport.
    #[error("operation requires a {expected} transport, handle is {actual}")]
    WrongNetwork { expected: Network, actual: Network },

    /// The transport name is not one of `udp` or `tcp`.
    #[error("unsupported network {0:?} (expected \"udp\" or \"tcp\")")]
    UnsupportedNetwork(String),

    /// Inbound bytes could not be decoded, or an outbound message could not
    /// be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl TransportError {
    /// Whether a serve loop should pause and retry rather than stop.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout(_) => true,
            TransportError::Io(err) | TransportError::Accept(err) => matches!(
                err.kind(),
                ErrorKind::WouldBlock
                    | ErrorKind::Interrupted
                    | ErrorKind::TimedOut
                    | ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
