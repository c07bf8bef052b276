//! Constrained Application Protocol (RFC 7252) over UDP, and CoAP over TCP
//! (RFC 8323).
//!
//! # Crate Structure
//!
//! - [`message`]: message model plus datagram and stream codecs
//! - [`transport`]: UDP/TCP transport handles and the TCP listener
//! - [`endpoint`]: client, server loop, router and reliability engine

/// Re-export message types.
pub mod message {
    pub use coapline_message::*;
}

/// Re-export transport types.
pub mod transport {
    pub use coapline_transport::*;
}

/// Re-export endpoint types.
pub mod endpoint {
    pub use coapline_endpoint::*;
}
