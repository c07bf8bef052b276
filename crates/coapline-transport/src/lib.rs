//! UDP and TCP transport handles.
//!
//! A [`Conn`] owns exactly one socket: a UDP socket (bound, optionally
//! connected) or a connected TCP stream. It sends and receives whole CoAP
//! messages using the framing that matches its transport, and it can be
//! closed from any task to unblock pending receives.
//!
//! [`StreamListener`] is the TCP accept side.

pub mod addr;
pub mod conn;
pub mod error;
pub mod listener;

pub use addr::{Addr, Network};
pub use conn::{Conn, ConnConfig};
pub use error::{Result, TransportError};
pub use listener::StreamListener;
