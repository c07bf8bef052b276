//! CoAP endpoints over UDP and TCP.
//!
//! - [`Client`]: sends requests, retransmitting confirmables over UDP
//! - [`Server`]: serves a [`Handler`] on a handle or listener, with
//!   duplicate detection for confirmable datagrams
//! - [`ServeMux`]: a [`Handler`] that routes by URI path and transport
//!
//! # Example
//!
//! ```no_run
//! use coapline_endpoint::{listen_and_serve, ServeMux};
//! use coapline_message::{Code, Message};
//!
//! # async fn run() -> coapline_endpoint::Result<()> {
//! let mut mux = ServeMux::new();
//! mux.handle_func("*", "/hello", |_ctx, msg: &Message| {
//!     Some(Message::ack_response(msg, Code::CONTENT).with_payload(&b"world"[..]))
//! })?;
//! listen_and_serve("udp", "0.0.0.0:5683", mux).await
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod reliability;
pub mod router;
pub mod server;

pub use client::{Client, MAX_UNSOLICITED};
pub use config::{ClientConfig, ServerConfig, TransmissionParams};
pub use error::{Error, Result};
pub use handler::{func_handler, FuncHandler, Handler, RequestContext};
pub use reliability::{Correlation, Dedup, DedupCache, Transaction, TransactionState};
pub use router::{not_found, path_match, ServeMux};
pub use server::{listen_and_serve, serve, Server};
