//! CoAP message model and wire codecs.
//!
//! Two framings share one [`Message`] type:
//! - [`datagram`]: the RFC 7252 format used over UDP (4-byte header with
//!   type and message ID)
//! - [`stream`]: the RFC 8323 format used over TCP (length-prefixed, no
//!   type or message ID)
//!
//! Decoding never panics on malformed input; every rejection is a
//! [`CodecError`].

pub mod code;
pub mod datagram;
pub mod error;
pub mod message;
pub mod option;
pub mod stream;

pub use code::{Code, MessageType};
pub use datagram::{decode_datagram, encode_datagram, HEADER_SIZE, MAX_PACKET_LEN};
pub use error::{CodecError, Result};
pub use message::{Message, MAX_TOKEN_LEN};
pub use option::{content_format, CoapOption};
pub use stream::{decode_stream, encode_stream, stream_frame_len, DEFAULT_MAX_FRAME_SIZE};
